//! End-to-end tests for sync-daemon.
//!
//! Drives the pieces `run` wires together: watcher events, routing to a
//! project, a pass on the blocking pool, and the persisted store.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sync_core::{DocumentStore, NewDocument, NewProject, SyncConfig, SyncEngine};
use sync_daemon::{FileEventKind, FileWatcher, JsonFileStore, Runner};
use tempfile::TempDir;
use tokio::time::timeout;

fn runner(dir: &TempDir) -> Arc<Runner> {
    let engine = Arc::new(SyncEngine::new(SyncConfig::for_base_path(dir.path())));
    let store = JsonFileStore::open(dir.path().join(".wiki-sync").join("store.json")).unwrap();
    let runner = Runner::new(engine, store);
    let ctx = runner.context();
    runner
        .store()
        .create_project(
            &ctx,
            NewProject {
                identifier: "eng".into(),
                name: "Engineering".into(),
                parent: None,
                sync_enabled: true,
            },
        )
        .unwrap();
    fs::create_dir_all(dir.path().join("Engineering")).unwrap();
    Arc::new(runner)
}

#[tokio::test]
async fn test_file_event_triggers_import() {
    let dir = TempDir::new().unwrap();
    let runner = runner(&dir);
    let mut watcher =
        FileWatcher::new(dir.path().to_path_buf(), Duration::from_millis(50)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(dir.path().join("Engineering").join("Home.md"), "---\n---\n\nWelcome").unwrap();

    let event = timeout(Duration::from_secs(5), async {
        loop {
            let event = watcher.event_rx().recv().await.unwrap();
            if event.path == Path::new("Engineering/Home.md") {
                return event;
            }
        }
    })
    .await
    .expect("no event for the new page");
    assert_eq!(event.kind, FileEventKind::Modified);

    let identifier = runner.project_for_path(&event.path).unwrap().unwrap();
    assert_eq!(identifier, "eng");

    let pass_runner = runner.clone();
    let report = tokio::task::spawn_blocking(move || pass_runner.sync_project(&identifier))
        .await
        .unwrap();
    assert_eq!(report.imported, vec!["Home"]);

    let reopened = JsonFileStore::open(dir.path().join(".wiki-sync").join("store.json")).unwrap();
    assert!(reopened.document_by_title("eng", "Home").unwrap().is_some());
}

#[tokio::test]
async fn test_store_writes_go_to_disk_and_git() {
    let dir = TempDir::new().unwrap();
    let runner = runner(&dir);
    let ctx = runner.context();

    runner
        .store()
        .create_document(
            &ctx,
            "eng",
            NewDocument {
                title: "Runbook".into(),
                text: "Restart the thing".into(),
                ..Default::default()
            },
        )
        .unwrap();

    let written = fs::read_to_string(dir.path().join("Engineering").join("Runbook.md")).unwrap();
    assert!(written.contains("Restart the thing"));

    let log = std::process::Command::new("git")
        .args(["log", "--format=%an|%s"])
        .current_dir(dir.path().join("Engineering"))
        .output()
        .unwrap();
    let log = String::from_utf8_lossy(&log.stdout);
    assert!(log.contains("Wiki Sync|Update page: Runbook"), "{}", log);
}

#[tokio::test]
async fn test_store_directory_is_not_watched() {
    let dir = TempDir::new().unwrap();
    let runner = runner(&dir);
    let mut watcher =
        FileWatcher::new(dir.path().to_path_buf(), Duration::from_millis(50)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    runner.store().inner().save().unwrap();
    fs::write(dir.path().join("Engineering").join("Marker.md"), "---\n---\n").unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            let event = watcher.event_rx().recv().await.unwrap();
            assert!(!event.path.starts_with(".wiki-sync"), "{:?}", event);
            if event.path == Path::new("Engineering/Marker.md") {
                return;
            }
        }
    })
    .await
    .expect("no event for the page");
}
