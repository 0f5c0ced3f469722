//! End-to-end sync scenarios against real Git repositories.
//!
//! Each test builds a base path in a temp dir, seeds an in-memory store and
//! drives the engine the way the daemon does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use sync_core::folders::QUARANTINE_INFO_FILE;
use sync_core::storage::read_project_marker;
use sync_core::{
    Actor, ConflictStrategy, DocumentStore, HookedStore, InMemoryStore, NewDocument, PendingKind,
    SyncConfig, SyncContext, SyncEngine, SyncEvent,
};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    engine: Arc<SyncEngine>,
    ctx: SyncContext,
}

impl Fixture {
    fn new(strategy: ConflictStrategy) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = SyncConfig::for_base_path(dir.path());
        config.conflict_strategy = strategy;
        Self {
            dir,
            engine: Arc::new(SyncEngine::new(config)),
            ctx: SyncContext::new(Actor::new("Ada", "ada@example.com")),
        }
    }

    fn base(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Seed project `wiki` ("Wiki") and create its folder.
    fn wiki(&self, store: &InMemoryStore) -> PathBuf {
        store.insert_project("wiki", "Wiki", None);
        let folder = self.base().join("Wiki");
        fs::create_dir_all(&folder).unwrap();
        folder
    }

    fn git_log(&self, folder: &Path) -> String {
        let out = std::process::Command::new("git")
            .args(["log", "--format=%an|%s"])
            .current_dir(folder)
            .output()
            .unwrap();
        String::from_utf8_lossy(&out.stdout).to_string()
    }
}

#[test]
fn import_links_child_to_parent_and_writes_ids_back() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Home.md"), "---\n---\n\nWelcome").unwrap();
    fs::write(folder.join("Child.md"), "---\nparent: Home\n---\n\nChild body").unwrap();

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.imported.len(), 2);
    let home = store.document_by_title("wiki", "Home").unwrap().unwrap();
    let child = store.document_by_title("wiki", "Child").unwrap().unwrap();
    assert_eq!(child.parent_id, Some(home.id));
    assert_eq!(child.text.trim(), "Child body");

    let written = wiki_fs::parse(&fs::read_to_string(folder.join("Child.md")).unwrap()).metadata;
    assert_eq!(written.id, Some(child.id.0));
    assert_eq!(written.parent.as_deref(), Some("Home"));
    assert!(written.created.is_some());

    assert!(fx.git_log(&folder).contains("Ada|Synced from filesystem"));
}

#[test]
fn second_pass_over_an_unchanged_folder_does_nothing() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Home.md"), "---\n---\n\nWelcome").unwrap();

    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let mutations = store.mutation_count();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(!report.has_changes());
    assert_eq!(store.mutation_count(), mutations);
}

#[test]
fn file_without_frontmatter_is_pending_until_fixed() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Draft.md"), "Just text").unwrap();
    fs::write(folder.join("photo.jpg"), [0xff, 0xd8]).unwrap();

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    assert!(report.imported.is_empty());
    assert!(store.documents("wiki").unwrap().is_empty());

    let draft = report.pending.iter().find(|p| p.file == "Draft.md").unwrap();
    assert_eq!(draft.kind, PendingKind::Wiki);
    assert_eq!(draft.reasons, vec!["missing frontmatter"]);
    let photo = report.pending.iter().find(|p| p.file == "photo.jpg").unwrap();
    assert_eq!(photo.kind, PendingKind::Attachment);

    let fixed = fx
        .engine
        .fix_missing_frontmatter(&store, &fx.ctx, "wiki", &["Draft.md".to_string()])
        .unwrap();
    assert_eq!(fixed.fixed, vec!["Draft.md"]);

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    assert_eq!(report.imported, vec!["Draft"]);
    assert_eq!(store.document_by_title("wiki", "Draft").unwrap().unwrap().text.trim(), "Just text");
}

#[test]
fn orphan_child_is_pending_with_the_missing_parent_named() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Leaf.md"), "---\nparent: Nowhere\n---\n\nLeaf").unwrap();

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.imported.is_empty());
    assert_eq!(report.pending[0].reasons, vec!["Parent page 'Nowhere' not found"]);
}

#[test]
fn renamed_file_keeps_the_page_id() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Page.md"), "---\n---\n\nSome reasonably long body text").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let original = store.document_by_title("wiki", "Page").unwrap().unwrap();

    fs::rename(folder.join("Page.md"), folder.join("Renamed.md")).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.imported.is_empty(), "{:?}", report.imported);
    assert_eq!(report.renamed.len(), 1);
    assert_eq!(report.renamed[0].old_title, "Page");
    assert_eq!(report.renamed[0].new_title, "Renamed");
    let renamed = store.document("wiki", original.id).unwrap().unwrap();
    assert_eq!(renamed.title, "Renamed");
    assert_eq!(store.documents("wiki").unwrap().len(), 1);

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    assert!(!report.has_changes());
}

#[test]
fn file_deleted_on_disk_keeps_its_page() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Page.md"), "---\n---\n\nBody").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    fs::remove_file(folder.join("Page.md")).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert_eq!(report.deleted_on_disk, vec!["Page.md"]);
    assert!(store.document_by_title("wiki", "Page").unwrap().is_some());
}

#[test]
fn newer_file_wins_and_bumps_the_version_once() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Page.md"), "---\n---\n\nFirst").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let doc = store.document_by_title("wiki", "Page").unwrap().unwrap();
    store.set_updated_on(doc.id, Utc::now() - Duration::hours(1));

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    fs::write(folder.join("Page.md"), raw.replace("First", "Second")).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert_eq!(report.updated, vec!["Page"]);
    let updated = store.document("wiki", doc.id).unwrap().unwrap();
    assert_eq!(updated.version, doc.version + 1);
    assert_eq!(updated.text.trim(), "Second");
}

#[test]
fn changed_parent_key_moves_the_page() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("A.md"), "---\n---\n\nFirst parent").unwrap();
    fs::write(folder.join("B.md"), "---\n---\n\nSecond parent").unwrap();
    fs::write(folder.join("Page.md"), "---\nparent: A\n---\n\nBody").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let a = store.document_by_title("wiki", "A").unwrap().unwrap();
    let b = store.document_by_title("wiki", "B").unwrap().unwrap();
    let page = store.document_by_title("wiki", "Page").unwrap().unwrap();
    assert_eq!(page.parent_id, Some(a.id));

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    fs::write(folder.join("Page.md"), raw.replace("parent: A\n", "parent: B\n")).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.updated, vec!["Page"]);
    let moved = store.document("wiki", page.id).unwrap().unwrap();
    assert_eq!(moved.parent_id, Some(b.id));
    assert_eq!(moved.text.trim(), "Body");
}

#[test]
fn unknown_parent_on_an_existing_page_is_skipped() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Home.md"), "---\n---\n\nWelcome").unwrap();
    fs::write(folder.join("Page.md"), "---\nparent: Home\n---\n\nBody").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let home = store.document_by_title("wiki", "Home").unwrap().unwrap();
    let page = store.document_by_title("wiki", "Page").unwrap().unwrap();
    store.set_updated_on(page.id, Utc::now() - Duration::hours(1));

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    let edited = raw.replace("parent: Home\n", "parent: Nobody\n").replace("Body", "New body");
    fs::write(folder.join("Page.md"), edited).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.errors.is_empty(), "{:?}", report.errors);
    let kept = store.document("wiki", page.id).unwrap().unwrap();
    assert_eq!(kept.parent_id, Some(home.id));
    assert_eq!(kept.text.trim(), "New body");
}

#[test]
fn store_newer_than_file_is_left_alone_under_file_wins() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Page.md"), "---\n---\n\nFirst").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let doc = store.document_by_title("wiki", "Page").unwrap().unwrap();

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    fs::write(folder.join("Page.md"), raw.replace("First", "Second")).unwrap();
    store.set_updated_on(doc.id, Utc::now() + Duration::hours(1));
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.updated.is_empty());
    assert_eq!(store.document("wiki", doc.id).unwrap().unwrap().version, doc.version);
}

#[test]
fn manual_strategy_reports_conflicts_without_touching_either_side() {
    let fx = Fixture::new(ConflictStrategy::Manual);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Page.md"), "---\n---\n\nFirst").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");
    let doc = store.document_by_title("wiki", "Page").unwrap().unwrap();
    store.set_updated_on(doc.id, Utc::now() - Duration::hours(1));

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    let edited = raw.replace("First", "Edited on disk");
    fs::write(folder.join("Page.md"), &edited).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].title, "Page");
    assert_eq!(store.document("wiki", doc.id).unwrap().unwrap().text.trim(), "First");
    assert_eq!(fs::read_to_string(folder.join("Page.md")).unwrap(), edited);
}

#[test]
fn db_wins_restores_edited_files() {
    let fx = Fixture::new(ConflictStrategy::DbWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::write(folder.join("Page.md"), "---\n---\n\nFirst").unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    fs::write(folder.join("Page.md"), raw.replace("First", "Scribble")).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert_eq!(report.restored, vec!["Page"]);
    let restored = wiki_fs::parse(&fs::read_to_string(folder.join("Page.md")).unwrap())
        .content
        .to_string();
    assert_eq!(restored.trim(), "First");
    assert!(fx.git_log(&folder).contains("Restored from database"));
}

#[test]
fn pass_mutations_do_not_echo_back_through_hooks() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let hooked = HookedStore::new(InMemoryStore::new(), fx.engine.clone());
    let folder = fx.wiki(hooked.inner());
    fs::write(folder.join("Page.md"), "---\n---\n\nFirst").unwrap();
    fx.engine.sync_from_filesystem(&hooked, &fx.ctx, "wiki");
    let doc = hooked.document_by_title("wiki", "Page").unwrap().unwrap();
    hooked.inner().set_updated_on(doc.id, Utc::now() - Duration::hours(1));

    let raw = fs::read_to_string(folder.join("Page.md")).unwrap();
    let edited = raw.replace("First", "Second");
    fs::write(folder.join("Page.md"), &edited).unwrap();
    let before = hooked.inner().mutation_count();
    let report = fx.engine.sync_from_filesystem(&hooked, &fx.ctx, "wiki");

    assert_eq!(report.updated, vec!["Page"]);
    assert_eq!(hooked.inner().mutation_count(), before + 1);
    assert_eq!(fs::read_to_string(folder.join("Page.md")).unwrap(), edited);
    assert!(!fx.git_log(&folder).contains("Update page: Page"));
}

#[test]
fn pages_created_through_hooks_are_not_imported_again() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let hooked = HookedStore::new(InMemoryStore::new(), fx.engine.clone());
    let folder = fx.wiki(hooked.inner());

    let doc = hooked
        .create_document(
            &fx.ctx,
            "wiki",
            NewDocument {
                title: "Written".into(),
                text: "From the wiki".into(),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(folder.join("Written.md").exists());
    assert!(fx.git_log(&folder).contains("Ada|Update page: Written"));

    let report = fx.engine.sync_from_filesystem(&hooked, &fx.ctx, "wiki");
    assert!(report.imported.is_empty());
    let stored = hooked.document("wiki", doc.id).unwrap().unwrap();
    assert_eq!(hooked.documents("wiki").unwrap(), vec![stored]);
}

#[test]
fn db_wins_project_rename_moves_the_folder() {
    let fx = Fixture::new(ConflictStrategy::DbWins);
    let hooked = HookedStore::new(InMemoryStore::new(), fx.engine.clone());
    hooked.inner().insert_project("old", "Old", None);
    fs::create_dir_all(fx.base().join("Old")).unwrap();
    fs::write(fx.base().join("Old").join("Page.md"), "---\n---\n\nBody").unwrap();
    fx.engine.sync_from_filesystem(&hooked, &fx.ctx, "old");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let _sub = fx.engine.events().subscribe(move |e| sink.lock().unwrap().push(e));

    hooked.rename_project(&fx.ctx, "old", "New").unwrap();

    let new_folder = fx.base().join("New");
    assert!(!fx.base().join("Old").exists());
    assert!(new_folder.join("Page.md").exists());
    let marker = read_project_marker(&new_folder).unwrap();
    assert_eq!(marker.id, "old");
    assert_eq!(marker.name, "New");
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SyncEvent::ProjectRenamed { new_name, .. } if new_name == "New")));
}

#[test]
fn file_wins_folder_rename_renames_the_project() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    store.insert_project("eng", "Engineering", None);
    fs::create_dir_all(fx.base().join("Engineering")).unwrap();
    fx.engine.sync_from_filesystem(&store, &fx.ctx, "eng");

    fs::rename(fx.base().join("Engineering"), fx.base().join("Platform")).unwrap();
    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "eng");

    assert_eq!(report.project_renames.len(), 1);
    assert_eq!(report.project_renames[0].new_name, "Platform");
    assert_eq!(store.project("eng").unwrap().unwrap().name, "Platform");
    assert_eq!(read_project_marker(&fx.base().join("Platform")).unwrap().name, "Platform");
}

#[test]
fn stray_folder_is_found_and_quarantined_with_a_manifest() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    fs::create_dir_all(folder.join("Stray")).unwrap();
    fs::write(folder.join("Stray").join("note.md"), "lost").unwrap();
    fs::create_dir_all(folder.join(".hidden")).unwrap();
    let project = store.project("wiki").unwrap().unwrap();

    let found = fx.engine.scan_unassigned_folders(&store, Some(&project)).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Stray");
    assert_eq!(found[0].parent_project.as_deref(), Some("wiki"));

    let target = fx
        .engine
        .quarantine_folder(&found[0].path, fx.ctx.actor(), Some(&project))
        .unwrap();

    assert!(!folder.join("Stray").exists());
    assert_eq!(target.parent().unwrap().file_name().unwrap(), "_orphaned");
    let name = target.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.ends_with("_Stray"), "{}", name);
    assert_eq!(fs::read_to_string(target.join("note.md")).unwrap(), "lost");
    let manifest = fs::read_to_string(target.join(QUARANTINE_INFO_FILE)).unwrap();
    assert!(manifest.contains("Folder Name: Stray"));
    assert!(manifest.contains("Project: Wiki (wiki)"));
    assert!(fx.engine.scan_unassigned_folders(&store, Some(&project)).unwrap().is_empty());
}

#[test]
fn adopted_folder_becomes_a_synced_child_project() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    let sub = folder.join("Design Notes");
    fs::create_dir_all(&sub).unwrap();
    fs::write(sub.join("Idea.md"), "---\n---\n\nAn idea").unwrap();
    let parent = store.project("wiki").unwrap().unwrap();

    let project = fx.engine.adopt_folder(&store, &fx.ctx, &sub, Some(&parent)).unwrap();
    assert_eq!(project.identifier, "design-notes");
    assert_eq!(project.parent_identifier(), Some("wiki"));

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "design-notes");
    assert_eq!(report.imported, vec!["Idea"]);
}

#[test]
fn disabled_project_is_skipped() {
    let fx = Fixture::new(ConflictStrategy::FileWins);
    let store = InMemoryStore::new();
    let folder = fx.wiki(&store);
    store.set_sync_enabled("wiki", false);
    fs::write(folder.join("Page.md"), "---\n---\n\nBody").unwrap();

    let report = fx.engine.sync_from_filesystem(&store, &fx.ctx, "wiki");

    assert!(report.disabled);
    assert!(store.documents("wiki").unwrap().is_empty());
    assert!(!folder.join(".git").exists());
}
