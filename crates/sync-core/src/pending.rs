//! Remediation of pending files reported by a pass.

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::context::SyncContext;
use crate::engine::{EngineError, FixReport, Result, SyncEngine};
use crate::folders::free_target;
use crate::lock::is_locked;
use crate::model::ProjectNode;
use crate::storage::ProjectStorage;
use crate::store::DocumentStore;
use wiki_fs::{ATTACHMENTS_DIR, DELIMITER, ORPHANED_DIR};

const EMPTY_BLOCK: &str = "---\n---\n\n";

impl SyncEngine {
    /// Prepend an empty frontmatter block to each file lacking one, so the
    /// next pass imports it. Each fixed file is committed on its own.
    pub fn fix_missing_frontmatter<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        identifier: &str,
        files: &[String],
    ) -> Result<FixReport> {
        let project = self.project_for_remediation(store, identifier)?;
        let lock = self.project_lock(identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let git = self.repository(&storage)?;
        let mut report = FixReport::default();

        for file in files {
            let path = match storage.join_relative(file) {
                Ok(path) => path,
                Err(e) => {
                    report.fail(file, e.to_string());
                    continue;
                }
            };
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    report.fail(file, format!("Cannot read file: {}", e));
                    continue;
                }
            };
            if content.starts_with(DELIMITER) {
                report.fail(file, "Frontmatter already exists");
                continue;
            }
            if is_locked(&path) {
                report.fail(file, "File is locked");
                continue;
            }
            if let Err(e) = fs::write(&path, format!("{}{}", EMPTY_BLOCK, content)) {
                report.fail(file, format!("Cannot write file: {}", e));
                continue;
            }

            let rel = storage.relative_path(&path).unwrap_or_else(|| file.clone());
            let message = format!("Auto-fix: Added frontmatter to {}", rel);
            if let Err(e) = git.commit_path(&rel, ctx.actor(), &message) {
                warn!("Added frontmatter to {} but could not commit: {}", rel, e);
            }
            info!("Added frontmatter to {}", rel);
            report.fixed.push(file.clone());
        }

        Ok(report)
    }

    /// Hand a pending file to the store as a project attachment and move it
    /// under `_attachments/`, with a timestamp suffix if the name is taken.
    pub fn attach_pending_file<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        identifier: &str,
        file: &str,
    ) -> Result<PathBuf> {
        let project = self.project_for_remediation(store, identifier)?;
        let lock = self.project_lock(identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let source = existing_file(&storage, file)?;
        let filename = file_name(&source)?;

        let dir = storage.project_path().join(ATTACHMENTS_DIR);
        fs::create_dir_all(&dir)?;
        let target = attachment_target(&dir, &filename);
        fs::rename(&source, &target)?;

        if let Err(e) = store.attach_file(ctx, identifier, &filename, &target) {
            fs::rename(&target, &source)?;
            return Err(e.into());
        }

        self.commit_move(ctx, &storage, &source, &target, &format!("Attached {}", filename))?;
        info!("Attached {} as {}", file, target.display());
        Ok(target)
    }

    /// Move a pending file into `_orphaned/`. Nothing is deleted.
    pub fn discard_pending_file<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        identifier: &str,
        file: &str,
    ) -> Result<PathBuf> {
        let project = self.project_for_remediation(store, identifier)?;
        let lock = self.project_lock(identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let source = existing_file(&storage, file)?;
        let filename = file_name(&source)?;

        let dir = storage.project_path().join(ORPHANED_DIR);
        fs::create_dir_all(&dir)?;
        let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
        let target = free_target(&dir, &format!("{}_{}", stamp, filename));
        fs::rename(&source, &target)?;

        self.commit_move(ctx, &storage, &source, &target, &format!("Discarded {}", filename))?;
        info!("Discarded {} to {}", file, target.display());
        Ok(target)
    }

    fn project_for_remediation<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        identifier: &str,
    ) -> Result<ProjectNode> {
        store
            .project(identifier)?
            .ok_or_else(|| EngineError::ProjectNotFound(identifier.to_string()))
    }

    fn commit_move(
        &self,
        ctx: &SyncContext,
        storage: &ProjectStorage,
        source: &Path,
        target: &Path,
        message: &str,
    ) -> Result<()> {
        let git = self.repository(storage)?;
        let (Some(from), Some(to)) = (storage.relative_path(source), storage.relative_path(target))
        else {
            return Ok(());
        };
        let tracked = git.run_git(&["ls-files", "--error-unmatch", "--", &from]).is_ok();
        let paths: Vec<&str> = if tracked {
            vec![from.as_str(), to.as_str()]
        } else {
            vec![to.as_str()]
        };
        git.commit_paths(&paths, ctx.actor(), message)?;
        Ok(())
    }
}

fn existing_file(storage: &ProjectStorage, file: &str) -> Result<PathBuf> {
    let path = storage.join_relative(file)?;
    if !path.is_file() {
        return Err(EngineError::ReadFailed(file.to_string()));
    }
    Ok(path)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| EngineError::ReadFailed(path.display().to_string()))
}

/// `dir/<filename>` if free, else `<stem>_<YYYYmmddHHMMSS>[_n]<ext>` with
/// the first `n` that is not taken.
fn attachment_target(dir: &Path, filename: &str) -> PathBuf {
    let plain = dir.join(filename);
    if !plain.exists() {
        return plain;
    }
    let stamp = Local::now().format("%Y%m%d%H%M%S").to_string();
    (1..)
        .map(|n| match n {
            1 => stamp.clone(),
            n => format!("{}_{}", stamp, n),
        })
        .map(|suffix| dir.join(with_suffix(filename, &suffix)))
        .find(|p| !p.exists())
        .unwrap_or(plain)
}

fn with_suffix(filename: &str, stamp: &str) -> String {
    let path = Path::new(filename);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|e| e.to_str()),
    ) {
        (Some(stem), Some(ext)) => format!("{}_{}.{}", stem, stamp, ext),
        _ => format!("{}_{}", filename, stamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::context::Actor;
    use crate::store::InMemoryStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SyncEngine, InMemoryStore, SyncContext, PathBuf) {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::new(SyncConfig::for_base_path(dir.path()));
        let store = InMemoryStore::new();
        store.insert_project("wiki", "Wiki", None);
        let folder = dir.path().join("Wiki");
        fs::create_dir_all(&folder).unwrap();
        let ctx = SyncContext::new(Actor::new("Ada", "ada@example.com"));
        (dir, engine, store, ctx, folder)
    }

    #[test]
    fn fixing_twice_declines_the_second_time() {
        let (_dir, engine, store, ctx, folder) = setup();
        fs::write(folder.join("Draft.md"), "Just text").unwrap();
        let files = vec!["Draft.md".to_string()];

        let first = engine.fix_missing_frontmatter(&store, &ctx, "wiki", &files).unwrap();
        assert_eq!(first.fixed, files);
        assert_eq!(fs::read_to_string(folder.join("Draft.md")).unwrap(), "---\n---\n\nJust text");

        let second = engine.fix_missing_frontmatter(&store, &ctx, "wiki", &files).unwrap();
        assert!(second.fixed.is_empty());
        assert_eq!(second.failed[0].error, "Frontmatter already exists");
        assert_eq!(fs::read_to_string(folder.join("Draft.md")).unwrap(), "---\n---\n\nJust text");
    }

    #[test]
    fn batch_keeps_going_past_failures() {
        let (_dir, engine, store, ctx, folder) = setup();
        fs::write(folder.join("B.md"), "b").unwrap();
        let files = vec!["../escape.md".to_string(), "Missing.md".to_string(), "B.md".to_string()];

        let report = engine.fix_missing_frontmatter(&store, &ctx, "wiki", &files).unwrap();
        assert_eq!(report.fixed, vec!["B.md"]);
        assert_eq!(report.failed.len(), 2);
    }

    #[test]
    fn attaching_moves_file_and_registers_it() {
        let (_dir, engine, store, ctx, folder) = setup();
        fs::create_dir_all(folder.join(ATTACHMENTS_DIR)).unwrap();
        fs::write(folder.join(ATTACHMENTS_DIR).join("photo.jpg"), "older").unwrap();
        fs::write(folder.join("photo.jpg"), "newer").unwrap();

        let target = engine.attach_pending_file(&store, &ctx, "wiki", "photo.jpg").unwrap();
        assert!(!folder.join("photo.jpg").exists());
        let name = target.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("photo_") && name.ends_with(".jpg"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "newer");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.attachments.len(), 1);
        assert_eq!(snapshot.attachments[0].attachment.disk_path, target);
    }

    #[test]
    fn discarding_moves_file_to_orphaned() {
        let (_dir, engine, store, ctx, folder) = setup();
        fs::write(folder.join("junk.tmp"), "x").unwrap();

        let target = engine.discard_pending_file(&store, &ctx, "wiki", "junk.tmp").unwrap();
        assert!(!folder.join("junk.tmp").exists());
        assert_eq!(target.parent().unwrap(), folder.join(ORPHANED_DIR));
        assert!(target.exists());
    }

    #[test]
    fn suffix_goes_before_the_extension() {
        assert_eq!(with_suffix("report.pdf", "20240101120000"), "report_20240101120000.pdf");
        assert_eq!(with_suffix("README", "20240101120000"), "README_20240101120000");
    }

    #[test]
    fn attaching_the_same_name_twice_keeps_both_files() {
        let (_dir, engine, store, ctx, folder) = setup();
        fs::create_dir_all(folder.join(ATTACHMENTS_DIR)).unwrap();
        fs::write(folder.join(ATTACHMENTS_DIR).join("photo.jpg"), "oldest").unwrap();

        fs::write(folder.join("photo.jpg"), "first").unwrap();
        let first = engine.attach_pending_file(&store, &ctx, "wiki", "photo.jpg").unwrap();
        fs::write(folder.join("photo.jpg"), "second").unwrap();
        let second = engine.attach_pending_file(&store, &ctx, "wiki", "photo.jpg").unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(&first).unwrap(), "first");
        assert_eq!(fs::read_to_string(&second).unwrap(), "second");
        let oldest = folder.join(ATTACHMENTS_DIR).join("photo.jpg");
        assert_eq!(fs::read_to_string(oldest).unwrap(), "oldest");
        assert!(second.extension().is_some_and(|e| e == "jpg"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.attachments.len(), 2);
        let [a, b] = &snapshot.attachments[..] else {
            panic!("expected two attachments");
        };
        assert_ne!(a.attachment.disk_path, b.attachment.disk_path);
    }
}
