//! Store → filesystem write-back.
//!
//! The document store adapter calls these at fixed lifecycle points (after a
//! save, after a title change, before a delete, after a project rename), or
//! wraps itself in [`HookedStore`](super::HookedStore) which does it for it.
//! Every hook stands down while the context reports a sync in progress.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{EngineError, Result, SyncEngine};
use crate::config::ConflictStrategy;
use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::git::{CommitOutcome, GitBackend};
use crate::lock::is_locked;
use crate::model::{Document, ProjectNode};
use crate::storage::{
    default_folder_name, locate_project_folder, write_project_marker, ProjectStorage,
};
use crate::store::DocumentStore;
use wiki_fs::{sanitize_path, ATTACHMENTS_DIR, MARKER_FILE};

/// What a hook did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// A sync from the other direction is running
    Suppressed,
    /// Sync is off globally or for the project
    Disabled,
    /// The file already matched
    Unchanged,
    Written { path: PathBuf, locked: bool },
    Renamed { from: PathBuf, to: PathBuf },
    Deleted { path: PathBuf },
    /// There was no file to act on
    Missing,
    /// Nothing was done, for the given reason
    Skipped(String),
}

/// State of a document's backing file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// No file; it can be restored from the store
    Missing { expected: PathBuf },
    Present {
        path: PathBuf,
        locked: bool,
        /// Body on disk equals the stored content
        in_sync: bool,
    },
}

impl SyncEngine {
    /// Write a saved document to its page file and commit it.
    pub fn on_document_saved<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        doc: &Document,
    ) -> Result<HookOutcome> {
        if ctx.is_syncing() {
            debug!("Skipping write-back of '{}', sync in progress", doc.title);
            return Ok(HookOutcome::Suppressed);
        }
        let Some(project) = self.active_project(store, &doc.project)? else {
            return Ok(HookOutcome::Disabled);
        };

        let lock = self.project_lock(&project.identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let git = self.repository(&storage)?;
        write_project_marker(storage.project_path(), &project)?;
        self.write_document(store, ctx, &storage, &git, doc)
    }

    /// Move the page file after a title change and commit the move.
    ///
    /// Files of child pages are rewritten since their `parent` key names the
    /// old title.
    pub fn on_document_renamed<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        doc: &Document,
        old_title: &str,
    ) -> Result<HookOutcome> {
        if ctx.is_syncing() {
            debug!("Skipping rename of '{}', sync in progress", old_title);
            return Ok(HookOutcome::Suppressed);
        }
        let Some(project) = self.active_project(store, &doc.project)? else {
            return Ok(HookOutcome::Disabled);
        };

        let lock = self.project_lock(&project.identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let git = self.repository(&storage)?;

        let Some(old_path) = storage.resolve_existing_path(old_title) else {
            debug!("No file for '{}', writing '{}' fresh", old_title, doc.title);
            return self.write_document(store, ctx, &storage, &git, doc);
        };
        let new_path = storage.file_path(&doc.title);
        let outcome = if old_path == new_path {
            HookOutcome::Unchanged
        } else if new_path.exists() {
            warn!(
                "Cannot rename {} to {}: target exists",
                old_path.display(),
                new_path.display()
            );
            return Ok(HookOutcome::Skipped(format!("{} already exists", new_path.display())));
        } else {
            let message = format!("Renamed: {} → {}", old_title, doc.title);
            self.move_page_file(ctx, &storage, &git, &old_path, &new_path, &message)?;
            self.events.emit(SyncEvent::FileOp {
                project: project.identifier.clone(),
                operation: "rename".to_string(),
                path: old_path.display().to_string(),
                new_path: Some(new_path.display().to_string()),
            });
            HookOutcome::Renamed {
                from: old_path,
                to: new_path,
            }
        };

        for child in store
            .documents(&project.identifier)?
            .into_iter()
            .filter(|d| d.parent_id == Some(doc.id))
        {
            if let Err(e) = self.write_document(store, ctx, &storage, &git, &child) {
                warn!("Failed to update parent of '{}': {}", child.title, e);
            }
        }

        Ok(outcome)
    }

    fn move_page_file(
        &self,
        ctx: &SyncContext,
        storage: &ProjectStorage,
        git: &GitBackend,
        old_path: &Path,
        new_path: &Path,
        message: &str,
    ) -> Result<()> {
        let (Some(old_rel), Some(new_rel)) =
            (storage.relative_path(old_path), storage.relative_path(new_path))
        else {
            return Err(EngineError::WriteFailed(new_path.display().to_string()));
        };
        if let Err(e) = git.rename_path(&old_rel, &new_rel, ctx.actor(), message) {
            // Untracked files cannot be moved by git
            debug!("git mv failed ({}), moving {} directly", e, old_rel);
            fs::rename(old_path, new_path)?;
            git.commit_path(&new_rel, ctx.actor(), message)?;
        }
        info!("Renamed {} to {}", old_rel, new_rel);
        Ok(())
    }

    /// Remove the page file of a document about to be deleted.
    pub fn on_document_deleted<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        doc: &Document,
    ) -> Result<HookOutcome> {
        if ctx.is_syncing() {
            debug!("Skipping delete of '{}', sync in progress", doc.title);
            return Ok(HookOutcome::Suppressed);
        }
        let Some(project) = self.active_project(store, &doc.project)? else {
            return Ok(HookOutcome::Disabled);
        };

        let lock = self.project_lock(&project.identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let Some(path) = storage.resolve_existing_path(&doc.title) else {
            debug!("No file to delete for '{}'", doc.title);
            return Ok(HookOutcome::Missing);
        };
        let git = self.repository(&storage)?;
        let rel = storage
            .relative_path(&path)
            .ok_or_else(|| EngineError::WriteFailed(path.display().to_string()))?;
        let message = format!("Deleted: {}", doc.title);

        // Edits on disk that never reached history are committed first
        let snapshot = format!("Snapshot before delete: {}", doc.title);
        if git.commit_path(&rel, ctx.actor(), &snapshot)? == CommitOutcome::Committed {
            info!("Committed pending edits to {} before deleting it", rel);
        }
        if let Err(e) = git.delete_path(&rel, ctx.actor(), &message) {
            debug!("git rm failed ({}), removing {} directly", e, rel);
            fs::remove_file(&path)?;
            git.commit_path(&rel, ctx.actor(), &message)?;
        }
        info!("Deleted {}", path.display());
        self.events.emit(SyncEvent::FileOp {
            project: project.identifier,
            operation: "delete".to_string(),
            path: path.display().to_string(),
            new_path: None,
        });
        Ok(HookOutcome::Deleted { path })
    }

    /// Bring a project folder in line with a renamed project.
    ///
    /// Under `dbWins` the folder is moved to the new default name unless that
    /// name is taken. Under the other policies the folder stays where it is.
    /// The `.project` marker is rewritten either way.
    pub fn on_project_renamed<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        project: &ProjectNode,
        old_identifier: &str,
        old_name: &str,
    ) -> Result<HookOutcome> {
        if ctx.is_syncing() {
            debug!("Skipping folder update for '{}', sync in progress", project.name);
            return Ok(HookOutcome::Suppressed);
        }
        let Some(project) = self.active_project(store, &project.identifier)? else {
            return Ok(HookOutcome::Disabled);
        };

        let lock = self.project_lock(&project.identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let current = self.storage(&project);
        let parent_dir = current
            .project_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.base_path.clone());

        let old_node = ProjectNode {
            identifier: old_identifier.to_string(),
            name: old_name.to_string(),
            ..project.clone()
        };
        let folder = match locate_project_folder(&parent_dir, &project) {
            Some((path, _)) => path,
            None => match locate_project_folder(&parent_dir, &old_node) {
                Some((path, _)) => path,
                None => {
                    debug!("Project '{}' has no folder yet", project.identifier);
                    return Ok(HookOutcome::Missing);
                }
            },
        };

        if self.strategy() != ConflictStrategy::DbWins {
            write_project_marker(&folder, &project)?;
            info!(
                "Project '{}' renamed to '{}', folder {} kept",
                old_name,
                project.name,
                folder.display()
            );
            return Ok(HookOutcome::Written {
                path: folder,
                locked: false,
            });
        }

        let target = parent_dir.join(default_folder_name(&project));
        if same_location(&folder, &target) {
            write_project_marker(&folder, &project)?;
            return Ok(HookOutcome::Unchanged);
        }
        if target.exists() {
            warn!(
                "Cannot move {} to {}: target exists",
                folder.display(),
                target.display()
            );
            write_project_marker(&folder, &project)?;
            return Ok(HookOutcome::Skipped(format!("{} already exists", target.display())));
        }

        fs::rename(&folder, &target)?;
        write_project_marker(&target, &project)?;
        info!("Moved {} to {}", folder.display(), target.display());
        self.events.emit(SyncEvent::ProjectRenamed {
            project: project.identifier.clone(),
            old_name: old_name.to_string(),
            new_name: project.name.clone(),
        });
        Ok(HookOutcome::Renamed {
            from: folder,
            to: target,
        })
    }

    /// Refresh a document from its file when it is viewed.
    ///
    /// Returns the document as it stands afterwards.
    pub fn on_document_loaded<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        doc: Document,
    ) -> Result<Document> {
        if ctx.is_syncing() {
            return Ok(doc);
        }
        let Some(project) = self.active_project(store, &doc.project)? else {
            return Ok(doc);
        };

        let lock = self.project_lock(&project.identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let Some(file) = storage.read(&doc.title) else {
            return Ok(doc);
        };
        if file.mtime <= doc.updated_on {
            return Ok(doc);
        }
        let Some(rel) = storage.relative_path(&file.path) else {
            return Ok(doc);
        };

        let git = self.repository(&storage)?;
        let parsed = wiki_fs::parse(&file.content);
        let title = doc.title.clone();
        let absorbed = self.absorb_file(store, ctx, &git, doc.clone(), &rel, &file, &parsed)?;

        if absorbed.content_updated || absorbed.parent_updated {
            self.events.emit(SyncEvent::DocumentUpdated {
                project: project.identifier.clone(),
                title,
            });
        }
        Ok(absorbed.document.unwrap_or(doc))
    }

    /// Report whether a document's file exists, is locked, and matches.
    pub fn file_status<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        doc: &Document,
    ) -> Result<FileStatus> {
        let project = store
            .project(&doc.project)?
            .ok_or_else(|| EngineError::ProjectNotFound(doc.project.clone()))?;
        let storage = self.storage(&project);

        let Some(file) = storage.read(&doc.title) else {
            return Ok(FileStatus::Missing {
                expected: storage.file_path(&doc.title),
            });
        };
        let in_sync = wiki_fs::parse(&file.content).content == doc.text.trim_start();
        Ok(FileStatus::Present {
            locked: is_locked(&file.path),
            path: file.path,
            in_sync,
        })
    }

    /// Rewrite a document's file from the store and commit it.
    pub fn restore_file<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        doc: &Document,
    ) -> Result<PathBuf> {
        let project = store
            .project(&doc.project)?
            .ok_or_else(|| EngineError::ProjectNotFound(doc.project.clone()))?;

        let lock = self.project_lock(&project.identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let git = self.repository(&storage)?;
        let existing = storage.read(&doc.title);
        let rendered = self.render(store, doc, existing.as_ref().map(|f| f.content.as_str()))?;
        let path = storage
            .write(&doc.title, &rendered)
            .ok_or_else(|| EngineError::WriteFailed(doc.title.clone()))?;
        let rel = storage
            .relative_path(&path)
            .ok_or_else(|| EngineError::WriteFailed(path.display().to_string()))?;
        git.commit_path(&rel, ctx.actor(), &format!("Restored from database: {}", doc.title))?;
        info!("Restored {}", path.display());
        Ok(path)
    }

    /// Render, write and commit one document. The caller holds the project lock.
    fn write_document<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        storage: &ProjectStorage,
        git: &GitBackend,
        doc: &Document,
    ) -> Result<HookOutcome> {
        let existing = storage.read(&doc.title);
        let rendered = self.render(store, doc, existing.as_ref().map(|f| f.content.as_str()))?;
        let mirrored = self.mirror_attachments(store, storage, doc)?;

        if existing.as_ref().is_some_and(|f| f.content == rendered) && mirrored.is_none() {
            debug!("'{}' is already up to date on disk", doc.title);
            return Ok(HookOutcome::Unchanged);
        }

        let locked = existing.as_ref().is_some_and(|f| is_locked(&f.path));
        if locked {
            warn!("'{}' is locked by another process, writing anyway", doc.title);
        }

        let path = storage
            .write(&doc.title, &rendered)
            .ok_or_else(|| EngineError::WriteFailed(doc.title.clone()))?;
        let rel = storage
            .relative_path(&path)
            .ok_or_else(|| EngineError::WriteFailed(path.display().to_string()))?;

        let mut paths = vec![rel.as_str()];
        if let Some(dir) = mirrored.as_deref() {
            paths.push(dir);
        }
        if storage.project_path().join(MARKER_FILE).is_file() {
            paths.push(MARKER_FILE);
        }
        git.commit_paths(&paths, ctx.actor(), &format!("Update page: {}", doc.title))?;

        self.events.emit(SyncEvent::FileWritten {
            project: doc.project.clone(),
            path: rel.clone(),
        });
        Ok(HookOutcome::Written { path, locked })
    }

    /// Copy the document's attachments under `_attachments/<page path>/`
    /// when missing or of a different size.
    ///
    /// Returns the relative attachment folder when anything was copied.
    fn mirror_attachments<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        storage: &ProjectStorage,
        doc: &Document,
    ) -> Result<Option<String>> {
        let attachments = store.attachments(&doc.project, doc.id)?;
        if attachments.is_empty() {
            return Ok(None);
        }

        let page_path = sanitize_path(&self.page_path(store, doc)?.join("/"));
        let rel_dir = format!("{}/{}", ATTACHMENTS_DIR, page_path);
        let dir = storage.join_relative(&rel_dir)?;

        let mut copied = false;
        for attachment in attachments {
            if !attachment.disk_path.is_file() {
                warn!(
                    "Attachment {} of '{}' is missing at {}",
                    attachment.filename,
                    doc.title,
                    attachment.disk_path.display()
                );
                continue;
            }
            let target = storage.join_relative(&format!("{}/{}", rel_dir, attachment.filename));
            let Ok(target) = target else {
                warn!("Skipping attachment with unsafe name {:?}", attachment.filename);
                continue;
            };
            let source_len = fs::metadata(&attachment.disk_path)?.len();
            let target_len = fs::metadata(&target).map(|m| m.len()).ok();
            if target_len == Some(source_len) {
                continue;
            }
            fs::create_dir_all(&dir)?;
            fs::copy(&attachment.disk_path, &target)?;
            debug!("Mirrored attachment {}", target.display());
            copied = true;
        }

        Ok(copied.then_some(rel_dir))
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
