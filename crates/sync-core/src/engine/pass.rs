//! The filesystem → store pass.
//!
//! Fixed order: stage all, detect changes, deletions (logged only), renames,
//! modifications, additions (changed files plus a scan of the folder for
//! files that have no document), folder-name drift, commit. Under `dbWins`
//! the files that lost against the store are rewritten and committed last.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::report::{Conflict, PendingFile, ProjectRename, RenamedDocument, SyncReport};
use super::{EngineError, Result, SyncEngine};
use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::git::GitBackend;
use crate::lock::{is_locked, PassLock};
use crate::model::{Document, DocumentId, NewDocument, ProjectNode};
use crate::storage::{write_project_marker, FolderMatch, ProjectStorage, StoredFile};
use crate::store::DocumentStore;
use wiki_fs::{
    file_to_title, is_top_level_page, sanitize_filename, Frontmatter, MARKDOWN_EXT, MARKER_FILE,
};

const PASS_COMMIT_MESSAGE: &str = "Synced from filesystem";
const RESTORE_COMMIT_MESSAGE: &str = "Restored from database";
const IMPORT_COMMENT: &str = "Imported from filesystem";

/// Parse a metadata timestamp: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a
/// bare date.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}

/// A page file waiting to be imported.
struct Candidate {
    rel_path: String,
    file: StoredFile,
    metadata: Frontmatter,
    content: String,
}

struct Pass<'a, S: DocumentStore + ?Sized> {
    engine: &'a SyncEngine,
    store: &'a S,
    ctx: &'a SyncContext,
    project: &'a ProjectNode,
    storage: ProjectStorage,
    git: GitBackend,
    report: SyncReport,
    /// Relative paths already handled this pass
    seen: HashSet<String>,
    restore: Vec<DocumentId>,
}

impl SyncEngine {
    /// Import every change found in the project folder into the store.
    ///
    /// Never fails: errors are logged and listed in [`SyncReport::errors`],
    /// and whatever was done before the failure stays done.
    pub fn sync_from_filesystem<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        identifier: &str,
    ) -> SyncReport {
        let project = match self.active_project(store, identifier) {
            Ok(Some(project)) => project,
            Ok(None) => return SyncReport::disabled(),
            Err(e) => {
                error!("Cannot sync {}: {}", identifier, e);
                return SyncReport {
                    errors: vec![e.to_string()],
                    ..Default::default()
                };
            }
        };

        let lock = self.project_lock(identifier);
        let _serial = lock.lock().unwrap_or_else(|e| e.into_inner());

        let storage = self.storage(&project);
        let git = match self.repository(&storage) {
            Ok(git) => git,
            Err(e) => {
                error!("Cannot open repository for {}: {}", identifier, e);
                return SyncReport {
                    errors: vec![e.to_string()],
                    ..Default::default()
                };
            }
        };

        let mut pass = Pass {
            engine: self,
            store,
            ctx,
            project: &project,
            storage,
            git,
            report: SyncReport::default(),
            seen: HashSet::new(),
            restore: Vec::new(),
        };
        if let Err(e) = pass.run() {
            error!("Sync pass for {} failed: {}", identifier, e);
            pass.report.errors.push(e.to_string());
        }

        let report = pass.report;
        info!(
            "Synced {}: {} imported, {} renamed, {} updated, {} skipped",
            identifier,
            report.imported.len(),
            report.renamed.len(),
            report.updated.len(),
            report.skipped()
        );
        self.events.emit(SyncEvent::PassCompleted {
            project: identifier.to_string(),
            changes: report.imported.len() + report.renamed.len() + report.updated.len(),
        });
        report
    }
}

impl<S: DocumentStore + ?Sized> Pass<'_, S> {
    fn run(&mut self) -> Result<()> {
        let _cross_process = PassLock::acquire(self.git.path())?;
        write_project_marker(self.storage.project_path(), self.project)?;

        self.git.stage_all()?;
        let changes = self.git.detect_changes()?;
        debug!("Changes in {}: {:?}", self.project.identifier, changes);

        for path in &changes.deleted {
            if is_top_level_page(path) {
                info!("{} was deleted on disk, keeping its page", path);
                self.report.deleted_on_disk.push(path.clone());
            }
        }

        let mut added: Vec<String> = Vec::new();
        for (old, new) in &changes.renamed {
            match (is_top_level_page(old), is_top_level_page(new)) {
                (true, true) => self.isolate(new, |pass| pass.handle_rename(old, new)),
                (true, false) => {
                    info!("{} moved out of the page set to {}, keeping its page", old, new);
                    self.report.deleted_on_disk.push(old.clone());
                }
                (false, _) => added.push(new.clone()),
            }
        }

        for path in changes.modified.iter().filter(|p| is_top_level_page(p)) {
            self.isolate(path, |pass| pass.handle_modified(path));
        }

        added.extend(changes.added.iter().cloned());
        let newly_added: HashSet<String> = added.into_iter().collect();
        self.handle_additions(&newly_added)?;

        if self.engine.strategy().accepts_disk_metadata() {
            self.follow_folder_names()?;
        }

        self.git.stage_all()?;
        self.git.commit_staged(self.ctx.actor(), PASS_COMMIT_MESSAGE)?;

        if !self.restore.is_empty() {
            self.restore_from_store()?;
        }
        Ok(())
    }

    /// Run one per-file step; a failure is recorded and the pass goes on.
    fn isolate(&mut self, rel_path: &str, step: impl FnOnce(&mut Self) -> Result<()>) {
        self.seen.insert(rel_path.to_string());
        if let Err(e) = step(self) {
            warn!("Failed to sync {}: {}", rel_path, e);
            self.report.errors.push(format!("{}: {}", rel_path, e));
        }
    }

    /// Document a file belongs to: by the `id` in its metadata, else by title.
    fn find_document(&self, metadata: &Frontmatter, title: &str) -> Result<Option<Document>> {
        if let Some(id) = metadata.id {
            if let Some(doc) = self.store.document(&self.project.identifier, DocumentId(id))? {
                return Ok(Some(doc));
            }
            debug!("Page id {} from metadata is unknown, matching by title", id);
        }
        Ok(self.store.document_by_title(&self.project.identifier, title)?)
    }

    /// Document whose title resolves, through the naming variants, to `path`.
    fn find_by_file(&self, path: &Path) -> Result<Option<Document>> {
        Ok(self
            .store
            .documents(&self.project.identifier)?
            .into_iter()
            .find(|doc| self.owns(doc, path)))
    }

    fn owns(&self, doc: &Document, path: &Path) -> bool {
        self.storage.resolve_existing_path(&doc.title).as_deref() == Some(path)
    }

    fn read(&self, rel_path: &str) -> Result<StoredFile> {
        self.storage
            .read_relative(rel_path)
            .ok_or_else(|| EngineError::ReadFailed(rel_path.to_string()))
    }

    fn handle_rename(&mut self, old: &str, new: &str) -> Result<()> {
        let file = self.read(new)?;
        let parsed = wiki_fs::parse(&file.content);
        let new_title = file_to_title(new);

        let found = match parsed.metadata.id {
            Some(_) => self.find_document(&parsed.metadata, &file_to_title(old))?,
            None => self.store.document_by_title(&self.project.identifier, &file_to_title(old))?,
        };
        let Some(mut doc) = found else {
            debug!("No page for renamed file {} -> {}, importing", old, new);
            self.seen.remove(new);
            return Ok(());
        };

        if doc.title != new_title {
            let old_title = doc.title.clone();
            doc = {
                let _guard = self.ctx.suppress_hooks();
                self.store
                    .rename_document(self.ctx, &self.project.identifier, doc.id, &new_title)?
            };
            info!("Renamed page '{}' to '{}' after {} -> {}", old_title, new_title, old, new);
            self.report.renamed.push(RenamedDocument {
                old_title: old_title.clone(),
                new_title: new_title.clone(),
            });
            self.engine.events.emit(SyncEvent::DocumentRenamed {
                project: self.project.identifier.clone(),
                old_title,
                new_title,
            });
        }

        self.absorb(doc, new, &file, &parsed)
    }

    fn handle_modified(&mut self, rel_path: &str) -> Result<()> {
        let file = self.read(rel_path)?;
        let parsed = wiki_fs::parse(&file.content);
        let found = match self.find_document(&parsed.metadata, &file_to_title(rel_path))? {
            Some(doc) => Some(doc),
            None => self.find_by_file(&file.path)?,
        };
        match found {
            Some(doc) => self.absorb(doc, rel_path, &file, &parsed),
            None => {
                debug!("{} changed but has no page, treating it as new", rel_path);
                self.seen.remove(rel_path);
                Ok(())
            }
        }
    }

    fn absorb(
        &mut self,
        doc: Document,
        rel_path: &str,
        file: &StoredFile,
        parsed: &wiki_fs::ParsedNote<'_>,
    ) -> Result<()> {
        let title = doc.title.clone();
        let id = doc.id;
        let absorbed = self
            .engine
            .absorb_file(self.store, self.ctx, &self.git, doc, rel_path, file, parsed)?;

        if absorbed.content_updated || absorbed.parent_updated {
            self.report.updated.push(title.clone());
            self.engine.events.emit(SyncEvent::DocumentUpdated {
                project: self.project.identifier.clone(),
                title: title.clone(),
            });
        }
        if let Some(reason) = absorbed.conflict {
            self.report.conflicts.push(Conflict { title, reason });
        }
        if absorbed.needs_restore {
            self.restore.push(id);
        }
        Ok(())
    }

    /// New files from the change set plus every top-level file that has no
    /// page yet.
    fn handle_additions(&mut self, newly_added: &HashSet<String>) -> Result<()> {
        let mut paths: Vec<String> = self
            .storage
            .top_level_files()
            .into_iter()
            .chain(newly_added.iter().filter(|p| !p.contains('/')).cloned())
            .filter(|p| !p.starts_with('.') && p != MARKER_FILE && !self.seen.contains(p))
            .collect();
        paths.sort();
        paths.dedup();

        let mut candidates = Vec::new();
        for rel_path in paths {
            if !rel_path.ends_with(MARKDOWN_EXT) {
                if self.storage.join_relative(&rel_path).is_ok_and(|p| p.is_file()) {
                    debug!("{} is not a page, listing it as pending", rel_path);
                    self.report.pending.push(PendingFile::attachment(rel_path));
                }
                continue;
            }

            let Some(file) = self.storage.read_relative(&rel_path) else {
                continue;
            };
            if is_locked(&file.path) {
                warn!("{} is locked by another process, skipping", rel_path);
                self.report.locked.push(rel_path);
                continue;
            }

            let parsed = wiki_fs::parse(&file.content);
            let title = file_to_title(&rel_path);
            let found = match self.find_document(&parsed.metadata, &title)? {
                Some(doc) => Some(doc),
                None => self.find_by_file(&file.path)?,
            };
            match found {
                Some(doc)
                    if doc.title != title
                        && !self.owns(&doc, &file.path)
                        && self.storage.file_exists(&doc.title) =>
                {
                    warn!("{} carries the id of '{}', which has its own file", rel_path, doc.title);
                    self.report.pending.push(PendingFile::wiki(
                        rel_path,
                        format!("Duplicate of page '{}' (id {})", doc.title, doc.id),
                    ));
                }
                Some(doc) if doc.title != title && !self.owns(&doc, &file.path) => {
                    let metadata = parsed.metadata.clone();
                    let content = parsed.content.to_string();
                    self.seen.insert(rel_path.clone());
                    let candidate = Candidate {
                        rel_path,
                        file,
                        metadata,
                        content,
                    };
                    if let Err(e) = self.adopt_by_id(doc, &candidate) {
                        warn!("Failed to sync {}: {}", candidate.rel_path, e);
                        self.report.errors.push(format!("{}: {}", candidate.rel_path, e));
                    }
                }
                Some(doc) => {
                    if newly_added.contains(&rel_path) {
                        self.isolate(&rel_path, |pass| pass.absorb(doc, &rel_path, &file, &parsed));
                    }
                }
                None if !parsed.has_block => {
                    info!("{} has no frontmatter, not importing it", rel_path);
                    self.report.pending.push(PendingFile::wiki(rel_path, "missing frontmatter"));
                }
                None => {
                    let metadata = parsed.metadata.clone();
                    let content = parsed.content.to_string();
                    candidates.push(Candidate {
                        rel_path,
                        file,
                        metadata,
                        content,
                    });
                }
            }
        }

        self.import_all(candidates)
    }

    /// A new file carrying the id of an existing page under another name:
    /// the page follows the file.
    fn adopt_by_id(&mut self, doc: Document, candidate: &Candidate) -> Result<()> {
        let new_title = file_to_title(&candidate.rel_path);
        let old_title = doc.title.clone();
        let doc = {
            let _guard = self.ctx.suppress_hooks();
            self.store
                .rename_document(self.ctx, &self.project.identifier, doc.id, &new_title)?
        };
        info!("Page '{}' is now '{}' (matched by id {})", old_title, new_title, doc.id);
        self.report.renamed.push(RenamedDocument {
            old_title: old_title.clone(),
            new_title: new_title.clone(),
        });
        self.engine.events.emit(SyncEvent::DocumentRenamed {
            project: self.project.identifier.clone(),
            old_title,
            new_title,
        });

        let parsed = wiki_fs::parse(&candidate.file.content);
        self.absorb(doc, &candidate.rel_path, &candidate.file, &parsed)
    }

    /// Import files in rounds so a child whose parent page is imported in the
    /// same pass still finds it.
    fn import_all(&mut self, mut candidates: Vec<Candidate>) -> Result<()> {
        loop {
            let before = candidates.len();
            let mut deferred = Vec::new();
            for candidate in candidates {
                if let Some(parent) = candidate.metadata.parent.as_deref() {
                    if self
                        .store
                        .document_by_title(&self.project.identifier, parent)?
                        .is_none()
                    {
                        deferred.push(candidate);
                        continue;
                    }
                }
                if let Err(e) = self.import(&candidate) {
                    warn!("Failed to import {}: {}", candidate.rel_path, e);
                    self.report.errors.push(format!("{}: {}", candidate.rel_path, e));
                }
            }
            if deferred.is_empty() || deferred.len() == before {
                candidates = deferred;
                break;
            }
            candidates = deferred;
        }

        for candidate in candidates {
            let parent = candidate.metadata.parent.clone().unwrap_or_default();
            warn!("Parent page '{}' not found for {}", parent, candidate.rel_path);
            self.report.pending.push(PendingFile::wiki(
                candidate.rel_path,
                format!("Parent page '{}' not found", parent),
            ));
        }
        Ok(())
    }

    fn import(&mut self, candidate: &Candidate) -> Result<()> {
        let project = &self.project.identifier;
        let title = file_to_title(&candidate.rel_path);
        let parent_id = match candidate.metadata.parent.as_deref() {
            Some(parent) => self.store.document_by_title(project, parent)?.map(|p| p.id),
            None => None,
        };

        let new_doc = NewDocument {
            title: title.clone(),
            text: candidate.content.clone(),
            parent_id,
            created_on: candidate.metadata.created.as_deref().and_then(parse_timestamp),
            updated_on: candidate.metadata.updated.as_deref().and_then(parse_timestamp),
            comment: IMPORT_COMMENT.to_string(),
        };
        let doc = {
            let _guard = self.ctx.suppress_hooks();
            self.store.create_document(self.ctx, project, new_doc)?
        };
        info!("Imported {} as page '{}' ({})", candidate.rel_path, doc.title, doc.id);
        self.report.imported.push(doc.title.clone());
        self.engine.events.emit(SyncEvent::DocumentImported {
            project: project.clone(),
            title: doc.title.clone(),
        });

        let stamp = Frontmatter {
            id: Some(doc.id.0),
            created: candidate
                .metadata
                .created
                .is_none()
                .then(|| doc.created_on.to_rfc3339()),
            ..Default::default()
        };
        let rewritten = wiki_fs::update_metadata(&candidate.file.content, &stamp)?;
        if !self.storage.write_path(&candidate.file.path, &rewritten) {
            warn!("Could not record page id in {}", candidate.rel_path);
        }
        Ok(())
    }

    /// Under `fileWins`/`manual`, a project folder found through its marker
    /// but named differently on disk renames the project.
    fn follow_folder_names(&mut self) -> Result<()> {
        let mut nodes = vec![self.project.clone()];
        nodes.extend(self.store.child_projects(&self.project.identifier)?);

        for node in nodes {
            let storage = ProjectStorage::new(self.storage.base_path(), &node);
            if storage.folder_match() != FolderMatch::Marker {
                continue;
            }
            let Some(folder) = storage
                .project_path()
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            if folder == node.name
                || folder == sanitize_filename(&node.name)
                || folder == node.identifier
            {
                continue;
            }

            let renamed = {
                let _guard = self.ctx.suppress_hooks();
                self.store.rename_project(self.ctx, &node.identifier, &folder)?
            };
            write_project_marker(storage.project_path(), &renamed)?;
            info!("Project '{}' renamed to '{}' after its folder", node.name, folder);
            self.report.project_renames.push(ProjectRename {
                project: node.identifier.clone(),
                old_name: node.name.clone(),
                new_name: folder.clone(),
            });
            self.engine.events.emit(SyncEvent::ProjectRenamed {
                project: node.identifier,
                old_name: node.name,
                new_name: folder,
            });
        }
        Ok(())
    }

    /// Rewrite files whose edits lost against the store and commit them.
    fn restore_from_store(&mut self) -> Result<()> {
        let project = &self.project.identifier;
        let mut paths = Vec::new();
        for id in std::mem::take(&mut self.restore) {
            let Some(doc) = self.store.document(project, id)? else {
                continue;
            };
            let existing = self.storage.read(&doc.title);
            let rendered = self
                .engine
                .render(self.store, &doc, existing.as_ref().map(|f| f.content.as_str()))?;
            let Some(path) = self.storage.write(&doc.title, &rendered) else {
                self.report
                    .errors
                    .push(format!("{}: could not restore file", doc.title));
                continue;
            };
            if let Some(rel) = self.storage.relative_path(&path) {
                paths.push(rel);
            }
            self.report.restored.push(doc.title);
        }

        if !paths.is_empty() {
            let rels: Vec<&str> = paths.iter().map(String::as_str).collect();
            self.git
                .commit_paths(&rels, self.ctx.actor(), RESTORE_COMMIT_MESSAGE)?;
        }
        Ok(())
    }
}
