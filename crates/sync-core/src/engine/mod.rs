//! SyncEngine: reconciles the document store with project folders.
//!
//! Two directions meet here:
//!
//! 1. Filesystem → store: [`SyncEngine::sync_from_filesystem`] stages the
//!    project repository, classifies what changed and maps every delta onto
//!    store mutations (see `pass.rs`).
//! 2. Store → filesystem: the write-back hooks (`on_document_saved`,
//!    `on_document_renamed`, ...) render documents into page files and commit
//!    them (see `hooks.rs`). [`HookedStore`] calls them at the right points.
//!
//! Store mutations made by a pass run under [`SyncContext::suppress_hooks`],
//! so the hooks stand down instead of writing the file back again. Passes and
//! hooks for one project are serialized by a per-project mutex.

mod hooked;
mod hooks;
mod pass;
mod report;

pub use hooked::HookedStore;
pub use hooks::{FileStatus, HookOutcome};
pub use pass::parse_timestamp;
pub use report::{
    Conflict, FailedFile, FixReport, PendingFile, PendingKind, ProjectRename, Remediation,
    RenamedDocument, SyncReport,
};

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConflictStrategy, SyncConfig};
use crate::context::SyncContext;
use crate::events::EventBus;
use crate::git::{GitBackend, GitError};
use crate::model::{Document, DocumentId, ProjectNode};
use crate::storage::{ProjectStorage, StorageError, StoredFile};
use crate::store::{DocumentStore, StoreError};
use wiki_fs::{Frontmatter, FrontmatterError, ParsedNote};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Failed to read {0}")]
    ReadFailed(String),

    #[error("Failed to write {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Version comment for content pulled in from disk.
pub(crate) fn updated_from_filesystem(author: Option<&str>) -> String {
    match author {
        Some(author) => format!("Updated from filesystem (Author: {})", author),
        None => "Updated from filesystem".to_string(),
    }
}

/// What happened when a file was folded into its document.
#[derive(Debug, Default)]
pub(crate) struct Absorbed {
    pub document: Option<Document>,
    pub content_updated: bool,
    pub parent_updated: bool,
    /// Content differs but the policy kept the store copy
    pub conflict: Option<String>,
    /// The file should be rewritten from the store
    pub needs_restore: bool,
}

pub struct SyncEngine {
    config: SyncConfig,
    events: Arc<EventBus>,
    project_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_events(config, Arc::new(EventBus::new()))
    }

    pub fn with_events(config: SyncConfig, events: Arc<EventBus>) -> Self {
        Self {
            config,
            events,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.config.conflict_strategy
    }

    /// Storage for `project` under the configured base path.
    pub fn storage(&self, project: &ProjectNode) -> ProjectStorage {
        ProjectStorage::new(&self.config.base_path, project)
    }

    /// Mutex serializing every pass and hook touching one project folder.
    pub(crate) fn project_lock(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(identifier.to_string()).or_default())
    }

    /// Look up a project and check that sync is on for it.
    pub(crate) fn active_project<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        identifier: &str,
    ) -> Result<Option<ProjectNode>> {
        if !self.config.enabled {
            debug!("Sync is disabled globally, skipping {}", identifier);
            return Ok(None);
        }
        let project = store
            .project(identifier)?
            .ok_or_else(|| EngineError::ProjectNotFound(identifier.to_string()))?;
        if !project.sync_enabled {
            debug!("Sync is disabled for project {}", identifier);
            return Ok(None);
        }
        Ok(Some(project))
    }

    pub(crate) fn repository(&self, storage: &ProjectStorage) -> Result<GitBackend> {
        Ok(GitBackend::open(storage.project_path(), &self.config.git_identity)?)
    }

    /// Render a document into page-file text, keeping unknown keys of the
    /// existing file's metadata.
    pub(crate) fn render<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        doc: &Document,
        existing: Option<&str>,
    ) -> Result<String> {
        let mut metadata = existing
            .map(|raw| wiki_fs::parse(raw).metadata)
            .unwrap_or_default();

        metadata.parent = match doc.parent_id {
            Some(parent_id) => store.document(&doc.project, parent_id)?.map(|p| p.title),
            None => None,
        };
        metadata.id = Some(doc.id.0);
        metadata.created = Some(doc.created_on.to_rfc3339());
        metadata.updated = Some(doc.updated_on.to_rfc3339());

        Ok(wiki_fs::build(&metadata, &doc.text)?)
    }

    /// Titles from the root page down to `doc`.
    pub(crate) fn page_path<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        doc: &Document,
    ) -> Result<Vec<String>> {
        let mut titles = vec![doc.title.clone()];
        let mut seen: HashSet<DocumentId> = HashSet::from([doc.id]);
        let mut next = doc.parent_id;
        while let Some(id) = next {
            if !seen.insert(id) {
                warn!("Parent chain of '{}' loops at page {}", doc.title, id);
                break;
            }
            match store.document(&doc.project, id)? {
                Some(parent) => {
                    titles.push(parent.title);
                    next = parent.parent_id;
                }
                None => break,
            }
        }
        titles.reverse();
        Ok(titles)
    }

    /// Fold a page file into its document according to the conflict policy,
    /// then follow the `parent` key of its metadata.
    ///
    /// Store mutations happen under the hook suppression guard.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn absorb_file<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        git: &GitBackend,
        doc: Document,
        rel_path: &str,
        file: &StoredFile,
        parsed: &ParsedNote<'_>,
    ) -> Result<Absorbed> {
        let mut absorbed = Absorbed::default();
        let mut doc = doc;

        if parsed.content != doc.text.trim_start() {
            match self.strategy() {
                ConflictStrategy::FileWins if file.mtime > doc.updated_on => {
                    let author = git.last_commit_author(rel_path);
                    let comment = updated_from_filesystem(author.as_deref());
                    let _guard = ctx.suppress_hooks();
                    doc = store.update_content(
                        ctx,
                        &doc.project,
                        doc.id,
                        parsed.content,
                        &comment,
                    )?;
                    absorbed.content_updated = true;
                    info!("Updated '{}' from {}", doc.title, rel_path);
                }
                ConflictStrategy::FileWins => {
                    debug!(
                        "'{}' is newer in the store than {} ({} >= {}), keeping it",
                        doc.title, rel_path, doc.updated_on, file.mtime
                    );
                }
                ConflictStrategy::DbWins => {
                    info!("{} differs from '{}', the store copy wins", rel_path, doc.title);
                    absorbed.needs_restore = true;
                }
                ConflictStrategy::Manual => {
                    warn!("{} differs from '{}', leaving both untouched", rel_path, doc.title);
                    absorbed.conflict = Some("file and page content differ".to_string());
                }
            }
        }

        if self.strategy().accepts_disk_metadata() {
            if let Some(updated) = self.follow_parent(store, ctx, &doc, &parsed.metadata)? {
                doc = updated;
                absorbed.parent_updated = true;
            }
        }

        absorbed.document = Some(doc);
        Ok(absorbed)
    }

    /// Point `doc` at the page named by the `parent` key, if it differs.
    fn follow_parent<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        doc: &Document,
        metadata: &Frontmatter,
    ) -> Result<Option<Document>> {
        let Some(parent_title) = metadata.parent.as_deref() else {
            return Ok(None);
        };
        let Some(parent) = store.document_by_title(&doc.project, parent_title)? else {
            warn!("Parent '{}' not found for page '{}'", parent_title, doc.title);
            return Ok(None);
        };
        if parent.id == doc.id || doc.parent_id == Some(parent.id) {
            return Ok(None);
        }

        let _guard = ctx.suppress_hooks();
        let updated = store.set_parent(ctx, &doc.project, doc.id, Some(parent.id))?;
        info!("Updated parent for '{}' to '{}'", doc.title, parent_title);
        Ok(Some(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Actor;
    use crate::store::InMemoryStore;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> SyncEngine {
        SyncEngine::new(SyncConfig::for_base_path(dir.path()))
    }

    #[test]
    fn render_writes_parent_title_and_keeps_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        let home = store.insert_document("p", "Home", "", None);
        let page = store.insert_document("p", "Notes", "Body", Some(home.id));

        let rendered = engine(&dir)
            .render(&store, &page, Some("---\ntags: [a]\nparent: Elsewhere\n---\n\nOld"))
            .unwrap();
        let parsed = wiki_fs::parse(&rendered);

        assert_eq!(parsed.metadata.parent.as_deref(), Some("Home"));
        assert_eq!(parsed.metadata.id, Some(page.id.0));
        assert!(parsed.metadata.extra.contains_key("tags"));
        assert_eq!(parsed.content, "Body");
    }

    #[test]
    fn page_path_walks_ancestors_and_stops_on_loops() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        let root = store.insert_document("p", "Root", "", None);
        let mid = store.insert_document("p", "Mid", "", Some(root.id));
        let leaf = store.insert_document("p", "Leaf", "", Some(mid.id));
        let engine = engine(&dir);

        assert_eq!(engine.page_path(&store, &leaf).unwrap(), vec!["Root", "Mid", "Leaf"]);

        let ctx = SyncContext::new(Actor::new("T", "t@example.com"));
        store.set_parent(&ctx, "p", root.id, Some(leaf.id)).unwrap();
        let root = store.document("p", root.id).unwrap().unwrap();
        assert_eq!(engine.page_path(&store, &root).unwrap().len(), 3);
    }

    #[test]
    fn disabled_configuration_has_no_active_projects() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);

        let mut config = SyncConfig::for_base_path(dir.path());
        config.enabled = false;
        let engine = SyncEngine::new(config);
        assert!(engine.active_project(&store, "p").unwrap().is_none());
    }

    #[test]
    fn unknown_project_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        assert!(matches!(
            engine(&dir).active_project(&store, "nope"),
            Err(EngineError::ProjectNotFound(_))
        ));
    }

    #[test]
    fn version_comment_names_the_author() {
        assert_eq!(
            updated_from_filesystem(Some("Ada")),
            "Updated from filesystem (Author: Ada)"
        );
        assert_eq!(updated_from_filesystem(None), "Updated from filesystem");
    }
}
