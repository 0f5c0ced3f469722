//! Document store persisted as a single JSON file.
//!
//! The daemon has no database of its own, so it keeps projects, documents
//! and attachments in an `InMemoryStore` and writes its snapshot back after
//! every successful mutation.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use sync_core::model::{Attachment, Document, DocumentId, NewDocument, NewProject, ProjectNode};
use sync_core::store;
use sync_core::{DocumentStore, InMemoryStore, StoreError, StoreSnapshot, SyncContext};

pub struct JsonFileStore {
    path: PathBuf,
    inner: InMemoryStore,
    /// Serializes writes of the snapshot file
    save_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("reading store {}", path.display()))?;
            let snapshot: StoreSnapshot = serde_json::from_str(&contents)
                .with_context(|| format!("parsing store {}", path.display()))?;
            info!(
                "Loaded store {} ({} projects, {} documents)",
                path.display(),
                snapshot.projects.len(),
                snapshot.documents.len()
            );
            snapshot
        } else {
            info!("Starting empty store at {}", path.display());
            StoreSnapshot::default()
        };

        Ok(Self {
            path,
            inner: InMemoryStore::from_snapshot(snapshot),
            save_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.snapshot()
    }

    /// Write the snapshot to disk through a temp file and rename.
    pub fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replacing {}", self.path.display()))?;
        debug!("Saved store to {}", self.path.display());
        Ok(())
    }

    fn persisted<T>(&self, result: store::Result<T>) -> store::Result<T> {
        let value = result?;
        self.save().map_err(|e| StoreError::Backend(format!("{:#}", e)))?;
        Ok(value)
    }
}

impl DocumentStore for JsonFileStore {
    fn project(&self, identifier: &str) -> store::Result<Option<ProjectNode>> {
        self.inner.project(identifier)
    }

    fn root_projects(&self) -> store::Result<Vec<ProjectNode>> {
        self.inner.root_projects()
    }

    fn child_projects(&self, identifier: &str) -> store::Result<Vec<ProjectNode>> {
        self.inner.child_projects(identifier)
    }

    fn create_project(&self, ctx: &SyncContext, project: NewProject) -> store::Result<ProjectNode> {
        self.persisted(self.inner.create_project(ctx, project))
    }

    fn rename_project(
        &self,
        ctx: &SyncContext,
        identifier: &str,
        name: &str,
    ) -> store::Result<ProjectNode> {
        self.persisted(self.inner.rename_project(ctx, identifier, name))
    }

    fn documents(&self, project: &str) -> store::Result<Vec<Document>> {
        self.inner.documents(project)
    }

    fn document(&self, project: &str, id: DocumentId) -> store::Result<Option<Document>> {
        self.inner.document(project, id)
    }

    fn document_by_title(&self, project: &str, title: &str) -> store::Result<Option<Document>> {
        self.inner.document_by_title(project, title)
    }

    fn create_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        doc: NewDocument,
    ) -> store::Result<Document> {
        self.persisted(self.inner.create_document(ctx, project, doc))
    }

    fn update_content(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        text: &str,
        comment: &str,
    ) -> store::Result<Document> {
        self.persisted(self.inner.update_content(ctx, project, id, text, comment))
    }

    fn rename_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        title: &str,
    ) -> store::Result<Document> {
        self.persisted(self.inner.rename_document(ctx, project, id, title))
    }

    fn set_parent(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        parent: Option<DocumentId>,
    ) -> store::Result<Document> {
        self.persisted(self.inner.set_parent(ctx, project, id, parent))
    }

    fn delete_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
    ) -> store::Result<()> {
        self.persisted(self.inner.delete_document(ctx, project, id))
    }

    fn attachments(&self, project: &str, id: DocumentId) -> store::Result<Vec<Attachment>> {
        self.inner.attachments(project, id)
    }

    fn attach_file(
        &self,
        ctx: &SyncContext,
        project: &str,
        filename: &str,
        source: &Path,
    ) -> store::Result<Attachment> {
        self.persisted(self.inner.attach_file(ctx, project, filename, source))
    }
}
