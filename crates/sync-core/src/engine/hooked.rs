//! A `DocumentStore` wrapper that fires the write-back hooks.

use std::path::Path;
use std::sync::Arc;
use tracing::error;

use super::{HookOutcome, SyncEngine};
use crate::context::SyncContext;
use crate::model::{Attachment, Document, DocumentId, NewDocument, NewProject, ProjectNode};
use crate::store::{DocumentStore, Result};

/// Wraps a store so every mutation is mirrored to disk.
///
/// Hook failures are logged and never fail the mutation itself.
pub struct HookedStore<S> {
    inner: S,
    engine: Arc<SyncEngine>,
}

impl<S: DocumentStore> HookedStore<S> {
    pub fn new(inner: S, engine: Arc<SyncEngine>) -> Self {
        Self { inner, engine }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    fn report(&self, what: &str, result: super::Result<HookOutcome>) {
        if let Err(e) = result {
            error!("Write-back after {} failed: {}", what, e);
        }
    }

    fn saved(&self, ctx: &SyncContext, doc: &Document) {
        let result = self.engine.on_document_saved(&self.inner, ctx, doc);
        self.report("save", result);
    }
}

impl<S: DocumentStore> DocumentStore for HookedStore<S> {
    fn project(&self, identifier: &str) -> Result<Option<ProjectNode>> {
        self.inner.project(identifier)
    }

    fn root_projects(&self) -> Result<Vec<ProjectNode>> {
        self.inner.root_projects()
    }

    fn child_projects(&self, identifier: &str) -> Result<Vec<ProjectNode>> {
        self.inner.child_projects(identifier)
    }

    fn create_project(&self, ctx: &SyncContext, project: NewProject) -> Result<ProjectNode> {
        self.inner.create_project(ctx, project)
    }

    fn rename_project(
        &self,
        ctx: &SyncContext,
        identifier: &str,
        name: &str,
    ) -> Result<ProjectNode> {
        let before = self.inner.project(identifier)?;
        let renamed = self.inner.rename_project(ctx, identifier, name)?;
        if let Some(before) = before {
            let result = self
                .engine
                .on_project_renamed(&self.inner, ctx, &renamed, &before.identifier, &before.name);
            self.report("project rename", result);
        }
        Ok(renamed)
    }

    fn documents(&self, project: &str) -> Result<Vec<Document>> {
        self.inner.documents(project)
    }

    fn document(&self, project: &str, id: DocumentId) -> Result<Option<Document>> {
        self.inner.document(project, id)
    }

    fn document_by_title(&self, project: &str, title: &str) -> Result<Option<Document>> {
        self.inner.document_by_title(project, title)
    }

    fn create_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        doc: NewDocument,
    ) -> Result<Document> {
        let created = self.inner.create_document(ctx, project, doc)?;
        self.saved(ctx, &created);
        Ok(created)
    }

    fn update_content(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        text: &str,
        comment: &str,
    ) -> Result<Document> {
        let updated = self.inner.update_content(ctx, project, id, text, comment)?;
        self.saved(ctx, &updated);
        Ok(updated)
    }

    fn rename_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        title: &str,
    ) -> Result<Document> {
        let before = self.inner.document(project, id)?;
        let renamed = self.inner.rename_document(ctx, project, id, title)?;
        if let Some(before) = before.filter(|b| b.title != renamed.title) {
            let result = self.engine.on_document_renamed(&self.inner, ctx, &renamed, &before.title);
            self.report("rename", result);
        }
        Ok(renamed)
    }

    fn set_parent(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        parent: Option<DocumentId>,
    ) -> Result<Document> {
        let updated = self.inner.set_parent(ctx, project, id, parent)?;
        self.saved(ctx, &updated);
        Ok(updated)
    }

    fn delete_document(&self, ctx: &SyncContext, project: &str, id: DocumentId) -> Result<()> {
        if let Some(doc) = self.inner.document(project, id)? {
            let result = self.engine.on_document_deleted(&self.inner, ctx, &doc);
            self.report("delete", result);
        }
        self.inner.delete_document(ctx, project, id)
    }

    fn attachments(&self, project: &str, id: DocumentId) -> Result<Vec<Attachment>> {
        self.inner.attachments(project, id)
    }

    fn attach_file(
        &self,
        ctx: &SyncContext,
        project: &str,
        filename: &str,
        source: &Path,
    ) -> Result<Attachment> {
        self.inner.attach_file(ctx, project, filename, source)
    }
}
