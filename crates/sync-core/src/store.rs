//! DocumentStore trait abstraction for the database of record.
//!
//! Implementations:
//! - `InMemoryStore` - For testing, and as the state behind file-backed stores
//! - `JsonFileStore` (in sync-daemon) - Persists an `InMemoryStore` snapshot
//! - `HookedStore` (in engine) - Wraps any store and fires write-back hooks
//!
//! Every mutation receives the request's [`SyncContext`] so adapters can tell
//! a user edit from a sync-initiated one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

use crate::context::SyncContext;
use crate::model::{Attachment, Document, DocumentId, NewDocument, NewProject, ProjectNode};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Document {id} not found in project {project}")]
    DocumentNotFound { project: String, id: DocumentId },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Access to projects and documents held by the host system.
pub trait DocumentStore: Send + Sync {
    /// Look up a project with its full ancestor chain.
    fn project(&self, identifier: &str) -> Result<Option<ProjectNode>>;

    fn root_projects(&self) -> Result<Vec<ProjectNode>>;

    /// Direct children of a project.
    fn child_projects(&self, identifier: &str) -> Result<Vec<ProjectNode>>;

    fn create_project(&self, ctx: &SyncContext, project: NewProject) -> Result<ProjectNode>;

    /// Change a project's display name.
    fn rename_project(
        &self,
        ctx: &SyncContext,
        identifier: &str,
        name: &str,
    ) -> Result<ProjectNode>;

    fn documents(&self, project: &str) -> Result<Vec<Document>>;

    fn document(&self, project: &str, id: DocumentId) -> Result<Option<Document>>;

    fn document_by_title(&self, project: &str, title: &str) -> Result<Option<Document>>;

    fn create_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        doc: NewDocument,
    ) -> Result<Document>;

    /// Replace a document's body, bumping its version.
    fn update_content(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        text: &str,
        comment: &str,
    ) -> Result<Document>;

    fn rename_document(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        title: &str,
    ) -> Result<Document>;

    fn set_parent(
        &self,
        ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        parent: Option<DocumentId>,
    ) -> Result<Document>;

    fn delete_document(&self, ctx: &SyncContext, project: &str, id: DocumentId) -> Result<()>;

    /// Attachments of a document.
    fn attachments(&self, project: &str, id: DocumentId) -> Result<Vec<Attachment>>;

    /// Register a file on disk as a project-level attachment.
    fn attach_file(
        &self,
        ctx: &SyncContext,
        project: &str,
        filename: &str,
        source: &Path,
    ) -> Result<Attachment>;
}

/// Stored project row; the ancestor chain is rebuilt on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub identifier: String,
    pub name: String,
    pub parent: Option<String>,
    pub sync_enabled: bool,
    pub created_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub project: String,
    pub document: Option<DocumentId>,
    #[serde(flatten)]
    pub attachment: Attachment,
}

/// Serializable contents of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub projects: Vec<ProjectRecord>,
    pub documents: Vec<Document>,
    #[serde(default)]
    pub attachments: Vec<AttachmentRecord>,
    #[serde(default)]
    pub next_id: u64,
}

impl StoreSnapshot {
    fn project_node(&self, identifier: &str) -> Option<ProjectNode> {
        let record = self.projects.iter().find(|p| p.identifier == identifier)?;
        let parent = record
            .parent
            .as_deref()
            .filter(|parent| *parent != identifier)
            .and_then(|parent| self.project_node(parent))
            .map(Box::new);
        Some(ProjectNode {
            identifier: record.identifier.clone(),
            name: record.name.clone(),
            parent,
            sync_enabled: record.sync_enabled,
            created_on: record.created_on,
        })
    }

    fn document_mut(&mut self, project: &str, id: DocumentId) -> Result<&mut Document> {
        self.documents
            .iter_mut()
            .find(|d| d.id == id && d.project == project)
            .ok_or_else(|| StoreError::DocumentNotFound {
                project: project.to_string(),
                id,
            })
    }

    fn title_taken(&self, project: &str, title: &str, except: Option<DocumentId>) -> bool {
        self.documents
            .iter()
            .any(|d| d.project == project && d.title == title && Some(d.id) != except)
    }

    fn allocate_id(&mut self) -> DocumentId {
        let max = self.documents.iter().map(|d| d.id.0).max().unwrap_or(0);
        self.next_id = self.next_id.max(max) + 1;
        DocumentId(self.next_id)
    }
}

/// In-memory store for testing
pub struct InMemoryStore {
    state: RwLock<StoreSnapshot>,
    /// Number of successful mutations, for asserting on hook behavior
    mutations: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::from_snapshot(StoreSnapshot::default())
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            mutations: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Seed a project directly, bypassing hooks.
    pub fn insert_project(
        &self,
        identifier: &str,
        name: &str,
        parent: Option<&str>,
    ) -> ProjectNode {
        let mut state = self.write();
        let record = ProjectRecord {
            identifier: identifier.to_string(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
            sync_enabled: true,
            created_on: Utc::now(),
        };
        state.projects.retain(|p| p.identifier != identifier);
        state.projects.push(record.clone());

        ProjectNode {
            identifier: record.identifier,
            name: record.name,
            parent: parent.and_then(|p| state.project_node(p)).map(Box::new),
            sync_enabled: record.sync_enabled,
            created_on: record.created_on,
        }
    }

    /// Seed a document directly, bypassing hooks.
    pub fn insert_document(
        &self,
        project: &str,
        title: &str,
        text: &str,
        parent_id: Option<DocumentId>,
    ) -> Document {
        let mut state = self.write();
        let now = Utc::now();
        let doc = Document {
            id: state.allocate_id(),
            project: project.to_string(),
            title: title.to_string(),
            parent_id,
            text: text.to_string(),
            version: 1,
            created_on: now,
            updated_on: now,
        };
        state.documents.push(doc.clone());
        doc
    }

    /// Backdate or postdate a document's last update.
    pub fn set_updated_on(&self, id: DocumentId, updated_on: DateTime<Utc>) {
        let mut state = self.write();
        if let Some(doc) = state.documents.iter_mut().find(|d| d.id == id) {
            doc.updated_on = updated_on;
        }
    }

    pub fn set_sync_enabled(&self, identifier: &str, enabled: bool) {
        let mut state = self.write();
        if let Some(project) = state.projects.iter_mut().find(|p| p.identifier == identifier) {
            project.sync_enabled = enabled;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreSnapshot> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreSnapshot> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut StoreSnapshot) -> Result<T>) -> Result<T> {
        let result = f(&mut self.write());
        if result.is_ok() {
            self.mutations.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

impl DocumentStore for InMemoryStore {
    fn project(&self, identifier: &str) -> Result<Option<ProjectNode>> {
        Ok(self.read().project_node(identifier))
    }

    fn root_projects(&self) -> Result<Vec<ProjectNode>> {
        let state = self.read();
        Ok(state
            .projects
            .iter()
            .filter(|p| p.parent.is_none())
            .filter_map(|p| state.project_node(&p.identifier))
            .collect())
    }

    fn child_projects(&self, identifier: &str) -> Result<Vec<ProjectNode>> {
        let state = self.read();
        Ok(state
            .projects
            .iter()
            .filter(|p| p.parent.as_deref() == Some(identifier) && p.identifier != identifier)
            .filter_map(|p| state.project_node(&p.identifier))
            .collect())
    }

    fn create_project(&self, _ctx: &SyncContext, project: NewProject) -> Result<ProjectNode> {
        self.mutate(|state| {
            if state.projects.iter().any(|p| p.identifier == project.identifier) {
                return Err(StoreError::Conflict(format!(
                    "project identifier '{}' is already taken",
                    project.identifier
                )));
            }
            if let Some(parent) = &project.parent {
                if !state.projects.iter().any(|p| &p.identifier == parent) {
                    return Err(StoreError::ProjectNotFound(parent.clone()));
                }
            }
            state.projects.push(ProjectRecord {
                identifier: project.identifier.clone(),
                name: project.name,
                parent: project.parent,
                sync_enabled: project.sync_enabled,
                created_on: Utc::now(),
            });
            state
                .project_node(&project.identifier)
                .ok_or(StoreError::ProjectNotFound(project.identifier))
        })
    }

    fn rename_project(
        &self,
        _ctx: &SyncContext,
        identifier: &str,
        name: &str,
    ) -> Result<ProjectNode> {
        self.mutate(|state| {
            let record = state
                .projects
                .iter_mut()
                .find(|p| p.identifier == identifier)
                .ok_or_else(|| StoreError::ProjectNotFound(identifier.to_string()))?;
            record.name = name.to_string();
            state
                .project_node(identifier)
                .ok_or_else(|| StoreError::ProjectNotFound(identifier.to_string()))
        })
    }

    fn documents(&self, project: &str) -> Result<Vec<Document>> {
        Ok(self
            .read()
            .documents
            .iter()
            .filter(|d| d.project == project)
            .cloned()
            .collect())
    }

    fn document(&self, project: &str, id: DocumentId) -> Result<Option<Document>> {
        Ok(self
            .read()
            .documents
            .iter()
            .find(|d| d.id == id && d.project == project)
            .cloned())
    }

    fn document_by_title(&self, project: &str, title: &str) -> Result<Option<Document>> {
        Ok(self
            .read()
            .documents
            .iter()
            .find(|d| d.project == project && d.title == title)
            .cloned())
    }

    fn create_document(
        &self,
        _ctx: &SyncContext,
        project: &str,
        doc: NewDocument,
    ) -> Result<Document> {
        self.mutate(|state| {
            if !state.projects.iter().any(|p| p.identifier == project) {
                return Err(StoreError::ProjectNotFound(project.to_string()));
            }
            if state.title_taken(project, &doc.title, None) {
                return Err(StoreError::Conflict(format!(
                    "a page titled '{}' already exists",
                    doc.title
                )));
            }
            let now = Utc::now();
            let created = Document {
                id: state.allocate_id(),
                project: project.to_string(),
                title: doc.title,
                parent_id: doc.parent_id,
                text: doc.text,
                version: 1,
                created_on: doc.created_on.unwrap_or(now),
                updated_on: doc.updated_on.unwrap_or(now),
            };
            state.documents.push(created.clone());
            Ok(created)
        })
    }

    fn update_content(
        &self,
        _ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        text: &str,
        _comment: &str,
    ) -> Result<Document> {
        self.mutate(|state| {
            let doc = state.document_mut(project, id)?;
            doc.text = text.to_string();
            doc.version += 1;
            doc.updated_on = Utc::now();
            Ok(doc.clone())
        })
    }

    fn rename_document(
        &self,
        _ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        title: &str,
    ) -> Result<Document> {
        self.mutate(|state| {
            if state.title_taken(project, title, Some(id)) {
                return Err(StoreError::Conflict(format!(
                    "a page titled '{}' already exists",
                    title
                )));
            }
            let doc = state.document_mut(project, id)?;
            doc.title = title.to_string();
            Ok(doc.clone())
        })
    }

    fn set_parent(
        &self,
        _ctx: &SyncContext,
        project: &str,
        id: DocumentId,
        parent: Option<DocumentId>,
    ) -> Result<Document> {
        self.mutate(|state| {
            if parent == Some(id) {
                return Err(StoreError::Conflict("a page cannot be its own parent".into()));
            }
            let doc = state.document_mut(project, id)?;
            doc.parent_id = parent;
            Ok(doc.clone())
        })
    }

    fn delete_document(&self, _ctx: &SyncContext, project: &str, id: DocumentId) -> Result<()> {
        self.mutate(|state| {
            state.document_mut(project, id)?;
            state.documents.retain(|d| d.id != id);
            for doc in state.documents.iter_mut().filter(|d| d.parent_id == Some(id)) {
                doc.parent_id = None;
            }
            state.attachments.retain(|a| a.document != Some(id));
            Ok(())
        })
    }

    fn attachments(&self, project: &str, id: DocumentId) -> Result<Vec<Attachment>> {
        Ok(self
            .read()
            .attachments
            .iter()
            .filter(|a| a.project == project && a.document == Some(id))
            .map(|a| a.attachment.clone())
            .collect())
    }

    fn attach_file(
        &self,
        _ctx: &SyncContext,
        project: &str,
        filename: &str,
        source: &Path,
    ) -> Result<Attachment> {
        self.mutate(|state| {
            if !state.projects.iter().any(|p| p.identifier == project) {
                return Err(StoreError::ProjectNotFound(project.to_string()));
            }
            let attachment = Attachment {
                filename: filename.to_string(),
                disk_path: source.to_path_buf(),
            };
            state.attachments.push(AttachmentRecord {
                project: project.to_string(),
                document: None,
                attachment: attachment.clone(),
            });
            Ok(attachment)
        })
    }
}

impl InMemoryStore {
    /// Attach a file to a document directly, bypassing hooks.
    pub fn insert_attachment(
        &self,
        project: &str,
        id: DocumentId,
        filename: &str,
        disk_path: &Path,
    ) {
        self.write().attachments.push(AttachmentRecord {
            project: project.to_string(),
            document: Some(id),
            attachment: Attachment {
                filename: filename.to_string(),
                disk_path: disk_path.to_path_buf(),
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Actor;

    fn ctx() -> SyncContext {
        SyncContext::new(Actor::new("Test", "test@example.com"))
    }

    #[test]
    fn project_chain_is_resolved() {
        let store = InMemoryStore::new();
        store.insert_project("root", "Root", None);
        store.insert_project("child", "Child", Some("root"));
        store.insert_project("leaf", "Leaf", Some("child"));

        let leaf = store.project("leaf").unwrap().unwrap();
        assert_eq!(leaf.depth(), 2);
        assert_eq!(leaf.parent_identifier(), Some("child"));
        assert_eq!(store.root_projects().unwrap().len(), 1);
        assert_eq!(store.child_projects("root").unwrap()[0].identifier, "child");
    }

    #[test]
    fn update_content_bumps_version_once() {
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        let doc = store.insert_document("p", "Home", "old", None);

        let updated = store
            .update_content(&ctx(), "p", doc.id, "new", "edit")
            .unwrap();
        assert_eq!(updated.version, doc.version + 1);
        assert_eq!(updated.text, "new");
        assert_eq!(store.mutation_count(), 1);
    }

    #[test]
    fn titles_are_unique_per_project() {
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        store.insert_document("p", "Home", "", None);
        let other = store.insert_document("p", "Other", "", None);

        let dup = NewDocument {
            title: "Home".into(),
            ..Default::default()
        };
        assert!(matches!(
            store.create_document(&ctx(), "p", dup),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.rename_document(&ctx(), "p", other.id, "Home"),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.mutation_count(), 0);
    }

    #[test]
    fn ids_are_never_reused() {
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        let first = store.insert_document("p", "A", "", None);
        store.delete_document(&ctx(), "p", first.id).unwrap();
        let second = store.insert_document("p", "B", "", None);
        assert!(second.id > first.id);
    }

    #[test]
    fn deleting_a_parent_orphans_its_children() {
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        let parent = store.insert_document("p", "Parent", "", None);
        let child = store.insert_document("p", "Child", "", Some(parent.id));

        store.delete_document(&ctx(), "p", parent.id).unwrap();
        assert_eq!(store.document("p", child.id).unwrap().unwrap().parent_id, None);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let store = InMemoryStore::new();
        store.insert_project("p", "P", None);
        store.insert_document("p", "Home", "body", None);

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = InMemoryStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), store.snapshot());
    }
}
