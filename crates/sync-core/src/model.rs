//! Records exchanged with the document store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of a document. Never changes, even across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A wiki page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    /// Identifier of the owning project
    pub project: String,
    pub title: String,
    /// Parent page, if any. Only a reference; the parent is not owned.
    pub parent_id: Option<DocumentId>,
    pub text: String,
    /// Bumped on every content change
    pub version: u32,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// A project: one folder, one repository, many documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectNode {
    pub identifier: String,
    pub name: String,
    /// Full ancestor chain, resolved by the store
    pub parent: Option<Box<ProjectNode>>,
    pub sync_enabled: bool,
    pub created_on: DateTime<Utc>,
}

impl ProjectNode {
    pub fn parent_identifier(&self) -> Option<&str> {
        self.parent.as_deref().map(|p| p.identifier.as_str())
    }

    /// Nesting depth, 0 for a root project.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_deref();
        while let Some(node) = current {
            depth += 1;
            current = node.parent.as_deref();
        }
        depth
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub title: String,
    pub text: String,
    pub parent_id: Option<DocumentId>,
    pub created_on: Option<DateTime<Utc>>,
    pub updated_on: Option<DateTime<Utc>>,
    /// Version comment
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub identifier: String,
    pub name: String,
    pub parent: Option<String>,
    pub sync_enabled: bool,
}

/// A binary file attached to a page or project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub filename: String,
    /// Where the store keeps the bytes
    pub disk_path: PathBuf,
}
