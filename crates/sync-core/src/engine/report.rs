//! Results handed back to the caller of a pass or a batch operation.

use serde::Serialize;

/// What kind of record a pending file could become.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PendingKind {
    Wiki,
    Attachment,
}

/// Actions an operator can take on a pending file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Remediation {
    AddFrontmatter,
    AttachAsFile,
    Discard,
}

/// A file found on disk that was not imported automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFile {
    /// Path relative to the project folder
    pub file: String,
    pub kind: PendingKind,
    pub reasons: Vec<String>,
    pub remediations: Vec<Remediation>,
}

impl PendingFile {
    pub fn wiki(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            kind: PendingKind::Wiki,
            reasons: vec![reason.into()],
            remediations: vec![
                Remediation::AddFrontmatter,
                Remediation::AttachAsFile,
                Remediation::Discard,
            ],
        }
    }

    pub fn attachment(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            kind: PendingKind::Attachment,
            reasons: vec!["not a wiki page".to_string()],
            remediations: vec![Remediation::AttachAsFile, Remediation::Discard],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenamedDocument {
    pub old_title: String,
    pub new_title: String,
}

/// Both sides changed and the policy forbids picking one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub title: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRename {
    pub project: String,
    pub old_name: String,
    pub new_name: String,
}

/// Report from one filesystem → store pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// The pass did not run because sync is off globally or for the project
    pub disabled: bool,
    /// Titles of documents created from files
    pub imported: Vec<String>,
    pub renamed: Vec<RenamedDocument>,
    /// Titles of documents whose content or parent was updated from disk
    pub updated: Vec<String>,
    /// Files deleted on disk; the documents are kept
    pub deleted_on_disk: Vec<String>,
    /// Titles whose files were rewritten from the store
    pub restored: Vec<String>,
    pub pending: Vec<PendingFile>,
    /// Files held open by another process
    pub locked: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub project_renames: Vec<ProjectRename>,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Default::default()
        }
    }

    /// Check if the pass changed any record
    pub fn has_changes(&self) -> bool {
        !self.imported.is_empty()
            || !self.renamed.is_empty()
            || !self.updated.is_empty()
            || !self.project_renames.is_empty()
    }

    /// Number of skipped files (pending, locked, conflicting)
    pub fn skipped(&self) -> usize {
        self.pending.len() + self.locked.len() + self.conflicts.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub file: String,
    pub error: String,
}

/// Result of a batch remediation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixReport {
    pub fixed: Vec<String>,
    pub failed: Vec<FailedFile>,
}

impl FixReport {
    pub fn fail(&mut self, file: impl Into<String>, error: impl Into<String>) {
        self.failed.push(FailedFile {
            file: file.into(),
            error: error.into(),
        });
    }
}
