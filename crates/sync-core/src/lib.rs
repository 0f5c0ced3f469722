//! sync-core: keeps a wiki document store and per-project Markdown folders in
//! step, each folder under its own local Git repository.
//!
//! This crate provides:
//! - The `DocumentStore` adapter trait (plus an in-memory implementation)
//! - Path resolution and guarded file access for project folders
//! - A Git backend that commits every write and classifies working-tree changes
//! - `SyncEngine`: the filesystem → store pass, the write-back hooks, folder
//!   classification and pending-file remediation

pub mod changes;
pub mod config;
pub mod context;
pub mod engine;
pub mod events;
pub mod folders;
pub mod git;
pub mod lock;
pub mod model;
mod pending;
pub mod storage;
pub mod store;

pub use changes::ChangeSet;
pub use config::{ConfigError, ConflictStrategy, GitIdentity, SyncConfig};
pub use context::{Actor, HookSuppression, SyncContext};
pub use engine::{
    EngineError, FileStatus, FixReport, HookOutcome, HookedStore, PendingFile, PendingKind,
    SyncEngine, SyncReport,
};
pub use events::{EventBus, Subscription, SyncEvent};
pub use folders::{FolderError, UnassignedFolder};
pub use git::{CommitOutcome, GitBackend, GitError};
pub use lock::{is_locked, PassLock};
pub use model::{Attachment, Document, DocumentId, NewDocument, NewProject, ProjectNode};
pub use storage::{FolderMatch, ProjectStorage, StoredFile};
pub use store::{DocumentStore, InMemoryStore, StoreError, StoreSnapshot};
