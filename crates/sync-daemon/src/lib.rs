//! sync-daemon library: exposes the daemon components for testing.
//!
//! A thin layer over sync-core: a JSON-file document store, a debounced
//! watcher over the base path, and the runner that turns file events into
//! per-project passes.

pub mod json_store;
pub mod runner;
pub mod watcher;

pub use json_store::JsonFileStore;
pub use runner::{DaemonStore, Runner};
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
