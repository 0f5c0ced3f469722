//! Debounced watcher over the sync base path.
//!
//! Uses notify-debouncer-mini. Events inside `.git`, hidden entries and the
//! orphan area are dropped before they reach the daemon.

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

use wiki_fs::ORPHANED_DIR;

/// Default debounce period.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// A change below the base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to the base path
    pub path: PathBuf,
    pub kind: FileEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// Created or modified
    Modified,
    Deleted,
}

pub struct FileWatcher {
    base_path: PathBuf,
    /// Must stay alive for events to flow
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Last seen mtime per path, to drop events that changed nothing
type MtimeCache = Arc<Mutex<HashMap<PathBuf, SystemTime>>>;

impl FileWatcher {
    pub fn new(base_path: PathBuf, debounce: Duration) -> Result<Self> {
        // FSEvents on macOS reports the resolved path (/private/var/...).
        let base_path = base_path.canonicalize().unwrap_or(base_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = base_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = process_event(&event.path, &root, &mtime_cache) {
                            if event_tx.send(file_event).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            }
        })?;

        debouncer.watcher().watch(&base_path, RecursiveMode::Recursive)?;

        Ok(Self {
            base_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Whether a change at `relative` could matter to a pass.
pub fn is_relevant(relative: &Path) -> bool {
    relative.components().all(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|n| !n.starts_with('.') && n != ORPHANED_DIR),
        _ => false,
    })
}

fn process_event(path: &Path, base_path: &Path, mtime_cache: &MtimeCache) -> Option<FileEvent> {
    let relative = path.strip_prefix(base_path).ok()?;
    if relative.as_os_str().is_empty() || !is_relevant(relative) {
        return None;
    }

    let kind = if path.exists() {
        FileEventKind::Modified
    } else {
        FileEventKind::Deleted
    };

    let key = relative.to_path_buf();
    let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
    match kind {
        FileEventKind::Modified => {
            if path.is_file() {
                if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
                    if cache.get(&key) == Some(&mtime) {
                        return None;
                    }
                    cache.insert(key.clone(), mtime);
                }
            }
        }
        FileEventKind::Deleted => {
            cache.remove(&key);
        }
    }

    debug!("File event: {:?} - {}", kind, key.display());
    Some(FileEvent { path: key, kind })
}
