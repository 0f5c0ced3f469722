//! Advisory file locks.
//!
//! `is_locked` probes whether an external process (an editor, a sync client)
//! holds a file, without ever waiting. `PassLock` serializes full sync passes
//! across processes sharing a project folder.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the pass lock file inside a repository's `.git` directory
pub const PASS_LOCK_FILE: &str = "wiki-sync.lock";

/// Whether another process holds an exclusive advisory lock on `path`.
///
/// Missing files are not locked. Any error other than lock contention is
/// logged and reported as "not locked".
pub fn is_locked(path: &Path) -> bool {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
        Err(e) => {
            warn!("Could not open {} to probe its lock: {}", path.display(), e);
            return false;
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            if let Err(e) = FileExt::unlock(&file) {
                debug!("Failed to release probe lock on {}: {}", path.display(), e);
            }
            false
        }
        Err(e) if is_contended(&e) => {
            debug!("{} is locked by another process", path.display());
            true
        }
        Err(e) => {
            warn!("Lock probe failed for {}: {}", path.display(), e);
            false
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Exclusive lock held for the duration of a sync pass.
///
/// Released when dropped.
pub struct PassLock {
    file: File,
    path: PathBuf,
}

impl PassLock {
    /// Block until the pass lock of the repository at `repo_path` is ours.
    pub fn acquire(repo_path: &Path) -> io::Result<Self> {
        let path = repo_path.join(".git").join(PASS_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        debug!("Acquired pass lock {}", path.display());
        Ok(Self { file, path })
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release pass lock {}: {}", self.path.display(), e);
        }
    }
}
