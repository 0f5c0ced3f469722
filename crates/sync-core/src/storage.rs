//! Where a project's page files live, and reading/writing them.
//!
//! A project folder is located under its parent's folder (or the base path
//! for root projects) by trying, in order:
//! 1. a child folder whose `.project` marker carries the project identifier
//!    (direct children first, then children of `_projects/`)
//! 2. a folder named after the identifier
//! 3. a folder named exactly like the display name
//! 4. a folder named like the sanitized display name
//!
//! When nothing matches, new folders are named after the display name.
//!
//! Page files are located through the fixed variant list of
//! [`wiki_fs::title_variants`]. Storage failures are logged and degrade to
//! "no file" or a no-op; they never propagate.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::model::ProjectNode;
use wiki_fs::{
    is_safe_component, sanitize_filename, title_to_file_name, title_variants,
    validate_relative_path, ProjectMarker, ATTACHMENTS_DIR, MARKDOWN_EXT, MARKER_FILE,
    ORPHANED_DIR, PROJECTS_DIR,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A page file read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub content: String,
    pub mtime: DateTime<Utc>,
}

/// How a project folder was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMatch {
    Marker,
    Identifier,
    Name,
    SanitizedName,
    /// Nothing on disk yet; the path is where a new folder goes
    New,
}

/// Filesystem access for one project.
#[derive(Debug, Clone)]
pub struct ProjectStorage {
    base_path: PathBuf,
    project_path: PathBuf,
    folder_match: FolderMatch,
}

impl ProjectStorage {
    pub fn new(base_path: &Path, project: &ProjectNode) -> Self {
        let (project_path, folder_match) = resolve_project_path(base_path, project);
        Self {
            base_path: base_path.to_path_buf(),
            project_path,
            folder_match,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn folder_match(&self) -> FolderMatch {
        self.folder_match
    }

    /// Create the project folder if needed.
    pub fn ensure_project_dir(&self) -> bool {
        match fs::create_dir_all(&self.project_path) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to create {}: {}", self.project_path.display(), e);
                false
            }
        }
    }

    pub fn file_exists(&self, title: &str) -> bool {
        self.resolve_existing_path(title).is_some()
    }

    /// Read the file backing `title`, if any variant exists.
    pub fn read(&self, title: &str) -> Option<StoredFile> {
        let path = self.resolve_existing_path(title)?;
        read_stored(&path)
    }

    /// Read a file given its path relative to the project folder.
    pub fn read_relative(&self, rel_path: &str) -> Option<StoredFile> {
        let path = match self.join_relative(rel_path) {
            Ok(path) => path,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };
        read_stored(&path)
    }

    /// Write `content` for `title`, onto the existing file if one of the
    /// naming variants is present, else onto the canonical path.
    ///
    /// Returns the path written, or `None` after logging a failure.
    pub fn write(&self, title: &str, content: &str) -> Option<PathBuf> {
        let path = self
            .resolve_existing_path(title)
            .unwrap_or_else(|| self.file_path(title));
        self.write_path(&path, content).then_some(path)
    }

    /// Write to an explicit path inside the project folder.
    pub fn write_path(&self, path: &Path, content: &str) -> bool {
        if let Err(e) = self.guard(path) {
            error!("Refusing to write: {}", e);
            return false;
        }
        if !self.ensure_project_dir() {
            return false;
        }
        match fs::write(path, content) {
            Ok(()) => {
                debug!("Wrote {}", path.display());
                true
            }
            Err(e) => {
                error!("Failed to write {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Canonical path for a new file.
    pub fn file_path(&self, title: &str) -> PathBuf {
        self.project_path.join(title_to_file_name(title))
    }

    /// First existing file among the naming variants of `title`.
    pub fn resolve_existing_path(&self, title: &str) -> Option<PathBuf> {
        let variants = title_variants(title);
        for variant in &variants {
            let path = self.project_path.join(format!("{}{}", variant, MARKDOWN_EXT));
            if path.is_file() {
                debug!("Resolved '{}' to {} (variant '{}')", title, path.display(), variant);
                return Some(path);
            }
        }
        debug!(
            "No file for '{}' in {} (tried {:?})",
            title,
            self.project_path.display(),
            variants
        );
        None
    }

    /// Path relative to the project folder, `/`-separated.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.project_path).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    /// Resolve a project-relative path, rejecting traversal.
    pub fn join_relative(&self, rel_path: &str) -> Result<PathBuf, StorageError> {
        let clean = validate_relative_path(rel_path).map_err(|e| StorageError::InvalidPath {
            path: rel_path.to_string(),
            reason: e.to_string(),
        })?;
        let path = self.project_path.join(clean);
        self.guard(&path)?;
        Ok(path)
    }

    /// Reject paths outside the configured base directory.
    pub fn guard(&self, path: &Path) -> Result<(), StorageError> {
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.base_path) {
            return Err(StorageError::InvalidPath {
                path: path.display().to_string(),
                reason: format!("outside of {}", self.base_path.display()),
            });
        }
        Ok(())
    }

    /// Top-level regular files of the project folder, hidden ones skipped.
    pub fn top_level_files(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.project_path) else {
            return Vec::new();
        };
        let mut files: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        files.sort();
        files
    }
}

fn read_stored(path: &Path) -> Option<StoredFile> {
    let result = fs::read_to_string(path).and_then(|content| {
        let mtime = fs::metadata(path)?.modified()?;
        Ok(StoredFile {
            path: path.to_path_buf(),
            content,
            mtime: DateTime::<Utc>::from(mtime),
        })
    });
    match result {
        Ok(file) => Some(file),
        Err(e) => {
            error!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Locate (or choose) the folder for `project`.
pub fn resolve_project_path(base_path: &Path, project: &ProjectNode) -> (PathBuf, FolderMatch) {
    let parent_dir = match project.parent.as_deref() {
        Some(parent) => resolve_project_path(base_path, parent).0,
        None => base_path.to_path_buf(),
    };

    if let Some((path, how)) = locate_project_folder(&parent_dir, project) {
        debug!(
            "Project '{}' resolved to {} ({:?})",
            project.identifier,
            path.display(),
            how
        );
        return (path, how);
    }

    let path = parent_dir.join(default_folder_name(project));
    debug!(
        "Project '{}' has no folder yet, using {}",
        project.identifier,
        path.display()
    );
    (path, FolderMatch::New)
}

/// Search `parent_dir` for an existing folder belonging to `project`.
pub fn locate_project_folder(
    parent_dir: &Path,
    project: &ProjectNode,
) -> Option<(PathBuf, FolderMatch)> {
    let containers = [parent_dir.to_path_buf(), parent_dir.join(PROJECTS_DIR)];

    for container in &containers {
        if let Some(path) = find_by_marker(container, &project.identifier) {
            return Some((path, FolderMatch::Marker));
        }
    }

    let candidates = [
        (project.identifier.clone(), FolderMatch::Identifier),
        (project.name.clone(), FolderMatch::Name),
        (sanitize_filename(&project.name), FolderMatch::SanitizedName),
    ];
    for container in &containers {
        for (name, how) in &candidates {
            if !is_safe_component(name) {
                continue;
            }
            let path = container.join(name);
            if !path.is_dir() {
                continue;
            }
            // A folder claimed by another project's marker is not ours
            if let Some(marker) = read_project_marker(&path) {
                if marker.id != project.identifier {
                    continue;
                }
            }
            return Some((path, *how));
        }
    }

    None
}

fn find_by_marker(dir: &Path, identifier: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            !name.starts_with('.')
                && name != ATTACHMENTS_DIR
                && name != ORPHANED_DIR
                && name != PROJECTS_DIR
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| read_project_marker(path).is_some_and(|m| m.id == identifier))
        .collect();
    matches.sort();
    if matches.len() > 1 {
        warn!(
            "Several folders in {} claim project '{}', using {}",
            dir.display(),
            identifier,
            matches[0].display()
        );
    }
    matches.into_iter().next()
}

/// Folder name for a project without one: the display name when it is a
/// usable path component, else its sanitized form, else the identifier.
pub fn default_folder_name(project: &ProjectNode) -> String {
    if is_safe_component(&project.name) && !project.name.starts_with('.') {
        return project.name.clone();
    }
    let sanitized = sanitize_filename(&project.name);
    if is_safe_component(&sanitized) {
        sanitized
    } else {
        project.identifier.clone()
    }
}

pub fn read_project_marker(folder: &Path) -> Option<ProjectMarker> {
    let path = folder.join(MARKER_FILE);
    let raw = fs::read_to_string(&path).ok()?;
    let marker = ProjectMarker::parse(&raw);
    if marker.is_none() {
        warn!("Ignoring unreadable marker {}", path.display());
    }
    marker
}

/// (Over)write the `.project` marker for `project` in `folder`, keeping the
/// creation time of an existing marker.
pub fn write_project_marker(folder: &Path, project: &ProjectNode) -> Result<(), StorageError> {
    let created = read_project_marker(folder)
        .map(|m| m.created)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| project.created_on.to_rfc3339());
    let marker = ProjectMarker::new(&project.identifier, &project.name, created);

    fs::create_dir_all(folder).map_err(|e| StorageError::io(folder, e))?;
    let path = folder.join(MARKER_FILE);
    if fs::read_to_string(&path).ok().as_deref() == Some(marker.to_file_contents().as_str()) {
        return Ok(());
    }
    fs::write(&path, marker.to_file_contents()).map_err(|e| StorageError::io(&path, e))?;
    info!("Wrote project marker in {}", folder.display());
    Ok(())
}
