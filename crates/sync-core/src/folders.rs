//! Folder classification: sub-folders of a project (or of the base path)
//! that no project claims, and the two ways of dealing with them.

use chrono::Local;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::{Actor, SyncContext};
use crate::engine::SyncEngine;
use crate::events::SyncEvent;
use crate::git::{GitBackend, GitError};
use crate::model::{NewProject, ProjectNode};
use crate::storage::{read_project_marker, write_project_marker, StorageError};
use crate::store::{DocumentStore, StoreError};
use wiki_fs::{project_slug, sanitize_filename, ORPHANED_DIR, PROJECTS_DIR, RESERVED_DIRS};

pub const QUARANTINE_INFO_FILE: &str = "QUARANTINE_INFO.txt";

#[derive(Debug, Error)]
pub enum FolderError {
    #[error("Not a folder: {0}")]
    NotAFolder(PathBuf),

    #[error("Folder is outside of the sync base path: {0}")]
    OutsideBase(PathBuf),

    #[error("Folder name cannot become a project identifier: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FolderError>;

/// A folder no project claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignedFolder {
    pub path: PathBuf,
    pub name: String,
    /// Project whose folder contains this one; `None` at the base path
    pub parent_project: Option<String>,
    pub depth: usize,
    /// Carries a `.project` marker naming an unknown project
    pub has_marker: bool,
}

fn claims(project: &ProjectNode, name: &str, marker_id: Option<&str>) -> bool {
    if let Some(id) = marker_id {
        return id == project.identifier;
    }
    name == project.identifier
        || project_slug(name) == project.identifier
        || name == project.name
        || name == sanitize_filename(&project.name)
}

impl SyncEngine {
    /// Unassigned direct sub-folders of `project`'s folder, or of the base
    /// path when `project` is `None`, including those under `_projects/`.
    pub fn scan_unassigned_folders<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        project: Option<&ProjectNode>,
    ) -> Result<Vec<UnassignedFolder>> {
        let (dir, children, depth) = match project {
            Some(project) => (
                self.storage(project).project_path().to_path_buf(),
                store.child_projects(&project.identifier)?,
                project.depth() + 1,
            ),
            None => (self.config().base_path.clone(), store.root_projects()?, 0),
        };

        if !dir.is_dir() {
            debug!("{} does not exist yet, nothing to scan", dir.display());
            return Ok(Vec::new());
        }

        // Nested project folders may also sit in the `_projects/` container
        let entries = [dir.clone(), dir.join(PROJECTS_DIR)]
            .into_iter()
            .filter_map(|container| fs::read_dir(container).ok())
            .flat_map(|entries| entries.flatten());

        let mut unassigned = Vec::new();
        for entry in entries {
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || RESERVED_DIRS.contains(&name.as_str()) || !path.is_dir() {
                continue;
            }

            let marker_id = read_project_marker(&path).map(|m| m.id);
            if children
                .iter()
                .any(|child| claims(child, &name, marker_id.as_deref()))
            {
                continue;
            }

            debug!("Unassigned folder {}", path.display());
            unassigned.push(UnassignedFolder {
                path,
                name,
                parent_project: project.map(|p| p.identifier.clone()),
                depth,
                has_marker: marker_id.is_some(),
            });
        }
        unassigned.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(unassigned)
    }

    /// Unassigned folders at the base path and under every project.
    pub fn scan_all_folders<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Vec<UnassignedFolder>> {
        let mut found = self.scan_unassigned_folders(store, None)?;
        let mut pending = store.root_projects()?;
        while let Some(project) = pending.pop() {
            found.extend(self.scan_unassigned_folders(store, Some(&project))?);
            pending.extend(store.child_projects(&project.identifier)?);
        }
        Ok(found)
    }

    /// Turn a folder into a project: create the record, write the marker,
    /// initialize its repository and commit what is already there.
    pub fn adopt_folder<S: DocumentStore + ?Sized>(
        &self,
        store: &S,
        ctx: &SyncContext,
        folder: &Path,
        parent: Option<&ProjectNode>,
    ) -> Result<ProjectNode> {
        let folder = self.checked_folder(folder)?;
        let name = folder
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| FolderError::NotAFolder(folder.clone()))?;
        let identifier = project_slug(&name);
        if identifier.trim_matches('-').is_empty() {
            return Err(FolderError::InvalidName(name));
        }

        let project = store.create_project(
            ctx,
            NewProject {
                identifier,
                name,
                parent: parent.map(|p| p.identifier.clone()),
                sync_enabled: true,
            },
        )?;
        write_project_marker(&folder, &project)?;

        let git = GitBackend::open(&folder, &self.config().git_identity)?;
        git.stage_all()?;
        let message = format!("Adopted folder as project {}", project.identifier);
        git.commit_staged(ctx.actor(), &message)?;

        info!("Adopted {} as project '{}'", folder.display(), project.identifier);
        Ok(project)
    }

    /// Move a folder into `_orphaned/<timestamp>_<name>` next to it and leave
    /// a manifest recording where it came from.
    pub fn quarantine_folder(
        &self,
        folder: &Path,
        actor: &Actor,
        project: Option<&ProjectNode>,
    ) -> Result<PathBuf> {
        let folder = self.checked_folder(folder)?;
        let name = folder
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| FolderError::NotAFolder(folder.clone()))?;
        let holding = folder
            .parent()
            .map(|p| p.join(ORPHANED_DIR))
            .ok_or_else(|| FolderError::OutsideBase(folder.clone()))?;
        fs::create_dir_all(&holding)?;

        let now = Local::now();
        let target = free_target(&holding, &format!("{}_{}", now.format("%Y-%m-%d_%H%M%S"), name));
        fs::rename(&folder, &target)?;

        let project_line = match project {
            Some(p) => format!("{} ({})", p.name, p.identifier),
            None => "(none)".to_string(),
        };
        let manifest = format!(
            "QUARANTINED FOLDER\n\
             ==================\n\
             \n\
             Original Path: {}\n\
             Folder Name: {}\n\
             Quarantined: {}\n\
             User: {}\n\
             Project: {}\n\
             \n\
             This folder was moved to quarantine because it was not recognized\n\
             as a subproject or wiki page directory.\n",
            folder.display(),
            name,
            now.format("%Y-%m-%d %H:%M:%S %z"),
            actor.login,
            project_line
        );
        fs::write(target.join(QUARANTINE_INFO_FILE), manifest)?;

        info!("Quarantined {} -> {}", folder.display(), target.display());
        self.events().emit(SyncEvent::FolderQuarantined {
            from: folder.display().to_string(),
            to: target.display().to_string(),
        });
        Ok(target)
    }

    /// The folder, required to exist below the base path.
    fn checked_folder(&self, folder: &Path) -> Result<PathBuf> {
        if !folder.is_dir() {
            return Err(FolderError::NotAFolder(folder.to_path_buf()));
        }
        let base = self
            .config()
            .base_path
            .canonicalize()
            .map_err(|_| FolderError::OutsideBase(folder.to_path_buf()))?;
        let folder = folder.canonicalize()?;
        if folder == base || !folder.starts_with(&base) {
            return Err(FolderError::OutsideBase(folder));
        }
        Ok(folder)
    }
}

/// `dir/name`, or `dir/name_N` for the first free N.
pub(crate) fn free_target(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}", name, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
