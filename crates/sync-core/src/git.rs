//! Local Git repository per project folder.
//!
//! Every call shells out to the `git` binary with `-C <repo>` and captures
//! stdout, stderr and the exit status. A commit with nothing to record is a
//! success; any other non-zero exit becomes a [`GitError::CommandFailed`]
//! carrying the captured output.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

use crate::changes::ChangeSet;
use crate::config::GitIdentity;
use crate::context::Actor;
use wiki_fs::{sanitize_path, MARKDOWN_EXT, ORPHANED_DIR, PROJECTS_DIR};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: io::Error,
    },

    #[error("Git command failed: git {args} (exit {code:?})\nSTDOUT: {stdout}\nSTDERR: {stderr}")]
    CommandFailed {
        args: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to prepare repository at {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, GitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

const NOTHING_TO_COMMIT: &[&str] = &[
    "nothing to commit",
    "nothing added to commit",
    "no changes added to commit",
];

/// Repository-relative path of a page file, hierarchy separators preserved.
pub fn title_to_relative_path(title: &str) -> String {
    format!("{}{}", sanitize_path(title), MARKDOWN_EXT)
}

pub struct GitBackend {
    repo_path: PathBuf,
}

impl GitBackend {
    /// Open the repository at `repo_path`, creating the folder and running
    /// `git init` with a local committer identity when no `.git` exists.
    pub fn open(repo_path: &Path, identity: &GitIdentity) -> Result<Self> {
        let backend = Self {
            repo_path: repo_path.to_path_buf(),
        };

        if !repo_path.join(".git").exists() {
            fs::create_dir_all(repo_path).map_err(|source| GitError::Init {
                path: repo_path.to_path_buf(),
                source,
            })?;
            backend.run_git(&["init"])?;
            backend.run_git(&["config", "user.email", &identity.email])?;
            backend.run_git(&["config", "user.name", &identity.name])?;
            info!("Initialized repository at {}", repo_path.display());
        }

        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    /// Run git in the repository and return stdout.
    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        let joined = args.join(" ");
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|source| GitError::Spawn {
                args: joined.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        Err(GitError::CommandFailed {
            args: joined,
            code: output.status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Stage every change in the working tree, leaving nested project
    /// repositories alone.
    pub fn stage_all(&self) -> Result<()> {
        let excludes: Vec<String> = self
            .nested_repositories()
            .into_iter()
            .map(|rel| format!(":(exclude){}", rel))
            .collect();

        let mut args = vec!["add", "-A", "--", "."];
        args.extend(excludes.iter().map(String::as_str));
        self.run_git(&args)?;
        Ok(())
    }

    /// Commit whatever is staged.
    pub fn commit_staged(&self, author: &Actor, message: &str) -> Result<CommitOutcome> {
        let author = author.git_author();
        match self.run_git(&["commit", "-m", message, "--author", &author]) {
            Ok(_) => {
                debug!("Committed in {}: {}", self.repo_path.display(), message);
                Ok(CommitOutcome::Committed)
            }
            Err(GitError::CommandFailed { stdout, stderr, .. })
                if NOTHING_TO_COMMIT
                    .iter()
                    .any(|needle| stdout.contains(needle) || stderr.contains(needle)) =>
            {
                debug!("Nothing to commit in {}", self.repo_path.display());
                Ok(CommitOutcome::NothingToCommit)
            }
            Err(e) => Err(e),
        }
    }

    /// Stage and commit the page file for `title`.
    pub fn commit(&self, title: &str, author: &Actor, message: &str) -> Result<CommitOutcome> {
        self.commit_path(&title_to_relative_path(title), author, message)
    }

    /// Stage and commit one repository-relative path.
    pub fn commit_path(
        &self,
        rel_path: &str,
        author: &Actor,
        message: &str,
    ) -> Result<CommitOutcome> {
        self.commit_paths(&[rel_path], author, message)
    }

    /// Stage several repository-relative paths and commit them together.
    pub fn commit_paths(
        &self,
        rel_paths: &[&str],
        author: &Actor,
        message: &str,
    ) -> Result<CommitOutcome> {
        let mut args = vec!["add", "-A", "--"];
        args.extend_from_slice(rel_paths);
        self.run_git(&args)?;
        self.commit_staged(author, message)
    }

    /// Move the page file for `old_title` to the one for `new_title` and commit.
    pub fn rename(
        &self,
        old_title: &str,
        new_title: &str,
        author: &Actor,
        message: &str,
    ) -> Result<()> {
        self.rename_path(
            &title_to_relative_path(old_title),
            &title_to_relative_path(new_title),
            author,
            message,
        )
    }

    pub fn rename_path(
        &self,
        old_rel: &str,
        new_rel: &str,
        author: &Actor,
        message: &str,
    ) -> Result<()> {
        self.run_git(&["mv", "--", old_rel, new_rel])?;
        self.commit_staged(author, message)?;
        info!("Renamed {} to {} in {}", old_rel, new_rel, self.repo_path.display());
        Ok(())
    }

    /// Remove the page file for `title` and commit.
    pub fn delete(&self, title: &str, author: &Actor, message: &str) -> Result<()> {
        self.delete_path(&title_to_relative_path(title), author, message)
    }

    pub fn delete_path(&self, rel_path: &str, author: &Actor, message: &str) -> Result<()> {
        self.run_git(&["rm", "--", rel_path])?;
        self.commit_staged(author, message)?;
        info!("Deleted {} from {}", rel_path, self.repo_path.display());
        Ok(())
    }

    /// Classify the working tree against HEAD.
    ///
    /// Renames are only reported for staged changes, so call
    /// [`stage_all`](Self::stage_all) first.
    pub fn detect_changes(&self) -> Result<ChangeSet> {
        let output = self.run_git(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
        Ok(ChangeSet::from_porcelain_z(&output))
    }

    /// Author name of the last commit touching `rel_path`.
    pub fn last_commit_author(&self, rel_path: &str) -> Option<String> {
        match self.run_git(&["log", "-1", "--format=%an", "--", rel_path]) {
            Ok(out) => {
                let author = out.trim();
                (!author.is_empty()).then(|| author.to_string())
            }
            Err(e) => {
                debug!("No commit author for {}: {}", rel_path, e);
                None
            }
        }
    }

    /// Relative paths of child folders that are repositories of their own:
    /// direct children, and children of the projects and orphan containers.
    fn nested_repositories(&self) -> Vec<String> {
        let mut nested = Vec::new();
        let mut scan = |dir: &Path, prefix: &str| {
            let Ok(entries) = fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() || !path.join(".git").exists() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    nested.push(format!("{}{}", prefix, name));
                }
            }
        };

        scan(&self.repo_path, "");
        for container in [PROJECTS_DIR, ORPHANED_DIR] {
            scan(&self.repo_path.join(container), &format!("{}/", container));
        }
        nested.sort();
        nested
    }
}
