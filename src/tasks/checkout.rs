//! Per-task working clones.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::git::{RepoFactory, VersionedRepo};
use crate::types::{MASTER_BRANCH, Repo};

use super::{TaskError, TaskResult};

/// How an existing clone is brought up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Discard local state, switch to `master` and pull.
    Master,
    /// Discard local state, detach at `origin/master` and fetch. Local
    /// branches are left alone, so an unpushed `master` never blocks the
    /// refresh.
    Fetch,
}

/// A directory of clones owned by a single task, one per repository.
pub struct Workspace {
    root: PathBuf,
    repos: Arc<dyn RepoFactory>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, repos: Arc<dyn RepoFactory>) -> Self {
        Workspace {
            root: root.into(),
            repos,
        }
    }

    /// Returns an up-to-date clone of `repo`, cloning it on first use.
    pub fn checkout(&self, repo: &Repo, refresh: Refresh) -> TaskResult<Box<dyn VersionedRepo>> {
        if !repo.id.is_path_safe() {
            return Err(TaskError::UnsafeRepoId(repo.id.clone()));
        }
        let dir = self.root.join(repo.id.as_str());
        let clone = self.repos.open(&dir);

        if is_missing_or_empty(&dir)? {
            info!(repo = %repo.id, url = %repo.url, dir = %dir.display(), "cloning");
            clone.clone_from(&repo.url)?;
            return Ok(clone);
        }

        debug!(repo = %repo.id, ?refresh, "refreshing clone");
        match refresh {
            Refresh::Master => {
                // A previous CI script may have left the tree dirty.
                clone.reset_hard("HEAD")?;
                clone.switch_branch(MASTER_BRANCH)?;
                clone.pull()?;
            }
            Refresh::Fetch => {
                clone.reset_hard("HEAD")?;
                clone.switch_branch(&format!("origin/{MASTER_BRANCH}"))?;
                clone.pull()?;
            }
        }
        Ok(clone)
    }
}

fn is_missing_or_empty(dir: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}
