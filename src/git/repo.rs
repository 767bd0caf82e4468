//! The versioned-repository capability and its git CLI implementation.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::types::CommitId;

use super::{
    CommitIdentity, GitError, GitResult, MergeResult, PushResult, git_command,
    git_commit_command, path_str, rev_parse, run_git_stdout, run_git_sync,
};

/// Operations the pipeline needs from a local clone.
///
/// Every method is synchronous and may block for the duration of a git
/// process (network operations included).
pub trait VersionedRepo: Send {
    /// Directory of the working tree.
    fn path(&self) -> &Path;

    /// Clones `url` into [`VersionedRepo::path`].
    fn clone_from(&self, url: &str) -> GitResult<()>;

    /// Fetches from `origin` and fast-forwards the current branch, if any.
    fn pull(&self) -> GitResult<()>;

    /// Checks out a branch, remote-tracking branch or commit.
    fn switch_branch(&self, target: &str) -> GitResult<()>;

    /// Drops local changes and any in-progress merge, resetting the current
    /// branch to `target`.
    fn reset_hard(&self, target: &str) -> GitResult<()>;

    /// Commit id of `HEAD`.
    fn head_commit(&self) -> GitResult<CommitId>;

    /// Merges `target` into the current branch. Conflicts are aborted.
    fn merge(&self, target: &str, message: &str) -> GitResult<MergeResult>;

    /// Pushes local `branch` to the branch of the same name on `origin`.
    fn push(&self, branch: &str) -> GitResult<PushResult>;

    /// True if the working tree has uncommitted or unmerged changes.
    fn has_changes(&self) -> GitResult<bool>;

    /// Local branch names.
    fn list_branches(&self) -> GitResult<Vec<String>>;

    /// Commits all changes in the working tree. Returns `None` when there was
    /// nothing to commit.
    fn commit(&self, message: &str) -> GitResult<Option<CommitId>>;
}

/// Creates [`VersionedRepo`] handles for working-tree paths.
pub trait RepoFactory: Send + Sync {
    fn open(&self, path: &Path) -> Box<dyn VersionedRepo>;
}

/// A [`VersionedRepo`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    identity: CommitIdentity,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>, identity: CommitIdentity) -> Self {
        GitRepo {
            path: path.into(),
            identity,
        }
    }

    fn current_branch(&self) -> GitResult<Option<String>> {
        let output = git_command(&self.path)
            .args(["symbolic-ref", "-q", "--short", "HEAD"])
            .output()?;
        // Exit 1 = detached HEAD
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            Some(1) => Ok(None),
            _ => Err(GitError::CommandFailed {
                command: "git symbolic-ref -q --short HEAD".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
        }
    }

    fn conflicting_files(&self) -> GitResult<Vec<String>> {
        let output = run_git_stdout(&self.path, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(output.lines().map(str::to_string).collect())
    }
}

impl VersionedRepo for GitRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn clone_from(&self, url: &str) -> GitResult<()> {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        run_git_sync(parent, &["clone", "--", url, path_str(&self.path)?])?;
        Ok(())
    }

    fn pull(&self) -> GitResult<()> {
        run_git_sync(&self.path, &["fetch", "--prune", "origin"])?;
        match self.current_branch()? {
            Some(branch) => {
                debug!(path = %self.path.display(), %branch, "fast-forwarding");
                run_git_sync(&self.path, &["merge", "--ff-only", "@{upstream}"])?;
            }
            None => debug!(path = %self.path.display(), "detached HEAD, fetch only"),
        }
        Ok(())
    }

    fn switch_branch(&self, target: &str) -> GitResult<()> {
        run_git_sync(&self.path, &["checkout", "--quiet", target])?;
        Ok(())
    }

    fn reset_hard(&self, target: &str) -> GitResult<()> {
        // Fails when no merge is in progress, which is fine.
        let _ = run_git_sync(&self.path, &["merge", "--abort"]);
        run_git_sync(&self.path, &["reset", "--hard", target])?;
        run_git_sync(&self.path, &["clean", "-fd"])?;
        Ok(())
    }

    fn head_commit(&self) -> GitResult<CommitId> {
        rev_parse(&self.path, "HEAD")
    }

    fn merge(&self, target: &str, message: &str) -> GitResult<MergeResult> {
        let args = ["merge", "--no-ff", "--no-edit", "-m", message, target];
        let output = git_commit_command(&self.path, &self.identity)
            .args(args)
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            if stdout.contains("Already up to date") {
                return Ok(MergeResult::AlreadyUpToDate);
            }
            return Ok(MergeResult::Success {
                commit: self.head_commit()?,
            });
        }

        // git reports conflicts on stdout, not stderr
        let combined = format!("{stdout}{stderr}");
        if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
            let conflicting_files = self.conflicting_files()?;
            run_git_sync(&self.path, &["merge", "--abort"])?;
            return Ok(MergeResult::Conflict { conflicting_files });
        }

        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: stderr.to_string(),
        })
    }

    fn push(&self, branch: &str) -> GitResult<PushResult> {
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let local = rev_parse(&self.path, &format!("refs/heads/{branch}"))?;

        let output = git_command(&self.path)
            .args(["push", "--porcelain", "origin", &refspec])
            .output()?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            // Porcelain output flags an unchanged ref with `=`.
            let up_to_date = stdout.lines().any(|line| line.starts_with("=\t"))
                || stderr.contains("Everything up-to-date");
            if up_to_date {
                return Ok(PushResult::AlreadyUpToDate);
            }
            return Ok(PushResult::Success { pushed: local });
        }

        let combined = format!("{stdout}{stderr}");
        if combined.contains("[rejected]")
            || combined.contains("non-fast-forward")
            || combined.contains("failed to push")
        {
            return Ok(PushResult::Rejected {
                details: stderr.trim().to_string(),
            });
        }

        Err(GitError::CommandFailed {
            command: format!("git push --porcelain origin {refspec}"),
            stderr: stderr.to_string(),
        })
    }

    fn has_changes(&self) -> GitResult<bool> {
        let status = run_git_stdout(&self.path, &["status", "--porcelain"])?;
        Ok(!status.is_empty())
    }

    fn list_branches(&self) -> GitResult<Vec<String>> {
        let output = run_git_stdout(
            &self.path,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )?;
        Ok(output.lines().map(str::to_string).collect())
    }

    fn commit(&self, message: &str) -> GitResult<Option<CommitId>> {
        if !self.has_changes()? {
            return Ok(None);
        }
        run_git_sync(&self.path, &["add", "--all"])?;
        let args = ["commit", "--quiet", "-m", message];
        let output = git_commit_command(&self.path, &self.identity)
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        self.head_commit().map(Some)
    }
}

/// Opens [`GitRepo`]s that commit with a fixed identity.
#[derive(Debug, Clone, Default)]
pub struct GitRepoFactory {
    identity: CommitIdentity,
}

impl GitRepoFactory {
    pub fn new(identity: CommitIdentity) -> Self {
        GitRepoFactory { identity }
    }
}

impl RepoFactory for GitRepoFactory {
    fn open(&self, path: &Path) -> Box<dyn VersionedRepo> {
        Box::new(GitRepo::new(path, self.identity.clone()))
    }
}
