//! Local git operations used by the CI and submitter tasks.
//!
//! The tasks only talk to repositories through the [`VersionedRepo`] trait.
//! [`GitRepo`] implements it by shelling out to the `git` CLI with a clean
//! environment (no system or global config, no terminal prompts), so that
//! behavior does not depend on the machine the job runs on.

pub mod repo;


use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;

use crate::types::CommitId;

pub use repo::{GitRepo, GitRepoFactory, RepoFactory, VersionedRepo};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Path cannot be passed to git as a UTF-8 argument.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Result of a merge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge completed successfully, producing a new commit.
    Success { commit: CommitId },

    /// Merge stopped on conflicts. The merge has been aborted, so the
    /// working tree is back at the pre-merge HEAD.
    Conflict { conflicting_files: Vec<String> },

    /// Merge was a no-op (already up-to-date).
    AlreadyUpToDate,
}

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    /// Push succeeded.
    Success { pushed: CommitId },

    /// Push was rejected (e.g. non-fast-forward).
    Rejected { details: String },

    /// Push was a no-op (remote already has this commit).
    AlreadyUpToDate,
}

impl PushResult {
    /// Returns true if the remote now has the pushed commit.
    pub fn is_ok(&self) -> bool {
        matches!(self, PushResult::Success { .. } | PushResult::AlreadyUpToDate)
    }
}

/// Identity used for creating commits.
///
/// Passed via `-c` flags on each command, so commits can be created even
/// though global/system git config is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// The committer/author name (git `user.name`).
    pub name: String,

    /// The committer/author email (git `user.email`).
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        CommitIdentity {
            name: "reviewer-job".to_string(),
            email: "reviewer-job@localhost".to_string(),
        }
    }
}

/// Create a git Command with clean environment (no system/user config).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new("git");
    cmd.current_dir(workdir);
    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

/// Create a git Command configured for operations that create commits.
pub(crate) fn git_commit_command(
    workdir: &Path,
    identity: &CommitIdentity,
) -> std::process::Command {
    let mut cmd = git_command(workdir);
    cmd.arg("-c");
    cmd.arg(format!("user.name={}", identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", identity.email));
    cmd
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a [`GitError::CommandFailed`]
/// carrying stderr on a non-zero exit.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;
    check_output(output, args)
}

/// Run a git command and return stdout as a trimmed string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn check_output(output: Output, args: &[&str]) -> GitResult<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Get the commit id of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<CommitId> {
    run_git_stdout(workdir, &["rev-parse", rev]).map(CommitId::from)
}

pub(crate) fn path_str(path: &Path) -> GitResult<&str> {
    path.to_str()
        .ok_or_else(|| GitError::NonUtf8Path(path.to_path_buf()))
}
