//! Newtype wrappers for domain identifiers.
//!
//! These keep diff numbers, commit ids and repository ids from being mixed up
//! and carry the naming conventions that hang off them (e.g. `D<id>` branches).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the branch every repository is merged into and pushed from.
pub const MASTER_BRANCH: &str = "master";

/// A Diff number. A Diff with id `N` lives on branches literally named `D<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffId(pub i64);

impl DiffId {
    /// The local branch name for this diff (`D<id>`).
    pub fn branch_name(&self) -> String {
        format!("D{}", self.0)
    }

    /// The remote-tracking branch the submitter reads from (`origin/D<id>`).
    pub fn remote_branch(&self) -> String {
        format!("origin/D{}", self.0)
    }

    /// Parses a `D<id>` branch name back into a diff id.
    pub fn from_branch_name(branch: &str) -> Option<Self> {
        let digits = branch.strip_prefix('D')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(DiffId)
    }
}

impl fmt::Display for DiffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

impl From<i64> for DiffId {
    fn from(n: i64) -> Self {
        DiffId(n)
    }
}

/// A git commit id as reported by the repository.
///
/// Not validated: the CI pipeline passes through whatever the repository
/// reports as its head and compares ids for equality only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn new(s: impl Into<String>) -> Self {
        CommitId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the id for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        CommitId(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        CommitId(s.to_string())
    }
}

/// Identifier of a repository within a workspace (e.g. `startup-os`).
///
/// Used as the directory name of the local clone, so it must be a single
/// path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub String);

impl RepoId {
    pub fn new(s: impl Into<String>) -> Self {
        RepoId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the id can safely be used as a directory name.
    pub fn is_path_safe(&self) -> bool {
        let id = self.0.as_str();
        !id.is_empty()
            && !id.starts_with('.')
            && !id.contains('/')
            && !id.contains('\\')
            && !id.contains('\0')
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RepoId {
    fn from(s: &str) -> Self {
        RepoId(s.to_string())
    }
}
