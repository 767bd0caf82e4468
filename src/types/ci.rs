//! CI request/response documents exchanged between the CI and submitter tasks.
//!
//! A [`CiRequest`] names the commits to test for a diff. The CI task answers it
//! with a [`CiResponse`] that grows one [`TargetResult`] per processed target.

use serde::{Deserialize, Serialize};

use super::ids::{CommitId, DiffId, RepoId};

/// Maximum number of bytes of CI output kept per target result.
///
/// Documents in the store are capped at roughly 1MB and a diff record carries
/// its whole CI history, so each log gets a small slice of that.
pub const MAX_LOG_LENGTH: usize = 15 * 1024;

/// A git repository taking part in a diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub url: String,
}

impl Repo {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Repo {
            id: RepoId::new(id),
            url: url.into(),
        }
    }
}

/// A repository pinned to the commit under test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub repo: Repo,
    pub commit_id: CommitId,
}

impl Target {
    pub fn new(repo: Repo, commit_id: impl Into<CommitId>) -> Self {
        Target {
            repo,
            commit_id: commit_id.into(),
        }
    }
}

/// A request to run CI over a set of targets.
///
/// Requests are immutable once enqueued. Two requests are the same request
/// when all fields match, which is what re-request de-duplication keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CiRequest {
    pub diff_id: DiffId,
    pub targets: Vec<Target>,
    pub for_submission: bool,
}

impl CiRequest {
    pub fn new(diff_id: DiffId, targets: Vec<Target>, for_submission: bool) -> Self {
        CiRequest {
            diff_id,
            targets,
            for_submission,
        }
    }

    /// A request issued on behalf of a submission attempt.
    pub fn for_submission(diff_id: DiffId, targets: Vec<Target>) -> Self {
        Self::new(diff_id, targets, true)
    }
}

/// Outcome of running the CI script for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    Success,
    Fail,
}

impl TargetStatus {
    /// Maps a process exit code to a status: only `0` is a success.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            TargetStatus::Success
        } else {
            TargetStatus::Fail
        }
    }
}

/// The CI result for a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: Target,
    pub status: TargetStatus,
    pub log: String,
}

impl TargetResult {
    /// Builds a result, bounding the log to [`MAX_LOG_LENGTH`].
    pub fn new(target: Target, status: TargetStatus, log: &str) -> Self {
        TargetResult {
            target,
            status,
            log: bound_log(log, MAX_LOG_LENGTH),
        }
    }

    /// A failed result carrying an infrastructure error as its log.
    pub fn infra_failure(target: Target, error: &dyn std::error::Error) -> Self {
        Self::new(target, TargetStatus::Fail, &error.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.status == TargetStatus::Success
    }
}

/// The response to a [`CiRequest`], possibly still being filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiResponse {
    pub request: CiRequest,
    #[serde(default)]
    pub results: Vec<TargetResult>,
}

impl CiResponse {
    pub fn new(request: CiRequest) -> Self {
        CiResponse {
            request,
            results: Vec::new(),
        }
    }

    pub fn diff_id(&self) -> DiffId {
        self.request.diff_id
    }

    /// True once every target of the request has a result.
    pub fn is_complete(&self) -> bool {
        self.results.len() >= self.request.targets.len()
    }

    /// True if there is at least one result and all results succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(TargetResult::is_success)
    }

    /// Targets whose CI run failed.
    pub fn failed_targets(&self) -> impl Iterator<Item = &Target> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| &r.target)
    }
}

/// Bounds a CI log to `budget` bytes.
///
/// Logs within budget are returned unchanged. Longer logs are cut on a char
/// boundary and end with `[log truncated from length N]`, where `N` is the
/// original byte length. The marker counts against the budget, so the result
/// never exceeds `budget` (unless the budget cannot even hold the marker) and
/// bounding an already-bounded log is a no-op.
pub fn bound_log(log: &str, budget: usize) -> String {
    if log.len() <= budget {
        return log.to_string();
    }

    let marker = format!("[log truncated from length {}]\n", log.len());
    let mut keep = budget.saturating_sub(marker.len());
    while !log.is_char_boundary(keep) {
        keep -= 1;
    }

    let mut bounded = String::with_capacity(keep + marker.len());
    bounded.push_str(&log[..keep]);
    bounded.push_str(&marker);
    bounded
}
