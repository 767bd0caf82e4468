//! Records of submission attempts.
//!
//! Pushing `master` to several independent repositories cannot be made atomic.
//! Each attempt to finalize a diff therefore leaves a [`SubmissionReport`]
//! naming, per repository, what was merged and what reached the remote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CommitId, DiffId, RepoId};

/// How a submission attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Every repository was pushed and the diff is now `SUBMITTED`.
    Submitted,
    /// At least one push failed. Repositories listed with a successful push
    /// already carry the merge on their remote.
    PushFailed,
    /// The diff could not be merged as tested, so a new CI request was queued.
    ReRequested,
    /// The diff could not be merged, and an identical CI request had already
    /// been queued earlier.
    AlreadyRequested,
}

/// What happened when merging the diff branch into `master`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeStep {
    Merged { commit: CommitId },
    AlreadyUpToDate,
    /// The branch moved since CI ran; no merge was attempted.
    Stale { tested: CommitId },
    Conflict { files: Vec<String> },
    /// The merge left uncommitted changes behind.
    Dirty,
    Failed { error: String },
}

impl MergeStep {
    pub fn is_pushable(&self) -> bool {
        matches!(self, MergeStep::Merged { .. } | MergeStep::AlreadyUpToDate)
    }
}

/// What happened when pushing `master`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PushStep {
    Pushed { commit: CommitId },
    AlreadyUpToDate,
    Rejected { details: String },
    Failed { error: String },
}

impl PushStep {
    pub fn is_ok(&self) -> bool {
        matches!(self, PushStep::Pushed { .. } | PushStep::AlreadyUpToDate)
    }
}

/// Per-repository part of a [`SubmissionReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSubmission {
    pub repo_id: RepoId,
    /// Head of the diff branch when the attempt was made.
    pub head: CommitId,
    pub merge: MergeStep,
    /// `None` if no push was attempted for this repository.
    #[serde(default)]
    pub push: Option<PushStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub diff_id: DiffId,
    pub attempted_at: DateTime<Utc>,
    pub outcome: SubmissionOutcome,
    pub repos: Vec<RepoSubmission>,
}

impl SubmissionReport {
    /// Repositories whose merge or push did not succeed.
    pub fn failed_repos(&self) -> impl Iterator<Item = &RepoId> {
        self.repos
            .iter()
            .filter(|r| !r.merge.is_pushable() || r.push.as_ref().is_some_and(|p| !p.is_ok()))
            .map(|r| &r.repo_id)
    }
}
