//! Diff records and their status state machine.
//!
//! Only two transitions are driven from this crate:
//! - `* -> SUBMITTING`, on an explicit submission request
//! - `SUBMITTING -> SUBMITTED`, by the submitter task
//!
//! Both refuse to move a diff out of `SUBMITTED`, so status never regresses as
//! a side effect of the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::ci::CiResponse;
use super::ids::DiffId;

/// Review status of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffStatus {
    ReviewNotStarted,
    NeedsMoreWork,
    UnderReview,
    Accepted,
    Submitting,
    Submitted,
    Reverting,
    Reverted,
    Abandoned,
}

impl DiffStatus {
    /// Statuses from which a diff can no longer be submitted.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            DiffStatus::Submitted
                | DiffStatus::Reverting
                | DiffStatus::Reverted
                | DiffStatus::Abandoned
        )
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiffStatus::ReviewNotStarted => "REVIEW_NOT_STARTED",
            DiffStatus::NeedsMoreWork => "NEEDS_MORE_WORK",
            DiffStatus::UnderReview => "UNDER_REVIEW",
            DiffStatus::Accepted => "ACCEPTED",
            DiffStatus::Submitting => "SUBMITTING",
            DiffStatus::Submitted => "SUBMITTED",
            DiffStatus::Reverting => "REVERTING",
            DiffStatus::Reverted => "REVERTED",
            DiffStatus::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// Rejected status change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("diff {diff}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub diff: DiffId,
    pub from: DiffStatus,
    pub to: DiffStatus,
}

/// A reviewer assigned to a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub email: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub action_required: bool,
}

impl Reviewer {
    pub fn new(email: impl Into<String>) -> Self {
        Reviewer {
            email: email.into(),
            approved: false,
            action_required: false,
        }
    }

    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }
}

/// A reviewable unit of work spanning one or more repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub id: DiffId,
    pub status: DiffStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub reviewers: Vec<Reviewer>,
    /// Issue tracker references, e.g. `#123`.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Every CI response published for this diff, oldest first.
    #[serde(default)]
    pub ci_responses: Vec<CiResponse>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Diff {
    pub fn new(id: DiffId, status: DiffStatus) -> Self {
        Diff {
            id,
            status,
            description: String::new(),
            author: String::new(),
            workspace: String::new(),
            reviewers: Vec::new(),
            issues: Vec::new(),
            ci_responses: Vec::new(),
            created_at: None,
            modified_at: None,
        }
    }

    /// True if at least one reviewer approved the diff.
    pub fn has_approval(&self) -> bool {
        self.reviewers.iter().any(|r| r.approved)
    }

    /// The most recently recorded CI response, if any.
    pub fn latest_ci_response(&self) -> Option<&CiResponse> {
        self.ci_responses.last()
    }

    /// Appends a CI response to the diff's history.
    pub fn record_ci_response(&mut self, response: CiResponse) {
        self.ci_responses.push(response);
        self.touch();
    }

    /// Moves the diff into `SUBMITTING`. Idempotent if already submitting.
    pub fn begin_submission(&mut self) -> Result<(), TransitionError> {
        match self.status {
            DiffStatus::Submitting => Ok(()),
            from if from.is_closed() => Err(TransitionError {
                diff: self.id,
                from,
                to: DiffStatus::Submitting,
            }),
            _ => {
                self.status = DiffStatus::Submitting;
                self.touch();
                Ok(())
            }
        }
    }

    /// Moves the diff from `SUBMITTING` into `SUBMITTED`.
    /// Idempotent if already submitted.
    pub fn mark_submitted(&mut self) -> Result<(), TransitionError> {
        match self.status {
            DiffStatus::Submitted => Ok(()),
            DiffStatus::Submitting => {
                self.status = DiffStatus::Submitted;
                self.touch();
                Ok(())
            }
            from => Err(TransitionError {
                diff: self.id,
                from,
                to: DiffStatus::Submitted,
            }),
        }
    }

    fn touch(&mut self) {
        self.modified_at = Some(Utc::now());
    }
}
