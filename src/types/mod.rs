//! Core domain types for the reviewer job.

pub mod ci;
pub mod diff;
pub mod ids;
pub mod metadata;
pub mod report;

pub use ci::{
    CiRequest, CiResponse, MAX_LOG_LENGTH, Repo, Target, TargetResult, TargetStatus, bound_log,
};
pub use diff::{Diff, DiffStatus, Reviewer, TransitionError};
pub use ids::{CommitId, DiffId, MASTER_BRANCH, RepoId};
pub use metadata::MetadataDocument;
pub use report::{MergeStep, PushStep, RepoSubmission, SubmissionOutcome, SubmissionReport};
