//! Background tasks of the submission pipeline.
//!
//! The tasks never call each other. The CI task consumes queued
//! [`CiRequest`](crate::types::CiRequest)s and publishes responses, the
//! submitter consumes those responses, and both talk only through the
//! document store. The metadata task is independent of both and only keeps
//! the published reviewer metadata current.

pub mod checkout;
pub mod ci;
pub mod lock;
pub mod metadata;
pub mod submitter;


use thiserror::Error;

use crate::git::GitError;
use crate::process::ProcessError;
use crate::store::StoreError;
use crate::types::{RepoId, TransitionError};

pub use checkout::{Refresh, Workspace};
pub use ci::CiTask;
pub use lock::{TaskLock, TaskLockGuard};
pub use metadata::MetadataTask;
pub use submitter::SubmitterTask;

/// Errors that abandon a unit of task work.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository id {0:?} cannot be used as a directory name")]
    UnsafeRepoId(RepoId),

    #[error("metadata file {0} is missing")]
    MissingMetadata(&'static str),

    #[error("metadata file {file} is not valid JSON: {source}")]
    InvalidMetadata {
        file: &'static str,
        source: serde_json::Error,
    },
}

pub type TaskResult<T> = Result<T, TaskError>;

/// A unit of periodic background work.
///
/// `run` blocks the calling thread. Implementations guard their body with a
/// [`TaskLock`] so that overlapping invocations are no-ops.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// True if the task is idle and worth offering to the worker pool.
    fn should_run(&self) -> bool;

    fn run(&self) -> TaskResult<()>;
}
