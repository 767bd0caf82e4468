//! Entry points that start the pipeline for a diff.
//!
//! [`request_submission`] is what a user's "submit" amounts to: the diff must
//! be approved, moves to `SUBMITTING`, and a first CI request is queued. From
//! there the CI and submitter tasks take over.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::git::{GitError, PushResult, RepoFactory};
use crate::store::{DocumentStore, DocumentStoreExt, StoreError, paths};
use crate::types::{CiRequest, Diff, DiffId, Repo, RepoId, Target, TransitionError};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("diff {0} does not exist")]
    DiffNotFound(DiffId),

    #[error("diff {0} is not approved yet")]
    NotApproved(DiffId),

    #[error("diff {0} has no targets")]
    NoTargets(DiffId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("push of {branch} in {repo} was rejected: {details}")]
    PushRejected {
        repo: RepoId,
        branch: String,
        details: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("git error: {0}")]
    Git(#[from] GitError),
}

pub type Result<T> = std::result::Result<T, SubmissionError>;

/// Moves an approved diff to `SUBMITTING` and queues its first CI request.
///
/// Returns the queued request. A pending request for the same diff is
/// replaced.
#[instrument(skip(store, targets), fields(target_count = targets.len()))]
pub fn request_submission(
    store: &dyn DocumentStore,
    diff_id: DiffId,
    targets: Vec<Target>,
) -> Result<CiRequest> {
    let path = paths::diff_path(diff_id);
    let mut diff: Diff = store
        .get_doc(&path)?
        .ok_or(SubmissionError::DiffNotFound(diff_id))?;
    if !diff.has_approval() {
        return Err(SubmissionError::NotApproved(diff_id));
    }
    if targets.is_empty() {
        return Err(SubmissionError::NoTargets(diff_id));
    }
    diff.begin_submission()?;

    let request = CiRequest::for_submission(diff_id, targets);
    store.set_doc(&paths::ci_request_path(diff_id), &request)?;
    // Applied to the current record: CI may have appended to it since.
    store.update_doc(&path, |current: &mut Diff| {
        current.begin_submission().map_err(SubmissionError::from)
    })?;
    info!(diff = %diff_id, "diff is now SUBMITTING");
    Ok(request)
}

/// Queues a CI run for review purposes. The diff's status is left alone.
#[instrument(skip(store, targets), fields(target_count = targets.len()))]
pub fn request_review_ci(
    store: &dyn DocumentStore,
    diff_id: DiffId,
    targets: Vec<Target>,
) -> Result<CiRequest> {
    if store.get(&paths::diff_path(diff_id))?.is_none() {
        return Err(SubmissionError::DiffNotFound(diff_id));
    }
    if targets.is_empty() {
        return Err(SubmissionError::NoTargets(diff_id));
    }
    let request = CiRequest::new(diff_id, targets, false);
    store.set_doc(&paths::ci_request_path(diff_id), &request)?;
    info!(diff = %diff_id, "queued review CI request");
    Ok(request)
}

/// Publishes a diff's branches from a local workspace and returns the targets
/// to test.
///
/// `workspace` holds one clone per repository, named after the repo id.
/// Repositories without a clone or without a `D<id>` branch are not part of
/// the diff and are skipped. For the others, outstanding changes are
/// committed on the diff branch, which is then pushed to `origin`.
#[instrument(skip_all, fields(diff = %diff.id))]
pub fn prepare_workspace_targets(
    repos: &dyn RepoFactory,
    workspace: &Path,
    diff: &Diff,
    candidates: &[Repo],
) -> Result<Vec<Target>> {
    let branch = diff.id.branch_name();
    let mut targets = Vec::new();

    for candidate in candidates {
        let dir = workspace.join(candidate.id.as_str());
        if !candidate.id.is_path_safe() || !dir.is_dir() {
            debug!(repo = %candidate.id, "no clone in workspace, skipping");
            continue;
        }
        let repo = repos.open(&dir);
        if !repo.list_branches()?.iter().any(|b| *b == branch) {
            debug!(repo = %candidate.id, %branch, "no diff branch, skipping");
            continue;
        }

        repo.switch_branch(&branch)?;
        let message = if diff.description.is_empty() {
            branch.clone()
        } else {
            format!("{branch}: {}", diff.description)
        };
        if let Some(commit) = repo.commit(&message)? {
            info!(repo = %candidate.id, commit = %commit.short(), "committed outstanding changes");
        }
        if let PushResult::Rejected { details } = repo.push(&branch)? {
            return Err(SubmissionError::PushRejected {
                repo: candidate.id.clone(),
                branch,
                details,
            });
        }
        targets.push(Target::new(candidate.clone(), repo.head_commit()?));
    }

    Ok(targets)
}
