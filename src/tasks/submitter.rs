//! The submitter task: finalizes diffs whose CI passed on their current heads.
//!
//! For every diff in `SUBMITTING` the task takes the latest CI response from the
//! diff's history. If all targets passed and every repository's diff branch
//! still points at the tested commit, `origin/D<id>` is merged into `master`
//! and `master` is pushed everywhere. If a branch moved, or a merge did not
//! go through, a fresh CI request is queued against the current heads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::git::{MergeResult, PushResult, VersionedRepo};
use crate::store::{DocumentStore, DocumentStoreExt, StoreQueue, paths};
use crate::types::{
    CiRequest, CiResponse, Diff, DiffId, DiffStatus, MASTER_BRANCH, MergeStep, PushStep,
    RepoSubmission, SubmissionOutcome, SubmissionReport, Target,
};

use super::{Refresh, Task, TaskError, TaskLock, TaskResult, Workspace};

/// What the submitter did with one diff on one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// No CI response was waiting.
    NoResponse,
    /// The latest response is still being filled in by the CI task.
    CiPending,
    /// At least one target failed CI.
    CiFailed,
    /// A merge was attempted; see the recorded report.
    Attempted(SubmissionOutcome),
}

pub struct SubmitterTask {
    store: Arc<dyn DocumentStore>,
    requests: StoreQueue<CiRequest>,
    workspace: Workspace,
    /// Requests queued by this task since it was created.
    enqueued: Mutex<HashSet<CiRequest>>,
    lock: TaskLock,
}

struct Checked {
    repo: Box<dyn VersionedRepo>,
    submission: RepoSubmission,
}

impl SubmitterTask {
    pub fn new(store: Arc<dyn DocumentStore>, workspace: Workspace) -> Self {
        SubmitterTask {
            requests: StoreQueue::new(Arc::clone(&store), paths::CI_REQUESTS_PATH),
            store,
            workspace,
            enqueued: Mutex::new(HashSet::new()),
            lock: TaskLock::new(),
        }
    }

    /// Processes every diff awaiting submission.
    ///
    /// A failure on one diff is logged and does not stop the others. Returns
    /// `None` if another invocation was already running.
    #[instrument(skip_all)]
    pub fn run_once(&self) -> TaskResult<Option<Vec<(DiffId, DiffOutcome)>>> {
        let Some(_guard) = self.lock.try_acquire() else {
            debug!("submitter already running");
            return Ok(None);
        };

        let diffs: Vec<Diff> = self.store.list_docs(paths::DIFF_COLLECTION)?;
        let mut outcomes = Vec::new();
        for diff in diffs
            .into_iter()
            .filter(|d| d.status == DiffStatus::Submitting)
        {
            match self.process(&diff) {
                Ok(outcome) => {
                    debug!(diff = %diff.id, ?outcome, "processed");
                    outcomes.push((diff.id, outcome));
                }
                Err(e) => warn!(diff = %diff.id, error = %e, "submission attempt abandoned"),
            }
        }
        Ok(Some(outcomes))
    }

    fn process(&self, diff: &Diff) -> TaskResult<DiffOutcome> {
        let history: StoreQueue<CiResponse> =
            StoreQueue::new(Arc::clone(&self.store), paths::ci_responses_path(diff.id));
        let Some((id, response)) = history.drain_latest()? else {
            return Ok(DiffOutcome::NoResponse);
        };
        if !response.is_complete() {
            return Ok(DiffOutcome::CiPending);
        }
        if !response.all_succeeded() {
            info!(diff = %diff.id, "CI failed, not submitting");
            return Ok(DiffOutcome::CiFailed);
        }

        // Put back under the original id, so a response published meanwhile
        // still sorts after it and wins the next drain.
        match self.attempt(diff.id, &response) {
            Ok(SubmissionOutcome::PushFailed) => {
                history.put(&id, &response)?;
                Ok(DiffOutcome::Attempted(SubmissionOutcome::PushFailed))
            }
            Ok(outcome) => Ok(DiffOutcome::Attempted(outcome)),
            Err(e) => {
                history.put(&id, &response)?;
                Err(e)
            }
        }
    }

    fn attempt(&self, diff_id: DiffId, response: &CiResponse) -> TaskResult<SubmissionOutcome> {
        let mut checked = Vec::with_capacity(response.request.targets.len());
        for target in &response.request.targets {
            checked.push(self.check_target(diff_id, target)?);
        }

        let pushable = checked.iter().all(|c| c.submission.merge.is_pushable());
        let outcome = if pushable {
            self.push_all(diff_id, &mut checked)?
        } else {
            let targets = response
                .request
                .targets
                .iter()
                .zip(&checked)
                .map(|(t, c)| Target::new(t.repo.clone(), c.submission.head.clone()))
                .collect();
            self.request_ci(CiRequest::for_submission(diff_id, targets))?
        };

        let report = SubmissionReport {
            diff_id,
            attempted_at: Utc::now(),
            outcome,
            repos: checked.into_iter().map(|c| c.submission).collect(),
        };
        for repo in report.failed_repos() {
            info!(diff = %diff_id, repo = %repo, "repository not submitted");
        }
        self.store
            .add_doc(&paths::submission_reports_path(diff_id), &report)?;
        Ok(outcome)
    }

    /// Checks out the diff branch and merges it into `master` if its head is
    /// the tested commit.
    fn check_target(&self, diff_id: DiffId, target: &Target) -> TaskResult<Checked> {
        let repo = self.workspace.checkout(&target.repo, Refresh::Fetch)?;
        let branch = diff_id.remote_branch();
        repo.switch_branch(&branch)?;
        let head = repo.head_commit()?;

        let merge = if head != target.commit_id {
            info!(diff = %diff_id, repo = %target.repo.id, tested = %target.commit_id.short(), head = %head.short(), "branch moved since CI");
            MergeStep::Stale {
                tested: target.commit_id.clone(),
            }
        } else {
            repo.switch_branch(MASTER_BRANCH)?;
            // Drop merges left behind by an earlier attempt that never pushed.
            repo.reset_hard(&format!("origin/{MASTER_BRANCH}"))?;
            merge_into_master(repo.as_ref(), diff_id, &branch)
        };

        Ok(Checked {
            repo,
            submission: RepoSubmission {
                repo_id: target.repo.id.clone(),
                head,
                merge,
                push: None,
            },
        })
    }

    fn push_all(&self, diff_id: DiffId, checked: &mut [Checked]) -> TaskResult<SubmissionOutcome> {
        for c in checked.iter_mut() {
            let step = match c.repo.push(MASTER_BRANCH) {
                Ok(PushResult::Success { pushed }) => PushStep::Pushed { commit: pushed },
                Ok(PushResult::AlreadyUpToDate) => PushStep::AlreadyUpToDate,
                Ok(PushResult::Rejected { details }) => PushStep::Rejected { details },
                Err(e) => PushStep::Failed {
                    error: e.to_string(),
                },
            };
            let ok = step.is_ok();
            c.submission.push = Some(step);
            if !ok {
                warn!(diff = %diff_id, repo = %c.submission.repo_id, "push failed, diff stays SUBMITTING");
                return Ok(SubmissionOutcome::PushFailed);
            }
        }

        let found = self
            .store
            .update_doc(&paths::diff_path(diff_id), |diff: &mut Diff| {
                diff.mark_submitted().map_err(TaskError::from)
            })?;
        if !found {
            warn!(diff = %diff_id, "diff record disappeared after push");
            return Ok(SubmissionOutcome::Submitted);
        }
        info!(diff = %diff_id, "submitted");
        Ok(SubmissionOutcome::Submitted)
    }

    fn request_ci(&self, request: CiRequest) -> TaskResult<SubmissionOutcome> {
        let mut enqueued = self
            .enqueued
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if enqueued.contains(&request) {
            debug!(diff = %request.diff_id, "identical CI request already queued");
            return Ok(SubmissionOutcome::AlreadyRequested);
        }
        self.requests
            .put(&request.diff_id.0.to_string(), &request)?;
        info!(diff = %request.diff_id, "queued CI request against current heads");
        enqueued.insert(request);
        Ok(SubmissionOutcome::ReRequested)
    }
}

fn merge_into_master(repo: &dyn VersionedRepo, diff_id: DiffId, branch: &str) -> MergeStep {
    let message = format!("Merge {}", diff_id.branch_name());
    let step = match repo.merge(branch, &message) {
        Ok(MergeResult::Success { commit }) => MergeStep::Merged { commit },
        Ok(MergeResult::AlreadyUpToDate) => MergeStep::AlreadyUpToDate,
        Ok(MergeResult::Conflict { conflicting_files }) => MergeStep::Conflict {
            files: conflicting_files,
        },
        Err(e) => {
            return MergeStep::Failed {
                error: e.to_string(),
            };
        }
    };
    if !step.is_pushable() {
        return step;
    }
    match repo.has_changes() {
        Ok(false) => step,
        Ok(true) => MergeStep::Dirty,
        Err(e) => MergeStep::Failed {
            error: e.to_string(),
        },
    }
}

impl Task for SubmitterTask {
    fn name(&self) -> &str {
        "submitter"
    }

    fn should_run(&self) -> bool {
        !self.lock.is_held()
    }

    fn run(&self) -> TaskResult<()> {
        self.run_once().map(|_| ())
    }
}
