//! The CI task: runs `reviewer-ci.sh` over the targets of one queued request.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::git::VersionedRepo;
use crate::process::CommandRunner;
use crate::store::{DocumentStore, DocumentStoreExt, Queue, StoreQueue, paths};
use crate::types::{CiRequest, CiResponse, Diff, Target, TargetResult, TargetStatus};

use super::{Refresh, Task, TaskError, TaskLock, TaskResult, Workspace};

/// Script run at the root of every target repository.
pub const CI_SCRIPT: &str = "reviewer-ci.sh";

const SHELL: &str = "/usr/bin/env";

pub struct CiTask {
    store: Arc<dyn DocumentStore>,
    requests: StoreQueue<CiRequest>,
    workspace: Workspace,
    runner: Arc<dyn CommandRunner>,
    lock: TaskLock,
}

impl CiTask {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        workspace: Workspace,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        CiTask {
            requests: StoreQueue::new(Arc::clone(&store), paths::CI_REQUESTS_PATH),
            store,
            workspace,
            runner,
            lock: TaskLock::new(),
        }
    }

    /// Takes one pending request, if any, and runs CI for it.
    ///
    /// Returns the final response, or `None` if the queue was empty or another
    /// invocation was already running.
    #[instrument(skip_all)]
    pub fn run_once(&self) -> TaskResult<Option<CiResponse>> {
        let Some(_guard) = self.lock.try_acquire() else {
            debug!("CI task already running");
            return Ok(None);
        };
        let Some(request) = self.requests.try_pop()? else {
            return Ok(None);
        };
        info!(diff = %request.diff_id, targets = request.targets.len(), "running CI");

        let mut response = CiResponse::new(request.clone());
        for target in &request.targets {
            let repo = match self.workspace.checkout(&target.repo, Refresh::Master) {
                Ok(repo) => repo,
                Err(e) => {
                    warn!(diff = %request.diff_id, repo = %target.repo.id, error = %e, "checkout failed, abandoning request");
                    response
                        .results
                        .push(TargetResult::infra_failure(target.clone(), &e));
                    self.publish(&response)?;
                    break;
                }
            };

            let result = self.run_target(repo.as_ref(), target);
            info!(
                diff = %request.diff_id,
                repo = %target.repo.id,
                commit = %target.commit_id.short(),
                status = ?result.status,
                "target finished"
            );
            response.results.push(result);
            self.publish(&response)?;
        }

        Ok(Some(response))
    }

    fn run_target(&self, repo: &dyn VersionedRepo, target: &Target) -> TargetResult {
        if let Err(e) = repo.switch_branch(target.commit_id.as_str()) {
            return TargetResult::infra_failure(target.clone(), &e);
        }

        let script = repo.path().join(CI_SCRIPT);
        let script = script.to_string_lossy();
        match self.runner.run(SHELL, &["bash", &*script], repo.path()) {
            Ok(output) => TargetResult::new(
                target.clone(),
                TargetStatus::from_exit_code(output.exit_code),
                &output.log,
            ),
            Err(e) => TargetResult::infra_failure(target.clone(), &e),
        }
    }

    /// Stores the response so far on the diff record and in its history.
    ///
    /// The record is updated in place, so a status change made by another
    /// task in the meantime is kept.
    fn publish(&self, response: &CiResponse) -> TaskResult<()> {
        let diff_id = response.diff_id();
        let found = self
            .store
            .update_doc(&paths::diff_path(diff_id), |diff: &mut Diff| {
                diff.record_ci_response(response.clone());
                Ok::<_, TaskError>(())
            })?;
        if !found {
            warn!(diff = %diff_id, "no diff record for CI response");
        }
        self.store
            .add_doc(&paths::ci_responses_path(diff_id), response)?;
        Ok(())
    }
}

impl Task for CiTask {
    fn name(&self) -> &str {
        "ci"
    }

    fn should_run(&self) -> bool {
        !self.lock.is_held()
    }

    fn run(&self) -> TaskResult<()> {
        self.run_once().map(|_| ())
    }
}
