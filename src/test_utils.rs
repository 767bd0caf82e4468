//! Shared test doubles and arbitrary generators for property-based testing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use serde_json::Value;

use crate::git::{GitError, GitResult, MergeResult, PushResult, RepoFactory, VersionedRepo};
use crate::process::{CommandOutput, CommandRunner, ProcessError};
use crate::store::{self, DocumentStore, MemoryStore, StoredDocument};
use crate::types::{CiRequest, CommitId, DiffId, Repo, Target};

pub fn arb_diff_id() -> impl Strategy<Value = DiffId> {
    (0i64..1_000_000).prop_map(DiffId)
}

pub fn arb_commit_id() -> impl Strategy<Value = CommitId> {
    "[0-9a-f]{40}".prop_map(CommitId::from)
}

pub fn arb_repo() -> impl Strategy<Value = Repo> {
    "[a-z][a-z0-9-]{0,15}".prop_map(|id| repo(&id))
}

pub fn arb_target() -> impl Strategy<Value = Target> {
    (arb_repo(), arb_commit_id()).prop_map(|(r, c)| Target::new(r, c))
}

pub fn arb_ci_request() -> impl Strategy<Value = CiRequest> {
    (
        arb_diff_id(),
        prop::collection::vec(arb_target(), 1..4),
        any::<bool>(),
    )
        .prop_map(|(d, t, s)| CiRequest::new(d, t, s))
}

pub fn repo(id: &str) -> Repo {
    Repo::new(id, format!("https://git.example.com/{id}.git"))
}

pub fn target(repo_id: &str, commit: &str) -> Target {
    Target::new(repo(repo_id), commit)
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    /// Checked-out revision per repository.
    checked_out: HashMap<String, String>,
    /// Commit a revision resolves to, per repository.
    heads: HashMap<(String, String), CommitId>,
    merges: HashMap<String, MergeResult>,
    pushes: HashMap<String, PushResult>,
    failing_clones: HashSet<String>,
    failing_switches: HashSet<(String, String)>,
    dirty: HashSet<String>,
}

/// Scripted in-memory repositories.
///
/// Repositories are keyed by the name of their working directory, which is
/// the repo id. Every operation is appended to a call log as
/// `"<repo> <operation> [<argument>]"`. Cloning creates the working directory
/// so that later checkouts see an existing clone.
#[derive(Clone, Default)]
pub struct FakeRepos {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRepos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> Arc<dyn RepoFactory> {
        Arc::new(self.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Makes `rev` resolve to `commit` in `repo`.
    pub fn set_head(&self, repo: &str, rev: &str, commit: &str) {
        self.state
            .lock()
            .unwrap()
            .heads
            .insert((repo.to_string(), rev.to_string()), CommitId::new(commit));
    }

    pub fn merge_result(&self, repo: &str, result: MergeResult) {
        self.state
            .lock()
            .unwrap()
            .merges
            .insert(repo.to_string(), result);
    }

    pub fn push_result(&self, repo: &str, result: PushResult) {
        self.state
            .lock()
            .unwrap()
            .pushes
            .insert(repo.to_string(), result);
    }

    pub fn fail_clone(&self, repo: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_clones
            .insert(repo.to_string());
    }

    pub fn fail_switch(&self, repo: &str, rev: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_switches
            .insert((repo.to_string(), rev.to_string()));
    }

    /// Leaves uncommitted changes in `repo` after any operation.
    pub fn dirty(&self, repo: &str) {
        self.state.lock().unwrap().dirty.insert(repo.to_string());
    }
}

impl RepoFactory for FakeRepos {
    fn open(&self, path: &Path) -> Box<dyn VersionedRepo> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Box::new(FakeRepo {
            path: path.to_path_buf(),
            name,
            state: Arc::clone(&self.state),
        })
    }
}

struct FakeRepo {
    path: PathBuf,
    name: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeRepo {
    fn record(&self, state: &mut FakeState, op: &str) {
        state.calls.push(format!("{} {}", self.name, op));
    }

    fn failure(&self, command: String) -> GitError {
        GitError::CommandFailed {
            command,
            stderr: format!("fatal: scripted failure in {}", self.name),
        }
    }

    fn resolve(&self, state: &FakeState, rev: &str) -> CommitId {
        state
            .heads
            .get(&(self.name.clone(), rev.to_string()))
            .cloned()
            .unwrap_or_else(|| CommitId::new(rev))
    }

    fn current(&self, state: &FakeState) -> String {
        state
            .checked_out
            .get(&self.name)
            .cloned()
            .unwrap_or_else(|| "master".to_string())
    }
}

impl VersionedRepo for FakeRepo {
    fn path(&self) -> &Path {
        &self.path
    }

    fn clone_from(&self, url: &str) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, &format!("clone {url}"));
        if state.failing_clones.contains(&self.name) {
            return Err(self.failure(format!("git clone -- {url}")));
        }
        std::fs::create_dir_all(self.path.join(".git"))?;
        Ok(())
    }

    fn pull(&self) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, "pull");
        Ok(())
    }

    fn switch_branch(&self, target: &str) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, &format!("switch {target}"));
        if state
            .failing_switches
            .contains(&(self.name.clone(), target.to_string()))
        {
            return Err(self.failure(format!("git checkout --quiet {target}")));
        }
        state
            .checked_out
            .insert(self.name.clone(), target.to_string());
        Ok(())
    }

    fn reset_hard(&self, target: &str) -> GitResult<()> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, &format!("reset {target}"));
        Ok(())
    }

    fn head_commit(&self) -> GitResult<CommitId> {
        let state = self.state.lock().unwrap();
        Ok(self.resolve(&state, &self.current(&state)))
    }

    fn merge(&self, target: &str, _message: &str) -> GitResult<MergeResult> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, &format!("merge {target}"));
        Ok(state
            .merges
            .get(&self.name)
            .cloned()
            .unwrap_or_else(|| MergeResult::Success {
                commit: CommitId::new(format!("merge-{}", self.name)),
            }))
    }

    fn push(&self, branch: &str) -> GitResult<PushResult> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, &format!("push {branch}"));
        let pushed = self.resolve(&state, branch);
        Ok(state
            .pushes
            .get(&self.name)
            .cloned()
            .unwrap_or(PushResult::Success { pushed }))
    }

    fn has_changes(&self) -> GitResult<bool> {
        Ok(self.state.lock().unwrap().dirty.contains(&self.name))
    }

    fn list_branches(&self) -> GitResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut branches: Vec<String> = state
            .heads
            .keys()
            .filter(|(repo, rev)| *repo == self.name && !rev.starts_with("origin/"))
            .map(|(_, rev)| rev.clone())
            .collect();
        branches.sort();
        Ok(branches)
    }

    fn commit(&self, message: &str) -> GitResult<Option<CommitId>> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, &format!("commit {message}"));
        if !state.dirty.remove(&self.name) {
            return Ok(None);
        }
        let commit = CommitId::new(format!("commit-{}", self.name));
        let current = self.current(&state);
        state
            .heads
            .insert((self.name.clone(), current), commit.clone());
        Ok(Some(commit))
    }
}

/// A recorded [`FakeRunner`] invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

/// Command runner with scripted output per working-directory name.
///
/// Unscripted directories exit 0 with empty output.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, CommandOutput>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, dir_name: &str, exit_code: i32, log: &str) {
        self.responses.lock().unwrap().insert(
            dir_name.to_string(),
            CommandOutput {
                exit_code,
                log: log.to_string(),
            },
        );
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<CommandOutput, ProcessError> {
        self.invocations.lock().unwrap().push(Invocation {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: cwd.to_path_buf(),
        });
        let name = cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&name)
            .cloned()
            .unwrap_or(CommandOutput {
                exit_code: 0,
                log: String::new(),
            }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Update,
    PopFirst,
}

type Hook = Box<dyn FnOnce(&MemoryStore) + Send>;

struct PendingHook {
    ops: Vec<StoreOp>,
    path: String,
    after: bool,
    skip: usize,
    action: Hook,
}

/// A [`MemoryStore`] that runs a scripted write of "another task" around a
/// chosen operation, to replay an interleaving deterministically.
///
/// Each hook fires once, on the first matching call after `skip` matching
/// calls have gone by.
#[derive(Default)]
pub struct InterleavingStore {
    inner: MemoryStore,
    hooks: Mutex<Vec<PendingHook>>,
}

impl InterleavingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store; writes through it never fire hooks.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Runs `action` just before the first `ops` call on `path`.
    pub fn before(
        &self,
        ops: &[StoreOp],
        path: &str,
        action: impl FnOnce(&MemoryStore) + Send + 'static,
    ) {
        self.hook(ops, path, false, 0, Box::new(action));
    }

    /// Runs `action` right after the `skip + 1`-th `op` call on `path`.
    pub fn after(
        &self,
        op: StoreOp,
        path: &str,
        skip: usize,
        action: impl FnOnce(&MemoryStore) + Send + 'static,
    ) {
        self.hook(&[op], path, true, skip, Box::new(action));
    }

    fn hook(&self, ops: &[StoreOp], path: &str, after: bool, skip: usize, action: Hook) {
        self.hooks.lock().unwrap().push(PendingHook {
            ops: ops.to_vec(),
            path: path.to_string(),
            after,
            skip,
            action,
        });
    }

    fn fire(&self, op: StoreOp, path: &str, after: bool) {
        let action = {
            let mut hooks = self.hooks.lock().unwrap();
            let Some(index) = hooks
                .iter()
                .position(|h| h.after == after && h.path == path && h.ops.contains(&op))
            else {
                return;
            };
            if hooks[index].skip > 0 {
                hooks[index].skip -= 1;
                return;
            }
            hooks.remove(index).action
        };
        action(&self.inner);
    }
}

impl DocumentStore for InterleavingStore {
    fn get(&self, path: &str) -> store::Result<Option<Value>> {
        self.fire(StoreOp::Get, path, false);
        let value = self.inner.get(path);
        self.fire(StoreOp::Get, path, true);
        value
    }

    fn set(&self, path: &str, doc: &Value) -> store::Result<()> {
        self.inner.set(path, doc)
    }

    fn add(&self, collection: &str, doc: &Value) -> store::Result<String> {
        self.inner.add(collection, doc)
    }

    fn delete(&self, path: &str) -> store::Result<bool> {
        self.inner.delete(path)
    }

    fn list(&self, collection: &str) -> store::Result<Vec<StoredDocument>> {
        self.inner.list(collection)
    }

    fn pop_first(&self, collection: &str) -> store::Result<Option<StoredDocument>> {
        self.fire(StoreOp::PopFirst, collection, false);
        let doc = self.inner.pop_first(collection);
        self.fire(StoreOp::PopFirst, collection, true);
        doc
    }

    fn update(
        &self,
        path: &str,
        f: &mut dyn FnMut(Option<Value>) -> store::Result<Option<Value>>,
    ) -> store::Result<()> {
        self.fire(StoreOp::Update, path, false);
        let result = self.inner.update(path, f);
        self.fire(StoreOp::Update, path, true);
        result
    }
}
