//! Job configuration from environment variables.
//!
//! | Variable                          | Default              |
//! |-----------------------------------|----------------------|
//! | `REVIEWER_JOB_WORK_DIR`           | current directory    |
//! | `REVIEWER_JOB_STORE_DIR`          | `<work_dir>/store`   |
//! | `REVIEWER_JOB_POLL_INTERVAL_SECS` | `300`                |
//! | `REVIEWER_JOB_POOL_WIDTH`         | `4`                  |
//! | `REVIEWER_JOB_LISTEN_ADDR`        | `0.0.0.0:3000`       |
//! | `REVIEWER_JOB_COMMIT_NAME`        | `reviewer-job`       |
//! | `REVIEWER_JOB_COMMIT_EMAIL`       | `reviewer-job@localhost` |
//! | `REVIEWER_JOB_METADATA_REPO_URL`  | unset (metadata task off) |

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::git::CommitIdentity;
use crate::scheduler::SchedulerConfig;
use crate::types::Repo;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Repo id, and so clone directory name, of the metadata repository.
const METADATA_REPO_ID: &str = "metadata";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("cannot determine working directory: {0}")]
    WorkDir(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Root of the per-task clone directories `ci/` and `submitter/`.
    pub work_dir: PathBuf,
    pub store_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub identity: CommitIdentity,
    pub scheduler: SchedulerConfig,
    /// Repository holding the reviewer registry, if it should be mirrored.
    pub metadata_repo: Option<Repo>,
}

impl JobConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let work_dir = match lookup("REVIEWER_JOB_WORK_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };
        let store_dir = lookup("REVIEWER_JOB_STORE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("store"));

        let listen = lookup("REVIEWER_JOB_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen.parse().map_err(|_| ConfigError::Invalid {
            var: "REVIEWER_JOB_LISTEN_ADDR",
            value: listen.clone(),
        })?;

        let defaults = CommitIdentity::default();
        let identity = CommitIdentity {
            name: lookup("REVIEWER_JOB_COMMIT_NAME").unwrap_or(defaults.name),
            email: lookup("REVIEWER_JOB_COMMIT_EMAIL").unwrap_or(defaults.email),
        };

        let metadata_repo = lookup("REVIEWER_JOB_METADATA_REPO_URL")
            .filter(|url| !url.is_empty())
            .map(|url| Repo::new(METADATA_REPO_ID, url));

        Ok(JobConfig {
            work_dir,
            store_dir,
            listen_addr,
            identity,
            scheduler: SchedulerConfig::from_lookup(&lookup),
            metadata_repo,
        })
    }

    pub fn ci_dir(&self) -> PathBuf {
        self.work_dir.join("ci")
    }

    pub fn submitter_dir(&self) -> PathBuf {
        self.work_dir.join("submitter")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.work_dir.join("metadata")
    }
}
