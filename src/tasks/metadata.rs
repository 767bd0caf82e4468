//! The metadata task: mirrors reviewer metadata files from a repository into
//! the store.
//!
//! Each run refreshes the metadata clone and compares the SHA-256 of every
//! metadata file with the checksum of the published document. Only changed
//! files are parsed and republished, so an unchanged registry costs one pull.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::store::{DocumentStore, DocumentStoreExt, paths};
use crate::types::{MetadataDocument, Repo};

use super::{Refresh, Task, TaskError, TaskLock, TaskResult, Workspace};

/// Registry of reviewer deployments, relative to the repository root.
pub const REGISTRY_FILE: &str = "tools/reviewer/global_registry.json";

/// The repository's own reviewer configuration.
pub const CONFIG_FILE: &str = "reviewer_config.json";

struct MetadataFile {
    file: &'static str,
    document: &'static str,
    required: bool,
}

const FILES: [MetadataFile; 2] = [
    MetadataFile {
        file: REGISTRY_FILE,
        document: paths::REVIEWER_REGISTRY_PATH,
        required: true,
    },
    MetadataFile {
        file: CONFIG_FILE,
        document: paths::REVIEWER_CONFIG_PATH,
        required: false,
    },
];

pub struct MetadataTask {
    store: Arc<dyn DocumentStore>,
    workspace: Workspace,
    repo: Repo,
    lock: TaskLock,
}

impl MetadataTask {
    pub fn new(store: Arc<dyn DocumentStore>, workspace: Workspace, repo: Repo) -> Self {
        MetadataTask {
            store,
            workspace,
            repo,
            lock: TaskLock::new(),
        }
    }

    /// Refreshes the metadata clone and republishes changed files.
    ///
    /// Returns the store paths that were written, or `None` if another
    /// invocation was already running.
    #[instrument(skip_all, fields(repo = %self.repo.id))]
    pub fn run_once(&self) -> TaskResult<Option<Vec<&'static str>>> {
        let Some(_guard) = self.lock.try_acquire() else {
            debug!("metadata task already running");
            return Ok(None);
        };

        let clone = self.workspace.checkout(&self.repo, Refresh::Master)?;
        let mut published = Vec::new();
        for file in &FILES {
            if self.sync(clone.path(), file)? {
                published.push(file.document);
            }
        }
        Ok(Some(published))
    }

    fn sync(&self, root: &Path, file: &MetadataFile) -> TaskResult<bool> {
        let bytes = match std::fs::read(root.join(file.file)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if file.required {
                    return Err(TaskError::MissingMetadata(file.file));
                }
                debug!(file = file.file, "no such metadata file");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let checksum = hex::encode(Sha256::digest(&bytes));
        let previous = self
            .store
            .get_doc::<MetadataDocument>(file.document)?
            .map(|doc| doc.checksum);
        if previous.as_deref() == Some(checksum.as_str()) {
            debug!(file = file.file, %checksum, "metadata unchanged");
            return Ok(false);
        }

        let content = serde_json::from_slice(&bytes)
            .map_err(|source| TaskError::InvalidMetadata { file: file.file, source })?;
        info!(file = file.file, %checksum, ?previous, "publishing reviewer metadata");
        self.store.set_doc(
            file.document,
            &MetadataDocument {
                checksum,
                source: file.file.to_string(),
                content,
                updated_at: Utc::now(),
            },
        )?;
        Ok(true)
    }
}

impl Task for MetadataTask {
    fn name(&self) -> &str {
        "metadata"
    }

    fn should_run(&self) -> bool {
        !self.lock.is_held()
    }

    fn run(&self) -> TaskResult<()> {
        self.run_once().map(|_| ())
    }
}
