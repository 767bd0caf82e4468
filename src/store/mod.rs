//! Document store capability and its adapters.
//!
//! The pipeline treats the store as its only shared state: diffs, the CI
//! request queue and per-diff CI response histories all live here. Paths are
//! slash-separated, `/<collection...>/<document-id>`.
//!
//! Adapters must make [`DocumentStore::pop_first`] atomic: of any number of
//! concurrent callers, exactly one observes a given document. The queue
//! semantics in [`queue`] rely on it. [`DocumentStore::update`] must likewise
//! apply its read and write with no other write to the same path in between;
//! records shared by several tasks (the diff) are only changed through it.

pub mod fs;
pub mod memory;
pub mod paths;
pub mod queue;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub use fs::FsDocumentStore;
pub use memory::MemoryStore;
pub use queue::{Queue, StoreQueue};

/// Errors from document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error from a filesystem-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be serialized or deserialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Path is empty, has empty segments, or contains unsafe segments.
    #[error("invalid document path: {0:?}")]
    InvalidPath(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A document read from a collection, with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub value: Value,
}

/// Untyped document store.
///
/// Collections are ordered by document id (byte-wise), and ids generated by
/// [`DocumentStore::add`] sort in insertion order.
pub trait DocumentStore: Send + Sync {
    /// Reads the document at `path`.
    fn get(&self, path: &str) -> Result<Option<Value>>;

    /// Creates or replaces the document at `path`.
    fn set(&self, path: &str, doc: &Value) -> Result<()>;

    /// Appends a document to `collection` under a fresh id and returns the id.
    fn add(&self, collection: &str, doc: &Value) -> Result<String>;

    /// Removes the document at `path`. Returns false if it did not exist.
    fn delete(&self, path: &str) -> Result<bool>;

    /// Lists the documents directly inside `collection`, in id order.
    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>>;

    /// Atomically reads and removes the first document of `collection`.
    fn pop_first(&self, collection: &str) -> Result<Option<StoredDocument>>;

    /// Atomically replaces the document at `path` with `f(current)`.
    ///
    /// `f` returning `None` leaves the document as it is.
    fn update(
        &self,
        path: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>>,
    ) -> Result<()>;
}

/// Typed helpers over any [`DocumentStore`].
pub trait DocumentStoreExt {
    fn get_doc<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>>;
    fn set_doc<T: Serialize>(&self, path: &str, doc: &T) -> Result<()>;
    fn add_doc<T: Serialize>(&self, collection: &str, doc: &T) -> Result<String>;
    fn list_docs<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>>;
    fn pop_doc<T: DeserializeOwned>(&self, collection: &str) -> Result<Option<(String, T)>>;

    /// Applies `f` to the document at `path` and writes the result back,
    /// atomically with respect to other writers of `path`.
    ///
    /// Returns `Ok(false)` without calling `f` if there is no such document.
    /// If `f` fails the document is left untouched and its error returned.
    fn update_doc<T, E>(
        &self,
        path: &str,
        f: impl FnOnce(&mut T) -> std::result::Result<(), E>,
    ) -> std::result::Result<bool, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>;
}

impl<S: DocumentStore + ?Sized> DocumentStoreExt for S {
    fn get_doc<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_doc<T: Serialize>(&self, path: &str, doc: &T) -> Result<()> {
        self.set(path, &serde_json::to_value(doc)?)
    }

    fn add_doc<T: Serialize>(&self, collection: &str, doc: &T) -> Result<String> {
        self.add(collection, &serde_json::to_value(doc)?)
    }

    fn list_docs<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.list(collection)?
            .into_iter()
            .map(|doc| serde_json::from_value(doc.value).map_err(StoreError::from))
            .collect()
    }

    fn pop_doc<T: DeserializeOwned>(&self, collection: &str) -> Result<Option<(String, T)>> {
        match self.pop_first(collection)? {
            Some(doc) => Ok(Some((doc.id, serde_json::from_value(doc.value)?))),
            None => Ok(None),
        }
    }

    fn update_doc<T, E>(
        &self,
        path: &str,
        f: impl FnOnce(&mut T) -> std::result::Result<(), E>,
    ) -> std::result::Result<bool, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
    {
        let mut f = Some(f);
        let mut found = false;
        let mut failure = None;
        self.update(path, &mut |current| {
            let (Some(value), Some(f)) = (current, f.take()) else {
                return Ok(None);
            };
            found = true;
            let mut doc: T = serde_json::from_value(value)?;
            match f(&mut doc) {
                Ok(()) => Ok(Some(serde_json::to_value(&doc)?)),
                Err(e) => {
                    failure = Some(e);
                    Ok(None)
                }
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(found),
        }
    }
}

/// Generates a document id that sorts after every id previously generated
/// by the same counter: a zero-padded microsecond timestamp plus a sequence
/// number.
pub(crate) fn generate_document_id(seq: &std::sync::atomic::AtomicU64) -> String {
    let micros = chrono::Utc::now().timestamp_micros().max(0);
    let n = seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("{:020}-{:010}", micros, n)
}
