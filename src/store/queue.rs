//! Work queues built on document-store pop semantics.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{DocumentStore, DocumentStoreExt, Result, paths};

/// A single-consumer-per-item queue.
pub trait Queue<T> {
    /// Claims and removes the next item, if any.
    fn try_pop(&self) -> Result<Option<T>>;
}

/// A [`Queue`] over one collection of a [`DocumentStore`].
///
/// Each item is observed by at most one `try_pop` caller, because the store
/// guarantees `pop_first` is atomic.
pub struct StoreQueue<T> {
    store: Arc<dyn DocumentStore>,
    collection: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> StoreQueue<T> {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        StoreQueue {
            store,
            collection: collection.into(),
            _item: PhantomData,
        }
    }
}

impl<T: Serialize> StoreQueue<T> {
    /// Appends an item at the back of the queue.
    pub fn push(&self, item: &T) -> Result<String> {
        self.store.add_doc(&self.collection, item)
    }

    /// Stores an item under a caller-chosen id, replacing any pending item
    /// with that id.
    pub fn put(&self, id: &str, item: &T) -> Result<()> {
        self.store.set_doc(&paths::join(&self.collection, id), item)
    }
}

impl<T: DeserializeOwned> StoreQueue<T> {
    /// Claims every pending item and returns the newest one with its id.
    ///
    /// Older items are consumed and dropped. Items appended while draining
    /// may be included or left for the next call. Putting the returned item
    /// back under its id restores its place relative to later items.
    pub fn drain_latest(&self) -> Result<Option<(String, T)>> {
        let mut latest = None;
        while let Some(entry) = self.store.pop_doc::<T>(&self.collection)? {
            latest = Some(entry);
        }
        Ok(latest)
    }
}

impl<T: DeserializeOwned> Queue<T> for StoreQueue<T> {
    fn try_pop(&self) -> Result<Option<T>> {
        Ok(self
            .store
            .pop_doc::<T>(&self.collection)?
            .map(|(_, item)| item))
    }
}
