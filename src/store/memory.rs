//! In-process document store.
//!
//! Every operation runs under a single mutex, which is what makes
//! `pop_first` atomic. Used by tests and for dry runs of the job.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;

use serde_json::Value;

use super::{DocumentStore, Result, StoredDocument, generate_document_id, paths};

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<Collections>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collections<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> R {
        // A panic while holding the lock cannot leave a half-applied write
        // behind (each operation is a single map update), so poisoning is
        // safe to ignore.
        let mut guard = match self.collections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<Value>> {
        let (collection, id) = paths::split(path)?;
        Ok(self.with_collections(|c| c.get(&collection).and_then(|docs| docs.get(&id)).cloned()))
    }

    fn set(&self, path: &str, doc: &Value) -> Result<()> {
        let (collection, id) = paths::split(path)?;
        self.with_collections(|c| {
            c.entry(collection).or_default().insert(id, doc.clone());
        });
        Ok(())
    }

    fn add(&self, collection: &str, doc: &Value) -> Result<String> {
        let collection = paths::collection(collection)?;
        let id = generate_document_id(&self.seq);
        self.with_collections(|c| {
            c.entry(collection).or_default().insert(id.clone(), doc.clone());
        });
        Ok(id)
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let (collection, id) = paths::split(path)?;
        Ok(self.with_collections(|c| {
            c.get_mut(&collection)
                .map(|docs| docs.remove(&id).is_some())
                .unwrap_or(false)
        }))
    }

    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let collection = paths::collection(collection)?;
        Ok(self.with_collections(|c| {
            c.get(&collection)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, value)| StoredDocument {
                            id: id.clone(),
                            value: value.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    fn pop_first(&self, collection: &str) -> Result<Option<StoredDocument>> {
        let collection = paths::collection(collection)?;
        Ok(self.with_collections(|c| {
            c.get_mut(&collection)
                .and_then(|docs| docs.pop_first())
                .map(|(id, value)| StoredDocument { id, value })
        }))
    }

    fn update(
        &self,
        path: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>>,
    ) -> Result<()> {
        let (collection, id) = paths::split(path)?;
        self.with_collections(|c| {
            let current = c.get(&collection).and_then(|docs| docs.get(&id)).cloned();
            if let Some(next) = f(current)? {
                c.entry(collection).or_default().insert(id, next);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStoreExt;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn set_then_get() {
        let store = MemoryStore::new();
        store.set("/a/b/1", &json!({"x": 1})).unwrap();
        assert_eq!(store.get("/a/b/1").unwrap(), Some(json!({"x": 1})));
        assert_eq!(store.get("/a/b/2").unwrap(), None);
    }

    #[test]
    fn add_preserves_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..20 {
            store.add_doc("/queue", &i).unwrap();
        }
        let items: Vec<i32> = store.list_docs("/queue").unwrap();
        assert_eq!(items, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn pop_first_removes_the_document() {
        let store = MemoryStore::new();
        store.add_doc("/queue", &"first").unwrap();
        store.add_doc("/queue", &"second").unwrap();

        let (_, first): (String, String) = store.pop_doc("/queue").unwrap().unwrap();
        assert_eq!(first, "first");
        let (_, second): (String, String) = store.pop_doc("/queue").unwrap().unwrap();
        assert_eq!(second, "second");
        assert!(store.pop_first("/queue").unwrap().is_none());
    }

    #[test]
    fn delete_reports_existence() {
        let store = MemoryStore::new();
        store.set("/c/doc", &json!(1)).unwrap();
        assert!(store.delete("/c/doc").unwrap());
        assert!(!store.delete("/c/doc").unwrap());
    }

    #[test]
    fn concurrent_pops_observe_each_document_once() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..200 {
            store.add_doc("/queue", &i).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some((_, n)) = store.pop_doc::<i32>("/queue").unwrap() {
                        seen.push(n);
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        assert_eq!(all.len(), 200);
        assert_eq!(all.into_iter().collect::<HashSet<_>>().len(), 200);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        store.set_doc("/c/counter", &0u32).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .update_doc("/c/counter", |n: &mut u32| {
                                *n += 1;
                                Ok::<_, crate::store::StoreError>(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_doc::<u32>("/c/counter").unwrap(), Some(400));
    }

    #[test]
    fn failed_update_leaves_the_document() {
        let store = MemoryStore::new();
        store.set_doc("/c/doc", &1u32).unwrap();

        let err = store
            .update_doc("/c/doc", |n: &mut u32| {
                *n = 2;
                Err(crate::store::StoreError::InvalidPath("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, crate::store::StoreError::InvalidPath(_)));
        assert_eq!(store.get_doc::<u32>("/c/doc").unwrap(), Some(1));

        let found = store
            .update_doc("/c/missing", |_: &mut u32| Ok::<_, crate::store::StoreError>(()))
            .unwrap();
        assert!(!found);
        assert_eq!(store.get("/c/missing").unwrap(), None);
    }
}
