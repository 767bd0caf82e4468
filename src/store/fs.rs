//! Filesystem-backed document store.
//!
//! Layout: each collection is a directory under the store root and each
//! document is a `<id>.json` file in it, so `/reviewer/data/diff/42` lives at
//! `<root>/reviewer/data/diff/42.json`.
//!
//! Writes use the write-to-temp-then-rename pattern:
//! 1. Write to a uniquely named `<id>.json.tmp-<n>`
//! 2. fsync the temp file
//! 3. Rename over `<id>.json`
//! 4. fsync the directory
//!
//! `pop_first` claims a document by renaming it to `<id>.json.claim-<n>`.
//! `rename(2)` succeeds for exactly one of several racing claimants; the
//! losers see `NotFound` and move on to the next candidate. Only the winner
//! reads and deletes the claimed file. This holds across processes sharing
//! the same root, not only across threads.
//!
//! `update` and `set` hold a per-path lock for the whole read-modify-write.
//! The lock is process-wide, so one job process per root is assumed for
//! read-modify-write atomicity.

use std::collections::hash_map::DefaultHasher;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::{DocumentStore, Result, StoredDocument, generate_document_id, paths};

const DOC_EXTENSION: &str = "json";

/// Shared by every store instance in the process so that temp, claim and
/// document names never collide between instances opened on the same root.
static SEQ: AtomicU64 = AtomicU64::new(0);

const WRITE_LOCK_STRIPES: usize = 64;

/// Serializes writers of the same document file. Paths hash onto stripes.
static WRITE_LOCKS: [Mutex<()>; WRITE_LOCK_STRIPES] =
    [const { Mutex::new(()) }; WRITE_LOCK_STRIPES];

#[derive(Debug)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(FsDocumentStore { root })
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for segment in paths::segments(collection)? {
            dir.push(segment);
        }
        Ok(dir)
    }

    fn document_file(&self, path: &str) -> Result<(PathBuf, PathBuf)> {
        let (collection, id) = paths::split(path)?;
        let dir = self.collection_dir(&collection)?;
        let file = dir.join(format!("{id}.{DOC_EXTENSION}"));
        Ok((dir, file))
    }

    fn write_atomic(&self, dir: &Path, file: &Path, doc: &Value) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let tmp_path = file.with_extension(format!("{DOC_EXTENSION}.tmp-{}", unique_suffix()));
        let bytes = serde_json::to_vec_pretty(doc)?;
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }

        if let Err(e) = std::fs::rename(&tmp_path, file) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        fsync_dir(dir)?;
        Ok(())
    }

    /// Document ids in `dir`, sorted. Temp and claim files are skipped.
    fn document_ids(dir: &Path) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = name.strip_suffix(".json")
                && !id.is_empty()
                && !id.starts_with('.')
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl DocumentStore for FsDocumentStore {
    fn get(&self, path: &str) -> Result<Option<Value>> {
        let (_, file) = self.document_file(path)?;
        read_document(&file)
    }

    fn set(&self, path: &str, doc: &Value) -> Result<()> {
        let (dir, file) = self.document_file(path)?;
        let _guard = lock_file(&file);
        self.write_atomic(&dir, &file, doc)
    }

    fn add(&self, collection: &str, doc: &Value) -> Result<String> {
        let dir = self.collection_dir(collection)?;
        let id = generate_document_id(&SEQ);
        let file = dir.join(format!("{id}.{DOC_EXTENSION}"));
        self.write_atomic(&dir, &file, doc)?;
        Ok(id)
    }

    fn delete(&self, path: &str) -> Result<bool> {
        let (dir, file) = self.document_file(path)?;
        match std::fs::remove_file(&file) {
            Ok(()) => {
                fsync_dir(&dir)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let dir = self.collection_dir(collection)?;
        let mut docs = Vec::new();
        for id in Self::document_ids(&dir)? {
            // A document can be popped between listing and reading.
            if let Some(value) = read_document(&dir.join(format!("{id}.{DOC_EXTENSION}")))? {
                docs.push(StoredDocument { id, value });
            }
        }
        Ok(docs)
    }

    fn pop_first(&self, collection: &str) -> Result<Option<StoredDocument>> {
        let dir = self.collection_dir(collection)?;
        for id in Self::document_ids(&dir)? {
            let file = dir.join(format!("{id}.{DOC_EXTENSION}"));
            let claimed =
                file.with_extension(format!("{DOC_EXTENSION}.claim-{}", unique_suffix()));

            match std::fs::rename(&file, &claimed) {
                Ok(()) => {}
                // Another consumer claimed it first.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let bytes = std::fs::read(&claimed)?;
            std::fs::remove_file(&claimed)?;
            fsync_dir(&dir)?;
            let value = serde_json::from_slice(&bytes)?;
            return Ok(Some(StoredDocument { id, value }));
        }
        Ok(None)
    }

    fn update(
        &self,
        path: &str,
        f: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>>,
    ) -> Result<()> {
        let (dir, file) = self.document_file(path)?;
        let _guard = lock_file(&file);
        match f(read_document(&file)?)? {
            Some(next) => self.write_atomic(&dir, &file, &next),
            None => Ok(()),
        }
    }
}

fn lock_file(file: &Path) -> MutexGuard<'static, ()> {
    let mut hasher = DefaultHasher::new();
    file.hash(&mut hasher);
    let stripe = &WRITE_LOCKS[(hasher.finish() as usize) % WRITE_LOCK_STRIPES];
    // The guarded section is a single rename, so a panicking holder leaves
    // no partial state behind.
    match stripe.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn unique_suffix() -> String {
    format!("{}-{}", std::process::id(), SEQ.fetch_add(1, Ordering::Relaxed))
}

fn read_document(file: &Path) -> Result<Option<Value>> {
    match std::fs::read(file) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Syncs a directory so that renames and unlinks inside it are durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStoreExt, StoreError};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn documents_are_json_files_under_the_collection_dir() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        store.set("/reviewer/data/diff/42", &json!({"id": 42})).unwrap();

        let file = dir.path().join("reviewer/data/diff/42.json");
        assert!(file.exists());
        assert_eq!(store.get("/reviewer/data/diff/42").unwrap(), Some(json!({"id": 42})));
    }

    #[test]
    fn set_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        store.set("/c/doc", &json!(1)).unwrap();
        store.set("/c/doc", &json!(2)).unwrap();

        assert_eq!(store.get("/c/doc").unwrap(), Some(json!(2)));
        let names: Vec<_> = std::fs::read_dir(dir.path().join("c"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[test]
    fn missing_documents_and_collections() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        assert_eq!(store.get("/nothing/here").unwrap(), None);
        assert!(store.list("/nothing").unwrap().is_empty());
        assert!(store.pop_first("/nothing").unwrap().is_none());
        assert!(!store.delete("/nothing/here").unwrap());
    }

    #[test]
    fn list_ignores_nested_collections_and_stray_files() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        store.set("/c/a", &json!("a")).unwrap();
        store.set("/c/nested/b", &json!("b")).unwrap();
        std::fs::write(dir.path().join("c/a.json.tmp-1-1"), b"partial").unwrap();

        let docs = store.list("/c").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");
    }

    #[test]
    fn add_then_pop_is_fifo() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        for i in 0..10 {
            store.add_doc("/queue", &i).unwrap();
        }
        for i in 0..10 {
            let (_, n): (String, i32) = store.pop_doc("/queue").unwrap().unwrap();
            assert_eq!(n, i);
        }
        assert!(store.pop_first("/queue").unwrap().is_none());
    }

    #[test]
    fn rejects_traversal() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        let err = store.set("/../escape/doc", &json!(1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }

    #[test]
    fn racing_pops_across_store_instances_claim_each_document_once() {
        let dir = tempdir().unwrap();
        let writer = FsDocumentStore::open(dir.path()).unwrap();
        for i in 0..100 {
            writer.add_doc("/queue", &i).unwrap();
        }

        let root = Arc::new(dir.path().to_path_buf());
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let root = Arc::clone(&root);
                std::thread::spawn(move || {
                    let store = FsDocumentStore::open(root.as_path()).unwrap();
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
        assert_eq!(all.len(), 100);
        assert_eq!(all.into_iter().collect::<HashSet<_>>().len(), 100);
    }

    #[test]
    fn concurrent_updates_across_store_instances_are_not_lost() {
        let dir = tempdir().unwrap();
        FsDocumentStore::open(dir.path())
            .unwrap()
            .set_doc("/c/counter", &0u32)
            .unwrap();

        let root = Arc::new(dir.path().to_path_buf());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let root = Arc::clone(&root);
                std::thread::spawn(move || {
                    let store = FsDocumentStore::open(root.as_path()).unwrap();
                    for _ in 0..25 {
                        store
                            .update_doc("/c/counter", |n: &mut u32| {
                                *n += 1;
                                Ok::<_, StoreError>(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let store = FsDocumentStore::open(dir.path()).unwrap();
        assert_eq!(store.get_doc::<u32>("/c/counter").unwrap(), Some(100));
    }

    #[test]
    fn update_of_missing_document_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = FsDocumentStore::open(dir.path()).unwrap();
        let found = store
            .update_doc("/c/missing", |_: &mut u32| Ok::<_, StoreError>(()))
            .unwrap();
        assert!(!found);
        assert!(!dir.path().join("c/missing.json").exists());
    }
}
