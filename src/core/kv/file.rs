//! JSON-file key/value store
//!
//! `JsonFileStore` keeps every key in a single JSON object on disk. Each
//! write rewrites the document to a sibling temp file, syncs it, and renames
//! it over the original, so a crash leaves either the old or the new
//! document, never a torn one. Every call holds an exclusive advisory lock on
//! a sibling `<name>.lock` file for its whole read-modify-write, so stores in
//! different processes sharing one path see each other's calls as atomic.
//! Calls on one store are additionally serialized through an async mutex, so
//! only one task per process waits on the file lock.
//!
//! A document that cannot be parsed is moved aside (`<name>.corrupt`) and the
//! store starts empty; the queue is then rebuilt from defaults rather than
//! blocking every later write.

use crate::core::traits::KeyValueStore;
use crate::types::StoreError;
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Durable key/value store backed by one JSON file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store at `path`; the file is created on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until this process holds the exclusive lock on the lock file
    async fn lock_file(&self) -> Result<FileLock, StoreError> {
        self.ensure_parent().await?;
        let path = self.sibling("lock");
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| StoreError::Io {
            message: format!("state file lock task failed: {}", e),
        })??;
        Ok(FileLock(file))
    }

    async fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(document) => Ok(document),
            Err(e) => {
                let aside = self.sibling("corrupt");
                log::error!(
                    "State file '{}' is unreadable ({}); moving it to '{}'",
                    self.path.display(),
                    e,
                    aside.display()
                );
                tokio::fs::rename(&self.path, &aside).await?;
                Ok(Map::new())
            }
        }
    }

    async fn save(&self, document: &Map<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::serialization("<document>", e))?;
        let tmp = self.sibling("tmp");

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

/// Exclusive advisory lock on the lock file, released on drop
struct FileLock(File);

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.0) {
            log::warn!("Failed to unlock state file: {}", e);
        }
    }
}

impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock_file().await?;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock_file().await?;
        let mut document = self.load().await?;
        document.insert(key.to_string(), value);
        self.save(&document).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock_file().await?;
        let mut document = self.load().await?;
        if document.remove(key).is_some() {
            self.save(&document).await?;
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        current: Option<&Value>,
        new: Value,
    ) -> Result<bool, StoreError> {
        let _guard = self.guard.lock().await;
        let _lock = self.lock_file().await?;
        let mut document = self.load().await?;
        if document.get(key) != current {
            return Ok(false);
        }
        document.insert(key.to_string(), new);
        self.save(&document).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> JsonFileStore {
        JsonFileStore::new(dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get("queue_state").await.unwrap(), None);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        store_in(&dir)
            .set("queue_state", json!({"status": "PROCESSING"}))
            .await
            .unwrap();

        let reopened = store_in(&dir);
        assert_eq!(
            reopened.get("queue_state").await.unwrap(),
            Some(json!({"status": "PROCESSING"}))
        );
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_remove_and_compare_and_swap() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(store.compare_and_swap("lock", None, json!(1)).await.unwrap());
        assert!(!store.compare_and_swap("lock", None, json!(2)).await.unwrap());
        assert!(store
            .compare_and_swap("lock", Some(&json!(1)), json!(3))
            .await
            .unwrap());
        assert_eq!(store.get("lock").await.unwrap(), Some(json!(3)));

        store.remove("lock").await.unwrap();
        store.remove("lock").await.unwrap();
        assert_eq!(store.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/deeper/state.json"));
        store.set("k", json!(true)).await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("queue_state").await.unwrap(), None);
        assert!(dir.path().join("state.json.corrupt").exists());

        store.set("k", json!(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_stores_on_one_path_cannot_both_win_a_swap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let attempts: Vec<_> = (0..8)
            .map(|i| {
                let store = JsonFileStore::new(&path);
                tokio::spawn(async move {
                    store
                        .compare_and_swap("processing_lock", None, json!(i))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_stores_on_one_path_keep_every_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = JsonFileStore::new(&path);
                tokio::spawn(async move {
                    store.set(&format!("key{}", i), json!(i)).await.unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let reader = JsonFileStore::new(&path);
        for i in 0..8 {
            assert_eq!(reader.get(&format!("key{}", i)).await.unwrap(), Some(json!(i)));
        }
    }
}
