//! Directory-backed key-value store
//!
//! Each key maps to `<hex(key)>.json` inside the directory, so arbitrary
//! keys are safe file names and [`keys`](KeyValueStore::keys) can recover
//! them. Each write goes to its own `.tmp` sibling that is synced and then
//! renamed over the target, so concurrent writers of one key never share a
//! temp file and the last rename wins.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use resilink_common::error::{CommonError, CommonResult};
use resilink_core::KeyValueStore;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> CommonResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            CommonError::persistence_op("open", format!("{}: {e}", dir.display()))
        })?;
        debug!(path = %dir.display(), "file store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{RECORD_EXTENSION}", hex::encode(key)))
    }

    /// `<hex(key)>.<pid>-<seq>.tmp`, unique per write
    fn temp_path_for(&self, key: &str) -> PathBuf {
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}-{seq}.{TEMP_EXTENSION}",
            hex::encode(key),
            std::process::id()
        ))
    }

    async fn write_and_rename(
        &self,
        temp: &Path,
        target: &Path,
        value: &str,
    ) -> std::io::Result<()> {
        let mut file = fs::File::create(temp).await?;
        file.write_all(value.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(temp, target).await
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_string(&self, key: &str) -> CommonResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CommonError::persistence_op("read", format!("{key}: {e}"))),
        }
    }

    async fn set_string(&self, key: &str, value: &str) -> CommonResult<()> {
        let target = self.path_for(key);
        let temp = self.temp_path_for(key);

        if let Err(e) = self.write_and_rename(&temp, &target, value).await {
            let _ = fs::remove_file(&temp).await;
            return Err(CommonError::persistence_op("write", format!("{key}: {e}")));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> CommonResult<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CommonError::persistence_op("remove", format!("{key}: {e}"))),
        }
    }

    async fn keys(&self) -> CommonResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| CommonError::persistence_op("list", e.to_string()))?;

        let mut keys = Vec::new();
        let list_err = |e: std::io::Error| CommonError::persistence_op("list", e.to_string());
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            match hex::decode(stem).ok().and_then(|raw| String::from_utf8(raw).ok()) {
                Some(key) => keys.push(key),
                None => warn!(file = %path.display(), "ignoring foreign file in store directory"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("kv")).await.unwrap();

        store.set_string("resilink.cache.abc", "{\"a\":1}").await.unwrap();
        store.set_string("resilink.offline_queue", "[]").await.unwrap();
        store.set_string("resilink.cache.abc", "{\"a\":2}").await.unwrap();

        assert_eq!(
            store.get_string("resilink.cache.abc").await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        assert_eq!(
            store.keys().await.unwrap(),
            vec!["resilink.cache.abc".to_string(), "resilink.offline_queue".to_string()]
        );

        store.remove("resilink.cache.abc").await.unwrap();
        store.remove("resilink.cache.abc").await.unwrap();
        assert_eq!(store.get_string("resilink.cache.abc").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_one_key() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(FileStore::open(dir.path()).await.unwrap());

        let writers: Vec<_> = (0..64)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    store.set_string("resilink.cache.same", &format!("{{\"writer\":{i}}}")).await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let stored = store.get_string("resilink.cache.same").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert!(value["writer"].as_u64().is_some_and(|i| i < 64));
        assert_eq!(store.keys().await.unwrap(), vec!["resilink.cache.same".to_string()]);

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|e| e == TEMP_EXTENSION))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_survives_reopen_and_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.set_string("k/with:odd chars", "v").await.unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("zz-not-hex.json"), "x").unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["k/with:odd chars".to_string()]);
        assert_eq!(store.get_string("k/with:odd chars").await.unwrap().as_deref(), Some("v"));
    }
}
