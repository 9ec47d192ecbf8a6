//! File-backed [`KeyValueStore`] with atomic replacement.
//!
//! All entries live in one JSON object. Every write rewrites the whole
//! object into a sibling temp file, fsyncs it and renames it over the
//! target, so a crash leaves either the old or the new file, never a torn
//! one.

use super::key_value::{KeyValueStore, KvError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type Entries = BTreeMap<String, String>;

pub struct JsonFileKeyValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries, KvError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(source) => {
                return Err(KvError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(Entries::new());
        }

        serde_json::from_str(&content).map_err(|e| KvError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Load for a read-modify-write cycle. An unreadable file is replaced.
    async fn load_for_update(&self) -> Result<Entries, KvError> {
        match self.load().await {
            Err(e) if e.is_malformed() => {
                warn!("{}; starting from an empty file", e);
                Ok(Entries::new())
            }
            other => other,
        }
    }

    async fn save(&self, entries: &Entries) -> Result<(), KvError> {
        let io_error = |source: std::io::Error| KvError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let content = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.temp_path();

        let mut tmp_file = tokio::fs::File::create(&tmp_path).await.map_err(io_error)?;
        tmp_file
            .write_all(content.as_bytes())
            .await
            .map_err(io_error)?;
        tmp_file.sync_all().await.map_err(io_error)?;
        drop(tmp_file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(io_error)?;
        debug!(bytes = content.len(), "Wrote {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "store".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load_for_update().await?;
        entries.insert(key.to_string(), value);
        self.save(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load_for_update().await?;
        if entries.remove(key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}
