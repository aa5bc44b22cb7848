//! Local key-value persistence for the offline queue and access history.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use thiserror::Error;

/// Errors from a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding error for key {key}: {message}")]
    Encoding { key: String, message: String },
}

/// Byte-oriented key-value store.
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError>;
}

/// Encode a value as JSON and save it.
pub async fn save_json<T: serde::Serialize + ?Sized>(
    store: &dyn Persistence,
    key: &str,
    value: &T,
) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec(value).map_err(|e| PersistenceError::Encoding {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.save(key, bytes).await
}

/// Load and decode a JSON value. Missing keys yield `Ok(None)`.
pub async fn load_json<T: serde::de::DeserializeOwned>(
    store: &dyn Persistence,
    key: &str,
) -> Result<Option<T>, PersistenceError> {
    let Some(bytes) = store.load(key).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| PersistenceError::Encoding { key: key.to_string(), message: e.to_string() })
}

/// In-memory store. Shares nothing across processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }
}

/// One file per key under a directory.
///
/// Writes go to a temp file first and are renamed into place, so a crash
/// mid-write never leaves a truncated value behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait::async_trait]
impl Persistence for FileStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io { key: key.to_string(), source }),
        }
    }

    async fn save(&self, key: &str, bytes: Vec<u8>) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io { key: key.to_string(), source };
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &target).await.map_err(io_err)?;
        Ok(())
    }
}
