//! Service record repository
//!
//! One directory per service hash holding a pretty-printed `config.json`.
//! Writes go through a temp file in the same directory and an atomic rename,
//! so a crash never leaves a half-written record behind.

use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::services::record::{ServiceRecord, ServiceSummary};
use crate::storage::error::{StorageError, StorageResult};

pub const RECORD_FILE: &str = "config.json";

/// Persistence seam for service records
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Reconstruct the record stored for `hash`
    async fn load(&self, hash: &str) -> StorageResult<ServiceRecord>;

    /// Persist a new record; fails if one is already stored for its hash
    async fn create(&self, record: &ServiceRecord) -> StorageResult<()>;

    /// Atomically overwrite the stored record for `record.hash`
    async fn store(&self, record: &ServiceRecord) -> StorageResult<()>;

    /// Remove the stored record; absent records are ignored
    async fn delete(&self, hash: &str) -> StorageResult<()>;

    async fn exists(&self, hash: &str) -> StorageResult<bool>;

    async fn list(&self) -> StorageResult<Vec<ServiceSummary>>;
}

/// Filesystem-backed repository
#[derive(Debug, Clone)]
pub struct FileServiceRepository {
    root: PathBuf,
}

impl FileServiceRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root if it does not exist yet
    pub async fn setup(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;
        info!(path = %self.root.display(), "Service storage ready");
        Ok(())
    }

    fn service_dir(&self, hash: &str) -> StorageResult<PathBuf> {
        let invalid = hash.is_empty()
            || hash.starts_with('.')
            || hash.contains(['/', '\\'])
            || hash.chars().any(char::is_whitespace);
        if invalid {
            return Err(StorageError::InvalidHash {
                hash: hash.to_string(),
            });
        }
        Ok(self.root.join(hash))
    }

    fn record_path(&self, hash: &str) -> StorageResult<PathBuf> {
        Ok(self.service_dir(hash)?.join(RECORD_FILE))
    }

    async fn write(&self, record: &ServiceRecord) -> StorageResult<()> {
        record
            .check_invariants()
            .map_err(|violation| StorageError::InvariantViolation {
                hash: record.hash.clone(),
                violation,
            })?;

        let path = self.record_path(&record.hash)?;
        let payload =
            serde_json::to_vec_pretty(record).map_err(|e| StorageError::serialization(&path, e))?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &payload))
            .await
            .map_err(|e| StorageError::io(&path, e))??;

        debug!(
            hash = %record.hash,
            state = %record.state(),
            token = %record.token(),
            "Service record persisted"
        );
        Ok(())
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> StorageResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::io(path, "path has no parent"))?;
    std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| StorageError::io(parent, e))?;
    temp.write_all(payload)
        .map_err(|e| StorageError::io(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StorageError::io(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| StorageError::io(path, e.error))?;
    Ok(())
}

#[async_trait]
impl ServiceRepository for FileServiceRepository {
    async fn load(&self, hash: &str) -> StorageResult<ServiceRecord> {
        let path = self.record_path(hash)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    hash: hash.to_string(),
                })
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| StorageError::serialization(&path, e))
    }

    async fn create(&self, record: &ServiceRecord) -> StorageResult<()> {
        if self.exists(&record.hash).await? {
            return Err(StorageError::AlreadyExists {
                hash: record.hash.clone(),
            });
        }
        self.write(record).await?;
        info!(hash = %record.hash, chain = %record.ledger_config.chain, "Service record created");
        Ok(())
    }

    async fn store(&self, record: &ServiceRecord) -> StorageResult<()> {
        self.write(record).await
    }

    async fn delete(&self, hash: &str) -> StorageResult<()> {
        let dir = self.service_dir(hash)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(hash = %hash, "Service record deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(hash = %hash, "Service record already absent");
                Ok(())
            }
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    async fn exists(&self, hash: &str) -> StorageResult<bool> {
        let path = self.record_path(hash)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }

    async fn list(&self) -> StorageResult<Vec<ServiceSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir || !entry.path().join(RECORD_FILE).exists() {
                continue;
            }

            let hash = entry.file_name().to_string_lossy().to_string();
            match self.load(&hash).await {
                Ok(record) => summaries.push(record.summary()),
                Err(e) => warn!(hash = %hash, error = %e, "Skipping unreadable service record"),
            }
        }

        summaries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(summaries)
    }
}
