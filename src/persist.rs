//! Durable participant records
//!
//! Provides pluggable persistence for participant records so pairing
//! state survives process restarts. The `ParticipantStore` writes a
//! record through on every mutation and loads everything on open.

use crate::error::{PairError, Result};
use crate::types::{Participant, ParticipantId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Trait for persisting participant records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Save (insert or overwrite) a single record
    async fn save(&self, participant: &Participant) -> Result<()>;

    /// Load all records keyed by id
    async fn load(&self) -> Result<HashMap<ParticipantId, Participant>>;
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    async fn save(&self, participant: &Participant) -> Result<()> {
        (**self).save(participant).await
    }

    async fn load(&self) -> Result<HashMap<ParticipantId, Participant>> {
        (**self).load().await
    }
}

/// JSON file-based record store
///
/// One file per participant under a directory:
/// ```text
/// <dir>/
///   <encoded-id>.json
/// ```
/// Atomic writes via temp file + rename to prevent corruption.
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    /// Create a new file record store rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding a participant's record
    pub fn record_path(&self, id: &ParticipantId) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(id.as_str())))
    }
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so distinct ids
/// never map to the same file name.
fn encode_file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn save(&self, participant: &Participant) -> Result<()> {
        let json = serde_json::to_string_pretty(participant)?;

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            PairError::Persistence(format!(
                "Failed to create record directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        // Atomic write: write to temp file, then rename
        let path = self.record_path(&participant.id);
        let tmp_path = path.with_extension("json.tmp");

        let write_tmp = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await
        };
        write_tmp.await.map_err(|e| {
            PairError::Persistence(format!(
                "Failed to write record file {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        fs::rename(&tmp_path, &path).await.map_err(|e| {
            PairError::Persistence(format!(
                "Failed to rename record file {} to {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::debug!(
            participant = %participant.id,
            state = %participant.state,
            path = %path.display(),
            "Record saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<HashMap<ParticipantId, Participant>> {
        let mut records = HashMap::new();
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(records);
        }

        let mut entries = fs::read_dir(&self.dir).await.map_err(|e| {
            PairError::Persistence(format!(
                "Failed to read record directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PairError::Persistence(e.to_string()))?
        {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            let json = fs::read_to_string(&path).await.map_err(|e| {
                PairError::Persistence(format!(
                    "Failed to read record file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let participant: Participant = serde_json::from_str(&json).map_err(|e| {
                PairError::Persistence(format!(
                    "Failed to parse record file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            records.insert(participant.id.clone(), participant);
        }

        tracing::debug!(
            dir = %self.dir.display(),
            count = records.len(),
            "Records loaded"
        );
        Ok(records)
    }
}

/// In-memory record store for testing
///
/// Stores records in memory; lost on drop.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<ParticipantId, Participant>>,
}

impl MemoryRecordStore {
    /// Create a store pre-populated with records
    pub fn with_records(records: impl IntoIterator<Item = Participant>) -> Self {
        let map = records.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self {
            records: RwLock::new(map),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, participant: &Participant) -> Result<()> {
        self.records
            .write()
            .await
            .insert(participant.id.clone(), participant.clone());
        Ok(())
    }

    async fn load(&self) -> Result<HashMap<ParticipantId, Participant>> {
        Ok(self.records.read().await.clone())
    }
}
