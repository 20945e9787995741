//! File-based analysis record storage: one JSON line per record.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use pipeline::{AnalysisRecord, AnalysisStore, PersonaId, StorageError, StorageResult};

use crate::fs::ensure_dir;

/// File-based implementation of [`AnalysisStore`].
///
/// Appends are serialized through a lock so concurrent writers never
/// interleave partial lines.
#[derive(Debug)]
pub struct FileAnalysisStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAnalysisStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every readable record, in append order. Malformed lines, such as
    /// a torn final line after a crash, are skipped.
    pub async fn load_all(&self) -> StorageResult<Vec<AnalysisRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.path, e)),
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<AnalysisRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = index + 1, error = %e, "skipping malformed analysis line"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AnalysisStore for FileAnalysisStore {
    async fn analyzed_personas(&self) -> StorageResult<HashSet<PersonaId>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .map(|r| r.persona_id)
            .collect())
    }

    async fn append(&self, record: &AnalysisRecord) -> StorageResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::file_io(&self.path, e))?;

        debug!(persona = %record.persona_id, "appended analysis record");
        Ok(())
    }
}
