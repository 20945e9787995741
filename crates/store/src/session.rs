//! File-based session storage.
//!
//! Each finished session is one pretty-printed JSON document named
//! `{persona_id}-{session_id}.json`. The session id is a fresh UUID, so
//! concurrent writers never target the same file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use pipeline::{PersonaId, Session, SessionStore, StorageError, StorageResult};

use crate::fs::{atomic_write_file, ensure_dir, file_name_problem};

const SESSION_EXTENSION: &str = "json";

/// File-based implementation of [`SessionStore`].
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    sessions_dir: PathBuf,
}

impl FileSessionStore {
    /// Create a new file session store.
    ///
    /// The directory is created when the first session is saved.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, session: &Session) -> PathBuf {
        self.sessions_dir.join(format!(
            "{}-{}.{SESSION_EXTENSION}",
            session.persona_id, session.id
        ))
    }

    /// Paths of every stored session document, sorted by file name.
    async fn session_files(&self) -> StorageResult<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(&self.sessions_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.sessions_dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.sessions_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SESSION_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    async fn read_session(path: &Path) -> StorageResult<Session> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::file_io(path, e))?;
        serde_json::from_str(&contents)
            .map_err(|e| StorageError::file_deserialization(path, e.to_string()))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn completed_personas(&self) -> StorageResult<HashSet<PersonaId>> {
        let mut done = HashSet::new();
        for path in self.session_files().await? {
            // A file that no longer parses does not mark its persona done.
            match Self::read_session(&path).await {
                Ok(session) => {
                    done.insert(session.persona_id);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }
        Ok(done)
    }

    async fn save(&self, session: &Session) -> StorageResult<()> {
        if let Some(reason) = file_name_problem(session.persona_id.as_str()) {
            return Err(StorageError::invalid(
                "persona",
                session.persona_id.as_str(),
                reason,
            ));
        }
        ensure_dir(&self.sessions_dir).await?;
        let path = self.session_path(session);
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        let temp_path = path.with_extension("json.tmp");
        atomic_write_file(&temp_path, &path, json.as_bytes()).await?;
        debug!(path = %path.display(), turns = session.turns.len(), "saved session");
        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<Session>> {
        let mut sessions = Vec::new();
        for path in self.session_files().await? {
            match Self::read_session(&path).await {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }
        Ok(sessions)
    }
}
