//! Port traits implemented by infrastructure crates.
//!
//! The stages crate depends only on these traits; `llm` supplies the
//! completion provider and `store` supplies the durable stores.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::{CompletionError, StorageResult};
use crate::{AnalysisRecord, CompletionRequest, CompletionResult, PersonaId, Session};

/// Issues completion requests to a text-completion service.
///
/// Implementations own transport-level resilience: by the time an error is
/// returned, every retry the implementation is willing to make has been made.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResult, CompletionError>;
}

/// Durable, append-only store of finished interview sessions.
///
/// One record per session. The presence of a record for a persona is the
/// sole marker that the persona's interview is complete.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persona ids that already have a completed session on record.
    async fn completed_personas(&self) -> StorageResult<HashSet<PersonaId>>;

    /// Persists a finished session. Must be durable before returning.
    async fn save(&self, session: &Session) -> StorageResult<()>;

    /// Loads every readable stored session; unreadable documents are skipped,
    /// matching `completed_personas`.
    async fn load_all(&self) -> StorageResult<Vec<Session>>;
}

/// Durable, append-only store of analysis records.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persona ids that already have an analysis record.
    async fn analyzed_personas(&self) -> StorageResult<HashSet<PersonaId>>;

    /// Appends one record. Must be durable before returning.
    async fn append(&self, record: &AnalysisRecord) -> StorageResult<()>;
}
