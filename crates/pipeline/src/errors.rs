//! Error and retry-policy types for the interview domain.
//!
//! [`CompletionError`] covers a single call to the completion service,
//! [`StorageError`] covers the durable stores, [`SessionError`] covers one
//! interview, and [`PipelineError`] covers conditions that halt a whole run.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::PersonaId;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by [`CompletionError::retry_policy`] to let the completion client
/// decide whether to re-issue a request.
///
/// - `Retryable` errors: timeouts, rate limits, server busy / server errors.
/// - `NonRetryable` errors: every other status, transport failures, malformed
///   responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from `Retry-After` response headers).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

/// HTTP statuses treated as transient: request timeout, rate limit, server
/// errors, and the non-standard "overloaded" 529.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 529) || (500..=599).contains(&status)
}

// ---------------------------------------------------------------------------
// Completion errors
// ---------------------------------------------------------------------------

/// Failure of a call to the completion service.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// No response within the configured request timeout.
    #[error("completion request timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a non-success status.
    #[error("completion service returned status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Raw response body, kept for diagnostics.
        body: String,
        /// Server-provided retry hint, if any.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response (DNS, TLS, connection reset).
    #[error("completion transport failed: {message}")]
    Transport { message: String },

    /// The service answered 2xx but the body could not be decoded.
    #[error("malformed completion response: {message}")]
    Malformed { message: String, body: String },

    /// Transient failures persisted past the retry budget.
    #[error("completion failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<CompletionError>,
    },
}

impl CompletionError {
    /// Classifies this error for the completion client's retry loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            CompletionError::Timeout(_) => RetryPolicy::Retryable { after: None },
            CompletionError::Status {
                status,
                retry_after,
                ..
            } if is_transient_status(*status) => RetryPolicy::Retryable {
                after: *retry_after,
            },
            _ => RetryPolicy::NonRetryable,
        }
    }

    /// HTTP status of the failure, if the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Status { status, .. } => Some(*status),
            CompletionError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Raw response body of the failure, if one was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            CompletionError::Status { body, .. } | CompletionError::Malformed { body, .. } => {
                Some(body)
            }
            CompletionError::RetriesExhausted { last, .. } => last.body(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors raised by the durable session and analysis stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be decoded.
    #[error("deserialization error at {path}: {message}")]
    FileDeserialization { path: PathBuf, message: String },

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Input data violates a domain invariant.
    #[error("invalid {entity_type} '{id}': {reason}")]
    Invalid {
        entity_type: &'static str,
        id: String,
        reason: String,
    },
}

impl StorageError {
    /// Create a file I/O error with path context.
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Create a file deserialization error with path context.
    pub fn file_deserialization(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create an invariant violation error.
    pub fn invalid(
        entity_type: &'static str,
        id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            entity_type,
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience type alias for storage results.
pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Unrecoverable failure of one interview session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The respondent produced no usable answer within its attempt budget.
    #[error("respondent gave no usable answer at step {step} after {attempts} attempts")]
    RespondentExhausted {
        /// Zero-based script step index.
        step: usize,
        attempts: u32,
        /// The last completion error seen, if the final failure was not an
        /// empty answer.
        #[source]
        last_error: Option<CompletionError>,
    },
}

// ---------------------------------------------------------------------------
// Run-level errors
// ---------------------------------------------------------------------------

/// Errors that halt a whole run.
///
/// Per-record analysis failures never surface here; they degrade to an empty
/// record inside the analysis stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The project configuration is invalid. Produced at load time; a run
    /// never starts with an invalid config.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },

    /// A required credential is not available.
    #[error("Missing credential: environment variable '{name}' is not set")]
    MissingCredential {
        /// Environment variable the credential is read from.
        name: String,
    },

    /// One interview failed terminally, which fails the batch.
    #[error("Session for persona {persona_id} failed: {source}")]
    Session {
        persona_id: PersonaId,
        #[source]
        source: SessionError,
    },

    /// A durable store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A spawned worker panicked or was aborted.
    #[error("Worker task failed: {message}")]
    Task { message: String },
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }
}
