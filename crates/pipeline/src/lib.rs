//! Core domain for synthview, the synthetic-interview runner.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, error type and port trait used throughout the workspace, plus the
//! pure text heuristics (JSON location, utterance sanitising) that the stages
//! rely on. Infrastructure crates implement the traits defined here; they
//! never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`PersonaId`, `SessionId`, `ModelId`, etc.) |
//! | [`types`] | Value types (`CompletionRequest`, `Session`, `AnalysisRecord`, etc.) |
//! | [`errors`] | Error types and the [`RetryPolicy`] classification |
//! | [`ports`] | Traits for the completion provider and durable stores |
//! | [`progress`] | The replaceable progress sink slot |
//! | [`extract`] | Locating JSON inside prose |
//! | [`sanitize`] | Cleaning conversational model output |

pub mod errors;
pub mod extract;
pub mod identifiers;
pub mod ports;
pub mod progress;
pub mod sanitize;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{
    is_transient_status, CompletionError, PipelineError, RetryPolicy, SessionError,
    StorageError, StorageResult,
};
pub use extract::extract_json;
pub use identifiers::{FieldKey, ModelId, PersonaId, ProjectName, SegmentId, SessionId};
pub use ports::{AnalysisStore, CompletionProvider, SessionStore};
pub use progress::{CountingSink, ProgressHandle, ProgressSink};
pub use sanitize::sanitize_utterance;
pub use types::{
    AnalysisRecord, Candidate, CompletionRequest, CompletionResult, FieldSpec, InterviewerMode,
    Persona, Role, ScriptStep, Segment, Session, Timestamp, Turn,
};
