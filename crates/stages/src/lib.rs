//! synthview orchestration stages.
//!
//! This crate provides the interview [`SessionRunner`], the resumable
//! [`BatchScheduler`] that fans sessions out under a concurrency cap, and the
//! analysis [`FallbackCascade`] with its [`AnalysisBatch`] driver.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Stages sequence calls between the pure helpers in
//! the [`pipeline`] crate and the port traits it defines
//! ([`pipeline::CompletionProvider`], [`pipeline::SessionStore`],
//! [`pipeline::AnalysisStore`]). They never touch HTTP or the filesystem
//! directly.
//!
//! ## Failure asymmetry
//!
//! A respondent turn that exhausts its budget fails its session, and the
//! first failed session stops the interview batch. Analysis is the opposite:
//! an unusable transcript degrades to an empty record and the batch carries on.

mod analysis;
mod batch;
mod interview;
pub mod prompts;

#[cfg(test)]
mod testing;

pub use analysis::{parse_loose, parse_strict, AnalysisBatch, AnalysisPlan, FallbackCascade};
pub use batch::BatchScheduler;
pub use interview::{InterviewConfig, SessionRunner, TurnBudgets};
