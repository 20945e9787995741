//! synthview completion infrastructure adapter.
//!
//! Implements the [`pipeline::CompletionProvider`] trait. [`CompletionClient`]
//! owns retry and back-off over any single-attempt [`CompletionBackend`];
//! [`HttpBackend`] is the OpenAI-compatible HTTP transport used in production.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, request formatting, response parsing,
//! rate-limit header tracking, and exponential back-off live here. The
//! [`pipeline`] crate sees only [`pipeline::CompletionProvider`].

mod client;
mod http;

pub use client::{CompletionBackend, CompletionClient, RetryConfig};
pub use http::HttpBackend;
