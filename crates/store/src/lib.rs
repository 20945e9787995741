//! synthview file-backed storage adapter.
//!
//! Implements the store traits defined in the [`pipeline`] crate on the local
//! filesystem, and loads the persona list a batch is run over.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Layout,
//! encoding, and durability (temp file + rename, `fsync` on append) are handled
//! here; the [`pipeline`] crate never sees them.
//!
//! ## Layout
//!
//! ```text
//! {data_dir}/
//!   sessions/
//!     {persona_id}-{session_id}.json   # one finished session, pretty JSON
//!   analysis.jsonl                     # one analysis record per line
//! ```

mod analysis;
mod fs;
mod personas;
mod session;

pub use analysis::FileAnalysisStore;
pub use personas::load_personas;
pub use session::FileSessionStore;
