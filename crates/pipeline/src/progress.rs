//! Progress reporting for completion calls.
//!
//! The completion client ticks a [`ProgressHandle`] once per successful call.
//! A rendering collaborator (the CLI's progress bar) registers itself as the
//! active [`ProgressSink`] on that handle; at most one sink is active at a
//! time and the slot may be empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Receives one notification per successful completion call.
pub trait ProgressSink: Send + Sync {
    fn tick(&self);
}

/// Shared, replaceable, nullable slot holding the active [`ProgressSink`].
///
/// Cloning the handle shares the slot.
#[derive(Clone, Default)]
pub struct ProgressHandle {
    active: Arc<RwLock<Option<Arc<dyn ProgressSink>>>>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `sink` as the active sink, returning the one it replaced.
    pub fn register(&self, sink: Arc<dyn ProgressSink>) -> Option<Arc<dyn ProgressSink>> {
        let mut slot = self.active.write().unwrap_or_else(|e| e.into_inner());
        slot.replace(sink)
    }

    /// Empties the slot, returning the sink that was active.
    pub fn clear(&self) -> Option<Arc<dyn ProgressSink>> {
        let mut slot = self.active.write().unwrap_or_else(|e| e.into_inner());
        slot.take()
    }

    /// Forwards a tick to the active sink, if any.
    pub fn tick(&self) {
        let slot = self.active.read().unwrap_or_else(|e| e.into_inner());
        if let Some(sink) = slot.as_ref() {
            sink.tick();
        }
    }
}

impl std::fmt::Debug for ProgressHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .active
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        f.debug_struct("ProgressHandle")
            .field("active", &active)
            .finish()
    }
}

/// A monotonic atomic counter sink.
#[derive(Debug, Default)]
pub struct CountingSink {
    count: AtomicU64,
}

impl CountingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl ProgressSink for CountingSink {
    fn tick(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }
}
