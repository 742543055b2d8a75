//! Wall-clock access for the scheduler.
//!
//! Every deadline in the engine is an absolute epoch timestamp in
//! milliseconds, so the clock only has to answer "what time is it now".
//! Elapsed-tick counters are never used as a source of truth.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use chrono::Utc;

/// Milliseconds since the Unix epoch.
pub type EpochMs = i64;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> EpochMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> EpochMs {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to. Clones share the same instant, so a
/// host (or a test) can hold one handle while the controller holds another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: EpochMs) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: EpochMs) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.now.load(Ordering::SeqCst)
    }
}
