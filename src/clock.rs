//! Time source abstraction.
//!
//! Every decay, deadline and cooldown in the engine reads time through [`Clock`]
//! so scenarios can be replayed against a [`ManualClock`] without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Seconds since the Unix epoch, fractional.
pub type Timestamp = f64;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis() as f64 / 1000.0
    }
}

/// Virtual clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, t: Timestamp) {
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) -> Timestamp {
        let next = self.now() + secs;
        self.set(next);
        next
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
