//! Clock sources
//!
//! The ticker reads time through the [`Clock`] trait so hosts can supply their
//! own frame clock, and tests can advance time by hand.

use std::sync::Mutex;
use std::time::Instant;

use crate::lock;

/// A monotonic millisecond time source
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never decreases.
    fn now_ms(&self) -> f64;
}

/// Wall clock backed by `Instant`, with its origin at construction
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// A clock that only moves when told to
///
/// ```ignore
/// let clock = Arc::new(ManualClock::new());
/// let ticker = Ticker::with_clock(clock.clone());
/// clock.advance(16.0);
/// ticker.tick();
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `ms`. Negative steps are ignored.
    pub fn advance(&self, ms: f64) {
        let mut now = lock(&self.now);
        *now += ms.max(0.0);
    }

    /// Jump to an absolute time. Earlier times are ignored.
    pub fn set(&self, ms: f64) {
        let mut now = lock(&self.now);
        *now = now.max(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        *lock(&self.now)
    }
}
