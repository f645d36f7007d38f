// SPDX-License-Identifier: MIT

//! Clock abstraction for testable time handling.
//!
//! Every durable timestamp in the store (heartbeat time, `started_at`,
//! rate-limiter `last_refill`, ...) is wall-clock UTC, not a monotonic
//! instant, because it must still be meaningful after a process restart.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A clock that provides the current wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for deterministic tests.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { current: Arc::new(Mutex::new(Utc::now())) }
    }

    pub fn at(when: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(when)) }
    }

    pub fn advance(&self, duration: Duration) {
        let mut guard = self.current.lock();
        *guard += chrono::Duration::from_std(duration).unwrap_or_default();
    }

    pub fn set(&self, when: DateTime<Utc>) {
        *self.current.lock() = when;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(90));
        let t1 = clock.now();
        assert_eq!((t1 - t0).num_seconds(), 90);
    }
}
