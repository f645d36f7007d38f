// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-ratelimit: the per-credential token bucket, operating purely on
//! `RateLimiterState` rows read and written through `lf-storage` — the
//! only shared mutable state is that row, and `StateStore`'s own
//! per-row mutex gives the serialized read-modify-write the bucket
//! needs.

use chrono::{DateTime, Utc};
use lf_core::{Clock, RateLimiterState};
use lf_storage::{StateStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// `RPM`/`RPD`/`BURST` tunables. Defaults match the original system's
/// `RateLimiter.__init__` defaults (15 req/min, 1500 req/day, burst of
/// 5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    pub requests_per_minute: f64,
    pub requests_per_day: u32,
    pub burst_size: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { requests_per_minute: 15.0, requests_per_day: 1500, burst_size: 5.0 }
    }
}

pub struct RateLimiter<C: Clock> {
    store: Arc<StateStore<C>>,
    clock: C,
    config: RateLimiterConfig,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(store: Arc<StateStore<C>>, clock: C, config: RateLimiterConfig) -> Self {
        Self { store, clock, config }
    }

    fn load_or_fresh(&self, credential: &str) -> RateLimiterState {
        self.store.rate_limiter_state(credential).unwrap_or_else(|| RateLimiterState::fresh(self.clock.now(), self.config.burst_size))
    }

    fn refill(&self, mut state: RateLimiterState, now: DateTime<Utc>) -> RateLimiterState {
        let elapsed_secs = (now - state.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        let refill_rate = self.config.requests_per_minute / 60.0;
        state.tokens = (state.tokens + elapsed_secs * refill_rate).min(self.config.burst_size);
        state.last_refill = now;
        if state.day_start != now.date_naive() {
            state.day_start = now.date_naive();
            state.requests_today = 0;
        }
        state
    }

    /// Refills, rolls the day over if needed, and reports whether a
    /// token is available without consuming one.
    /// `(false, None)` means the daily quota is exhausted — no amount of
    /// waiting helps until the next UTC day.
    pub fn can_acquire(&self, credential: &str) -> Result<(bool, Option<f64>), StoreError> {
        let now = self.clock.now();
        let state = self.refill(self.load_or_fresh(credential), now);
        self.store.update_rate_limiter_state(credential, state.clone())?;
        if state.requests_today >= self.config.requests_per_day {
            return Ok((false, None));
        }
        if state.tokens >= 1.0 {
            return Ok((true, Some(0.0)));
        }
        let wait = (1.0 - state.tokens) * (60.0 / self.config.requests_per_minute);
        Ok((false, Some(wait)))
    }

    fn consume(&self, credential: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.refill(self.load_or_fresh(credential), now);
        state.tokens = (state.tokens - 1.0).max(0.0);
        state.requests_today += 1;
        state.total_requests += 1;
        state.last_request = Some(now);
        self.store.update_rate_limiter_state(credential, state)
    }

    /// Loops until a token is available, the deadline elapses, or the
    /// daily quota is exhausted. Sleeps via `std::thread::sleep` — the
    /// caller is a worker's single-threaded, synchronous main loop, not
    /// an async task.
    pub fn acquire(&self, credential: &str, deadline: Duration) -> Result<bool, StoreError> {
        let start = std::time::Instant::now();
        loop {
            let (ok, wait) = self.can_acquire(credential)?;
            if ok {
                self.consume(credential)?;
                return Ok(true);
            }
            let Some(wait_secs) = wait else {
                tracing::info!(credential, "daily rate limit quota exhausted");
                return Ok(false);
            };
            if start.elapsed() >= deadline {
                return Ok(false);
            }
            let sleep_for = Duration::from_secs_f64((wait_secs.max(0.0) + 0.1).min(5.0));
            std::thread::sleep(sleep_for);
        }
    }
}
