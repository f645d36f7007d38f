// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-supervisor: the worker lifecycle controller and crash watchdog.
//! Each worker is a separate OS process; this crate owns spawning,
//! signaling, and stopping those processes, and reconciling the
//! in-memory handle table against the durable store
//! after a supervisor restart.

mod manager;
mod watchdog;

pub use manager::{StartAllSummary, StartOutcome, StopOutcome, SupervisorError, WorkerManager};
pub use watchdog::{Watchdog, WatchdogConfig};
