// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-core: shared identifiers, domain types, clock abstraction, file
//! utilities, and configuration loading for the labelforge annotation
//! fleet.

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod fsutil;
pub mod ids;
pub mod model;
pub mod process;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{Config, Credentials, DomainConfig, GlobalConfig};
pub use control::{control_path, ControlCommand, ControlSignal};
pub use error::ConfigError;
pub use event::Event;
pub use ids::{AnnotatorId, Domain, WorkerKey};
pub use model::{
    AnnotationRecord, HeartbeatStatus, RateLimiterState, WorkerEventType, WorkerSnapshot,
    WorkerStatus,
};
pub use process::{is_alive, is_worker_alive};
