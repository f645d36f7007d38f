// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! lf-storage: the durable state store — a write-ahead log of `Event`s,
//! a `MaterializedState` folded from it, snapshot-based checkpointing,
//! and the transactional `StateStore` facade every other component
//! reads and writes through.

pub mod snapshot;
pub mod state;
pub mod store;
pub mod wal;

pub use snapshot::{Checkpointer, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::{HeartbeatRow, MaterializedState, SystemState, WorkerEventRow, WorkerRow};
pub use store::{StateStore, StoreError, HEARTBEAT_TIMEOUT_SECS};
pub use wal::{Wal, WalEntry, WalError};
