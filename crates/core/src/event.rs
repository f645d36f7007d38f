// SPDX-License-Identifier: MIT

//! Events are the facts the state store's write-ahead log persists.
//! `MaterializedState` (in `lf-storage`) is derived entirely by folding
//! these in order; nothing else may mutate state.
//!
//! Event handlers that fold an `Event` into `MaterializedState` MUST be
//! idempotent: replaying the same event twice (after a crash mid-WAL-flush,
//! for instance) must produce the same state as replaying it once.

use crate::ids::WorkerKey;
use crate::model::{AnnotationRecord, HeartbeatStatus, RateLimiterState, WorkerEventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Upserts a Worker row per `(annotator, domain)` pair from
    /// configuration. Preserves progress for existing rows.
    WorkerInitialized { worker: WorkerKey, enabled: bool, target_count: u32 },

    /// Sets/clears `pid`, `started_at`, `stopped_at` per status, and
    /// appends a WorkerEvent row.
    WorkerStatusChanged {
        worker: WorkerKey,
        status_label: String,
        pid: Option<u32>,
        event_type: WorkerEventType,
        at: DateTime<Utc>,
    },

    /// A sample was completed or recorded malformed. Idempotent on
    /// `(worker, sample_id)` — folding must not double-count a replayed
    /// duplicate.
    SampleCompleted {
        worker: WorkerKey,
        sample_id: String,
        label: String,
        is_malformed: bool,
        at: DateTime<Utc>,
    },

    /// Append-only; no uniqueness constraint, duplicates permitted on
    /// crash-retry.
    AnnotationSaved { worker: WorkerKey, record: AnnotationRecord },

    /// Upsert-in-place heartbeat row.
    HeartbeatSent { worker: WorkerKey, pid: u32, iteration: u64, status: HeartbeatStatus, at: DateTime<Utc> },

    /// Heartbeat row deleted (worker shutdown).
    HeartbeatCleared { worker: WorkerKey },

    /// Recomputed samples-per-minute, persisted every `S_iter` iterations.
    SpeedUpdated { worker: WorkerKey, samples_per_min: f64 },

    /// Rate limiter row replaced wholesale after a refill/consume cycle.
    RateLimiterUpdated { credential: String, state: RateLimiterState },

    /// Scoped reset: clears CompletedSample/Annotation/Heartbeat/
    /// WorkerEvent/RateLimiterState for one worker; preserves `enabled`
    /// and `target_count`.
    WorkerReset { worker: WorkerKey, at: DateTime<Utc> },

    /// Unscoped reset: same as `WorkerReset` but for every worker and
    /// every rate limiter row, plus records `SystemState.last_factory_reset`.
    FactoryReset { at: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AnnotatorId;

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::WorkerInitialized {
            worker: WorkerKey::new(AnnotatorId::new(1), "urgency"),
            enabled: true,
            target_count: 10,
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }
}
