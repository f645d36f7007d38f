// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

/// Confirmation string `lfctl factory-reset` must echo back and the
/// daemon must see verbatim before it will wipe the store: factory
/// reset is a destructive, explicitly-confirmed operation.
pub const FACTORY_RESET_CONFIRMATION: &str = "FACTORY_RESET";

/// One request frame sent from `lfctl` to `lfd` over the control
/// socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    WorkerStart { annotator: u32, domain: String },
    WorkerStop { annotator: u32, domain: String },
    WorkerPause { annotator: u32, domain: String },
    WorkerResume { annotator: u32, domain: String },
    WorkerRestart { annotator: u32, domain: String },
    WorkerStatus { annotator: u32, domain: String },
    StatusAll,
    StartAll,
    StopAll,
    /// Wipes the entire store. `confirm` must equal
    /// [`FACTORY_RESET_CONFIRMATION`] verbatim or the daemon refuses.
    FactoryReset { confirm: String },
}
