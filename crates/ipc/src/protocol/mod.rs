// SPDX-License-Identifier: MIT

//! The daemon control protocol: the `Request`/`Response` pair `lfctl`
//! and `lfd` exchange over the control socket, framed by [`crate::wire`]
//! as a 4-byte big-endian length prefix followed by a JSON payload.

mod request;
mod response;

pub use request::{Request, FACTORY_RESET_CONFIRMATION};
pub use response::{Response, StartAllSummary, WorkerStatusView};
