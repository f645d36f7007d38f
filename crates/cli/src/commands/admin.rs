// SPDX-License-Identifier: MIT

//! Administrative commands: liveness check and the destructive,
//! explicitly-confirmed factory reset.

use anyhow::Result;

use crate::client::DaemonClient;
use crate::color;
use lf_ipc::{Request, Response, FACTORY_RESET_CONFIRMATION};

pub async fn ping(client: &DaemonClient) -> Result<()> {
    match client.send(&Request::Ping).await? {
        Response::Pong => println!("{}", color::header("pong")),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

/// `confirm` must equal [`FACTORY_RESET_CONFIRMATION`] verbatim; the
/// daemon re-checks this itself, but failing fast here avoids a round
/// trip for an obvious typo.
pub async fn factory_reset(client: &DaemonClient, confirm: String) -> Result<()> {
    if confirm != FACTORY_RESET_CONFIRMATION {
        anyhow::bail!(
            "refusing factory reset: pass --confirm {} to proceed",
            FACTORY_RESET_CONFIRMATION
        );
    }
    match client.send(&Request::FactoryReset { confirm }).await? {
        Response::FactoryResetDone => println!("{}", color::bad("factory reset complete, all state wiped")),
        other => anyhow::bail!("unexpected response: {other:?}"),
    }
    Ok(())
}
