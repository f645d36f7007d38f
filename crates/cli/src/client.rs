// SPDX-License-Identifier: MIT

//! `DaemonClient`: one request, one response, over the `lfd` control
//! socket at `<root>/run/lfd.sock`. A thin request/response sender plus
//! per-noun methods, with no connection pooling, since `lfctl` only
//! ever makes one round trip per invocation.

use std::path::{Path, PathBuf};

use lf_ipc::{Request, Response};
use thiserror::Error;
use tokio::net::UnixStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not reach the daemon at {path}: {source}")]
    Connect { path: PathBuf, #[source] source: std::io::Error },
    #[error("protocol error: {0}")]
    Protocol(#[from] lf_ipc::ProtocolError),
    #[error("daemon returned an error: {0}")]
    Daemon(String),
}

pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn new(root: &Path) -> Self {
        Self { socket_path: root.join("run").join("lfd.sock") }
    }

    pub async fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| ClientError::Connect { path: self.socket_path.clone(), source })?;
        lf_ipc::write_message(&mut stream, request).await?;
        let response: Response = lf_ipc::read_message(&mut stream).await?;
        if let Response::Error { message } = response {
            return Err(ClientError::Daemon(message));
        }
        Ok(response)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
