// SPDX-License-Identifier: MIT

use super::*;
use tempfile::tempdir;

#[test]
fn socket_path_is_rooted_under_run() {
    let dir = tempdir().unwrap();
    let client = DaemonClient::new(dir.path());
    assert_eq!(client.socket_path, dir.path().join("run").join("lfd.sock"));
}

#[tokio::test]
async fn send_against_a_missing_socket_reports_connect_error() {
    let dir = tempdir().unwrap();
    let client = DaemonClient::new(dir.path());
    let err = client.send(&lf_ipc::Request::Ping).await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }));
}
