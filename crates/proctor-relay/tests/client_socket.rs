//! Client socket integration tests
//!
//! Runs the real Unix-socket listener and speaks the framed protocol to it,
//! covering peer-credential identification, the hello handshake and a full
//! request/response round trip.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use proctor_core::acl::SystemGroups;
use proctor_core::config::RelayConfig;
use proctor_core::unix;
use proctor_protocol::{FrameCodec, Response, HELLO_ID};
use proctor_relay::client::run_client_listener;
use proctor_relay::RelayState;

async fn start_relay(acl_line: &str) -> (CancellationToken, std::path::PathBuf, tempfile::TempDir)
{
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("relay.sock");
    let toml = format!(
        "[relay]\nsocket_path = \"{}\"\n\n[acl]\n{}\n",
        socket.display(),
        acl_line
    );
    let config = RelayConfig::from_toml(&toml).unwrap();
    let state = RelayState::new(config, Arc::new(SystemGroups));

    let cancel = CancellationToken::new();
    tokio::spawn(run_client_listener(state, cancel.clone()));

    // Wait for the listener to bind
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(socket.exists(), "listener did not bind");

    (cancel, socket, dir)
}

#[tokio::test]
async fn test_hello_and_request_round_trip() {
    let me = unix::current_username().expect("current user has a passwd entry");
    let (cancel, socket, _dir) = start_relay(&format!("\"{}\" = \"ALL: ALL\"", me)).await;

    let stream = UnixStream::connect(&socket).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new());

    let payload = framed.next().await.unwrap().unwrap();
    let hello: Response = serde_json::from_slice(&payload).unwrap();
    assert_eq!(hello.request, "hello");
    assert_eq!(hello.request_id, HELLO_ID);
    assert_eq!(hello.error, "");

    // No hosts configured: listUsers answers with an empty list
    let request = serde_json::to_vec(&json!({"request": "listUsers", "args": []})).unwrap();
    framed.send(Bytes::from(request)).await.unwrap();

    let payload = framed.next().await.unwrap().unwrap();
    let response: Response = serde_json::from_slice(&payload).unwrap();
    assert_eq!(response.request, "listUsers");
    assert_eq!(response.request_id, 1);
    assert_eq!(response.error, "");
    assert_eq!(response.data, Some(json!([])));

    cancel.cancel();
}

#[tokio::test]
async fn test_unmatched_peer_gets_notauthorized_hello() {
    // An ACL nobody matches: the hello carries the rejection and the
    // relay closes the connection
    let (cancel, socket, _dir) = start_relay("\"no-such-user\" = \"ALL: ALL\"").await;

    let stream = UnixStream::connect(&socket).await.unwrap();
    let mut framed = Framed::new(stream, FrameCodec::new());

    let payload = framed.next().await.unwrap().unwrap();
    let hello: Response = serde_json::from_slice(&payload).unwrap();
    assert_eq!(hello.request, "hello");
    assert_eq!(hello.error, "notauthorized");

    // Peer closes after the rejected hello
    assert!(framed.next().await.is_none());

    cancel.cancel();
}
