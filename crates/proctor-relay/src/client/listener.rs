//! Unix-socket listener for front-end clients
//!
//! The peer is identified by its socket credentials: the connecting
//! process's UID is resolved to a username and bound to the first matching
//! ACL rule for the whole connection. A peer with no matching rule gets a
//! `hello` carrying `notauthorized` and is disconnected.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use proctor_core::unix;
use proctor_protocol::{FrameCodec, Response, HELLO_ID};

use crate::state::RelayState;

use super::session::ClientSession;

/// Responses queued per connection between worker tasks and the writer
const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Bind the client socket and serve connections until cancelled
pub async fn run_client_listener(
    state: Arc<RelayState>,
    cancel: CancellationToken,
) -> Result<()> {
    let socket_path = state.config().relay.socket_path.clone();

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    // A stale socket from a previous run would make bind fail
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("Failed to bind client socket {}", socket_path.display()))?;
    tracing::info!("client socket listening on {}", socket_path.display());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state).await {
                            tracing::warn!("client connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("failed to accept client connection: {}", e);
                }
            }
        }
    }

    Ok(())
}

async fn handle_client(stream: UnixStream, state: Arc<RelayState>) -> Result<()> {
    let cred = stream.peer_cred().context("peer credentials unavailable")?;
    let username = unix::username_for_uid(cred.uid());
    let acl = username
        .as_deref()
        .and_then(|name| state.first_matching_acl(name));

    let (read_half, write_half) = stream.into_split();
    let mut frames_in = FramedRead::new(read_half, FrameCodec::new());
    let mut frames_out = FramedWrite::new(write_half, FrameCodec::new());

    let (username, acl) = match (username, acl) {
        (Some(username), Some(acl)) => (username, acl),
        (username, _) => {
            tracing::info!(
                "rejecting client uid {} ({:?}): no matching ACL",
                cred.uid(),
                username
            );
            let hello = Response::with_error("hello", HELLO_ID, json!(""), "notauthorized");
            frames_out.send(hello.to_payload()?).await?;
            return Ok(());
        }
    };

    tracing::info!("client connected: {} (uid {})", username, cred.uid());
    let hello = Response::new("hello", HELLO_ID, json!(""));
    frames_out.send(hello.to_payload()?).await?;

    let session = Arc::new(ClientSession::new(username, acl, state));

    // Requests run concurrently; one writer task serializes the responses
    let (response_tx, mut response_rx) = mpsc::channel::<Response>(RESPONSE_CHANNEL_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            let payload = match response.to_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::error!("failed to encode response: {}", e);
                    continue;
                }
            };
            if frames_out.send(payload).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = frames_in.next().await {
        match frame {
            Ok(payload) => {
                // IDs are assigned in arrival order, completion may reorder
                let request_id = session.next_request_id();
                let session = Arc::clone(&session);
                let response_tx = response_tx.clone();
                tokio::spawn(async move {
                    let response = session.process(request_id, &payload).await;
                    let _ = response_tx.send(response).await;
                });
            }
            Err(e) => {
                // Oversized or corrupt framing is fatal for the connection
                tracing::warn!("client {}: protocol error: {}", session.username(), e);
                break;
            }
        }
    }

    drop(response_tx);
    let _ = writer.await;
    tracing::debug!("client {} disconnected", session.username());
    Ok(())
}
