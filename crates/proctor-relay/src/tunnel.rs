//! On-demand forwarding listeners for remote-control sessions
//!
//! `vnc` and `login` responses carry a port number only meaningful on the
//! managed host. For each one the relay opens a local listener, forwards a
//! single incoming connection to that remote port through the already-open
//! backend session, and closes the listener if nothing connects within the
//! idle window. The bound local port is returned synchronously so it can be
//! embedded in the response before the forward is used.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Open a local forwarding listener to `remote_port` on the session's host.
/// Returns the locally bound port.
pub async fn open_forward<H>(
    handle: Arc<Mutex<client::Handle<H>>>,
    remote_port: u16,
    idle: Duration,
) -> std::io::Result<u16>
where
    H: client::Handler + 'static,
{
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let local_port = listener.local_addr()?.port();

    tokio::spawn(async move {
        let accepted = tokio::select! {
            result = listener.accept() => result.ok(),
            _ = tokio::time::sleep(idle) => None,
        };

        let Some((mut stream, peer)) = accepted else {
            tracing::debug!("forward on port {} expired unused", local_port);
            return;
        };
        // Single-use listener
        drop(listener);

        let channel = {
            let mut handle = handle.lock().await;
            handle
                .channel_open_direct_tcpip(
                    "127.0.0.1",
                    u32::from(remote_port),
                    "127.0.0.1",
                    u32::from(peer.port()),
                )
                .await
        };

        match channel {
            Ok(channel) => {
                let mut remote = channel.into_stream();
                match tokio::io::copy_bidirectional(&mut stream, &mut remote).await {
                    Ok((sent, received)) => tracing::debug!(
                        "forward to port {} closed, {}b out {}b in",
                        remote_port,
                        sent,
                        received
                    ),
                    Err(e) => tracing::debug!("forward to port {} ended: {}", remote_port, e),
                }
            }
            Err(e) => {
                tracing::warn!(
                    "failed to open forwarding channel to port {}: {}",
                    remote_port,
                    e
                );
            }
        }
    });

    Ok(local_port)
}
