//! Trait seams shared between the relay and its tests

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CallError;

/// Typed call surface of one managed host's agent.
///
/// Implemented by the live SSH-backed agent session; client-session logic is
/// written (and tested) against this trait. Every method maps to one framed
/// RPC on the backend session and resolves when the matching response
/// arrives, or fails when the session goes away. `args` is forwarded to the
/// agent verbatim (a list of identity items, or a single object for
/// host-level requests).
#[async_trait]
pub trait AgentCalls: Send + Sync {
    /// `users`: list of logged-in user records
    async fn users(&self) -> Result<Value, CallError>;

    /// `processes`: per-user process lists
    async fn processes(&self, args: Value) -> Result<Value, CallError>;

    /// `killProcesses`: kill one process per item
    async fn kill_processes(&self, args: Value) -> Result<Value, CallError>;

    /// `thumbnails`: per-user screen thumbnails
    async fn thumbnails(&self, args: Value) -> Result<Value, CallError>;

    /// `vnc`: per-user remote-control ports, rewritten to locally
    /// forwarded ports before returning
    async fn vnc(&self, args: Value) -> Result<Value, CallError>;

    /// `login`: login-screen display port, rewritten to a locally
    /// forwarded port before returning
    async fn login(&self, args: Value) -> Result<Value, CallError>;

    /// `message`: show a message to each targeted user
    async fn send_message(&self, args: Value) -> Result<Value, CallError>;

    /// `logout`: end each targeted session
    async fn logout(&self, args: Value) -> Result<Value, CallError>;

    /// `lock`: lock each targeted screen
    async fn lock(&self, args: Value) -> Result<Value, CallError>;

    /// `openURL`: open a URL in each targeted session
    async fn open_url(&self, args: Value) -> Result<Value, CallError>;

    /// `shutdown`: power off or reboot the host
    async fn shutdown(&self, args: Value) -> Result<Value, CallError>;
}
