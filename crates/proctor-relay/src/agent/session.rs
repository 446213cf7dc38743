//! Agent session over SSH
//!
//! Establishes the backend session to one managed host: connect, verify the
//! host key against the configured known-hosts file, authenticate with the
//! relay's key, exec the agent command, then speak the length-framed JSON
//! RPC on the channel. Responses arrive out of order and are matched to
//! callers by request ID; the reserved IDs 0/-1/-2 feed the owning
//! `ManagedHost` record instead of a caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use russh::client::{self, Msg};
use russh::{Channel, ChannelId, Disconnect};
use russh_keys::key::PublicKey;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;

use proctor_core::config::RelaySettings;
use proctor_core::error::CallError;
use proctor_core::traits::AgentCalls;
use proctor_core::types::{AgentInfo, AgentUserRecord};
use proctor_protocol::{
    FrameCodec, Request, Response, HELLO_ID, INFO_PUSH_ID, USERS_PUSH_ID,
};

use crate::host::ManagedHost;
use crate::location::LocationResolver;
use crate::tunnel;

use super::pending::PendingCalls;

/// Errors establishing a backend session
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Private key could not be loaded
    #[error("private key not usable at {path}: {message}")]
    Key { path: String, message: String },

    /// Host key not in known hosts, or changed
    #[error("host key verification failed for {0}")]
    HostKeyRejected(String),

    /// The agent user's key was not accepted
    #[error("authentication rejected")]
    AuthRejected,

    /// TCP/SSH establishment took longer than the configured timeout
    #[error("connection timed out")]
    Timeout,

    /// Session came up but the agent never sent its hello
    #[error("no hello from agent")]
    NoHello,

    /// Other connection error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// One live backend session to a managed host
pub struct AgentSession {
    hostname: String,
    handle: Arc<Mutex<client::Handle<AgentHandler>>>,
    channel: Channel<Msg>,
    pending: Arc<PendingCalls>,
    tunnel_idle: Duration,
    cancel: CancellationToken,
}

impl AgentSession {
    /// Establish a session to `host` and wait for the agent's hello.
    ///
    /// The returned session is ready for calls; `cancel` fires when the
    /// transport dies so the owner can tear down.
    pub async fn connect(
        host: &Arc<ManagedHost>,
        settings: &RelaySettings,
        resolver: Arc<LocationResolver>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, ConnectError> {
        let key =
            russh_keys::load_secret_key(&settings.ssh_key, None).map_err(|e| ConnectError::Key {
                path: settings.ssh_key.display().to_string(),
                message: e.to_string(),
            })?;

        let pending = Arc::new(PendingCalls::new());
        let (hello_tx, hello_rx) = oneshot::channel();

        let key_name = host
            .alias()
            .unwrap_or_else(|| host.hostname())
            .to_string();
        let handler = AgentHandler {
            host: Arc::clone(host),
            pending: Arc::clone(&pending),
            resolver,
            known_hosts: settings.known_hosts.clone(),
            key_name,
            port: settings.agent_port,
            hello_tx: Some(hello_tx),
            cancel: cancel.clone(),
            codec: FrameCodec::new(),
            buffer: BytesMut::with_capacity(8192),
        };

        let ssh_config = Arc::new(client::Config::default());
        let addr = (host.hostname().to_string(), settings.agent_port);

        let mut handle = tokio::time::timeout(
            settings.connect_timeout,
            client::connect(ssh_config, addr, handler),
        )
        .await
        .map_err(|_| ConnectError::Timeout)?
        .map_err(|e| match e.downcast_ref::<russh::Error>() {
            Some(russh::Error::UnknownKey) => {
                ConnectError::HostKeyRejected(host.hostname().to_string())
            }
            _ => ConnectError::Other(e),
        })?;

        let authenticated = handle
            .authenticate_publickey(&settings.agent_user, Arc::new(key))
            .await
            .map_err(|e| anyhow::anyhow!("authentication error: {}", e))?;
        if !authenticated {
            return Err(ConnectError::AuthRejected);
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| anyhow::anyhow!("failed to open session channel: {}", e))?;
        channel
            .exec(true, settings.agent_cmd.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("failed to start agent: {}", e))?;

        // The agent speaks first: its hello carries the initial info payload
        match tokio::time::timeout(settings.connect_timeout, hello_rx).await {
            Ok(Ok(())) => {}
            _ => return Err(ConnectError::NoHello),
        }

        Ok(Arc::new(Self {
            hostname: host.hostname().to_string(),
            handle: Arc::new(Mutex::new(handle)),
            channel,
            pending,
            tunnel_idle: settings.tunnel_idle,
            cancel,
        }))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Fires when the transport goes away
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close the session, failing every pending call
    pub async fn close(&self) {
        self.pending.fail_all();
        let mut handle = self.handle.lock().await;
        let _ = handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await;
    }

    /// Issue one framed call and await its response
    async fn call(&self, request: &str, args: Value) -> Result<Value, CallError> {
        let (id, rx) = self.pending.register()?;

        let payload = Request::new(request, id, args)
            .to_payload()
            .map_err(|e| CallError::Protocol(e.to_string()))?;
        let mut buf = BytesMut::new();
        FrameCodec::new()
            .encode(payload, &mut buf)
            .map_err(|e| CallError::Protocol(e.to_string()))?;

        if self.channel.data(&buf[..]).await.is_err() {
            self.pending.discard(id);
            return Err(CallError::ConnectionLost);
        }

        let response = rx.await.map_err(|_| CallError::ConnectionLost)?;
        if !response.error.is_empty() {
            return Err(CallError::Remote(response.error));
        }
        response
            .data
            .ok_or_else(|| CallError::Protocol("response without data".into()))
    }

    /// Rewrite the `port` of every successful item to a locally forwarded
    /// port (vnc responses)
    async fn forward_item_ports(&self, data: Value) -> Result<Value, CallError> {
        let Value::Array(mut items) = data else {
            return Err(CallError::Protocol("expected a list response".into()));
        };
        for item in items.iter_mut() {
            let Some(obj) = item.as_object_mut() else {
                continue;
            };
            if obj
                .get("error")
                .and_then(Value::as_str)
                .is_some_and(|e| !e.is_empty())
            {
                continue;
            }
            let port = obj
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| CallError::Protocol("response without usable port".into()))?;
            let local = tunnel::open_forward(Arc::clone(&self.handle), port, self.tunnel_idle)
                .await
                .map_err(|e| CallError::Tunnel(e.to_string()))?;
            obj.insert("port".into(), Value::from(local));
        }
        Ok(Value::Array(items))
    }

    /// Same for the single object of a login response
    async fn forward_object_port(&self, data: Value) -> Result<Value, CallError> {
        let Value::Object(mut obj) = data else {
            return Err(CallError::Protocol("expected an object response".into()));
        };
        let failed = obj
            .get("error")
            .and_then(Value::as_str)
            .is_some_and(|e| !e.is_empty());
        if !failed {
            let port = obj
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| CallError::Protocol("response without usable port".into()))?;
            let local = tunnel::open_forward(Arc::clone(&self.handle), port, self.tunnel_idle)
                .await
                .map_err(|e| CallError::Tunnel(e.to_string()))?;
            obj.insert("port".into(), Value::from(local));
        }
        Ok(Value::Object(obj))
    }
}

#[async_trait]
impl AgentCalls for AgentSession {
    async fn users(&self) -> Result<Value, CallError> {
        self.call("users", Value::Array(vec![])).await
    }

    async fn processes(&self, args: Value) -> Result<Value, CallError> {
        self.call("processes", args).await
    }

    async fn kill_processes(&self, args: Value) -> Result<Value, CallError> {
        self.call("killProcesses", args).await
    }

    async fn thumbnails(&self, args: Value) -> Result<Value, CallError> {
        self.call("thumbnails", args).await
    }

    async fn vnc(&self, args: Value) -> Result<Value, CallError> {
        let data = self.call("vnc", args).await?;
        self.forward_item_ports(data).await
    }

    async fn login(&self, args: Value) -> Result<Value, CallError> {
        let data = self.call("login", args).await?;
        self.forward_object_port(data).await
    }

    async fn send_message(&self, args: Value) -> Result<Value, CallError> {
        self.call("message", args).await
    }

    async fn logout(&self, args: Value) -> Result<Value, CallError> {
        self.call("logout", args).await
    }

    async fn lock(&self, args: Value) -> Result<Value, CallError> {
        self.call("lock", args).await
    }

    async fn open_url(&self, args: Value) -> Result<Value, CallError> {
        self.call("openURL", args).await
    }

    async fn shutdown(&self, args: Value) -> Result<Value, CallError> {
        self.call("shutdown", args).await
    }
}

/// SSH client handler for one agent session
struct AgentHandler {
    host: Arc<ManagedHost>,
    pending: Arc<PendingCalls>,
    resolver: Arc<LocationResolver>,
    known_hosts: PathBuf,
    /// Name the host's key is filed under: the alias if configured
    key_name: String,
    port: u16,
    hello_tx: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,
    codec: FrameCodec,
    buffer: BytesMut,
}

impl AgentHandler {
    fn handle_frame(&mut self, payload: Bytes) {
        let response: Response = match serde_json::from_slice(&payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("{}: undecodable frame: {}", self.host.hostname(), e);
                return;
            }
        };

        self.host.touch();

        let Some(data) = response.data else {
            tracing::error!(
                "{}: response {} without data",
                self.host.hostname(),
                response.request_id
            );
            return;
        };

        match response.request_id {
            HELLO_ID => {
                self.apply_info(data);
                if let Some(tx) = self.hello_tx.take() {
                    let _ = tx.send(());
                }
            }
            INFO_PUSH_ID => self.apply_info(data),
            USERS_PUSH_ID => self.apply_users(data),
            id if id > 0 => {
                if !response.error.is_empty() {
                    tracing::error!(
                        "{}: call {} returned error: {}",
                        self.host.hostname(),
                        id,
                        response.error
                    );
                }
                if !self.pending.resolve(id, Response {
                    request_id: id,
                    request: response.request,
                    data: Some(data),
                    error: response.error,
                }) {
                    tracing::error!(
                        "{}: response for unknown request ID {}",
                        self.host.hostname(),
                        id
                    );
                }
            }
            id => {
                tracing::warn!("{}: response with reserved ID {}", self.host.hostname(), id);
            }
        }
    }

    fn apply_info(&self, data: Value) {
        match serde_json::from_value::<AgentInfo>(data) {
            Ok(info) => self.host.apply_info(info),
            Err(e) => tracing::error!("{}: bad info payload: {}", self.host.hostname(), e),
        }
    }

    fn apply_users(&self, data: Value) {
        let records: Vec<AgentUserRecord> = match serde_json::from_value(data) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("{}: bad user list payload: {}", self.host.hostname(), e);
                return;
            }
        };

        for query in self.host.refresh_users(records) {
            let host = Arc::clone(&self.host);
            let resolver = Arc::clone(&self.resolver);
            tokio::spawn(async move {
                let location = resolver
                    .lookup(host.hostname(), &query.client, &query.hwaddr)
                    .await;
                host.set_user_location(&query.key, location);
            });
        }
    }
}

#[async_trait]
impl client::Handler for AgentHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match russh_keys::check_known_hosts_path(
            &self.key_name,
            self.port,
            server_public_key,
            &self.known_hosts,
        ) {
            Ok(true) => Ok(true),
            Ok(false) => {
                tracing::error!("host key for {} not found", self.key_name);
                Ok(false)
            }
            Err(russh_keys::Error::KeyChanged { line }) => {
                tracing::error!(
                    "host key for {} has changed (known hosts line {})",
                    self.key_name,
                    line
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!("known hosts check failed for {}: {}", self.key_name, e);
                Ok(false)
            }
        }
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(payload)) => self.handle_frame(payload),
                Ok(None) => break,
                Err(e) => {
                    // Oversized or corrupt framing is fatal for the session
                    tracing::error!("{}: protocol error: {}", self.host.hostname(), e);
                    self.cancel.cancel();
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("{}: channel closed", self.host.hostname());
        self.cancel.cancel();
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("{}: channel EOF", self.host.hostname());
        self.cancel.cancel();
        Ok(())
    }
}

impl Drop for AgentHandler {
    fn drop(&mut self) {
        // The transport task owns the handler; its death means the session
        // is gone even if no close event was delivered.
        self.cancel.cancel();
    }
}
