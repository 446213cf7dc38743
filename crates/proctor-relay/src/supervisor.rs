//! Host supervisor
//!
//! Drives every managed host through its connection lifecycle:
//! `disconnected -> connecting -> connected -> disconnected`. A periodic
//! sweep walks the configured host list and starts one connect task per
//! disconnected host, delayed by a random jitter so a relay restart does
//! not stampede the fleet. A connected host is guarded by a watchdog that
//! force-disconnects it after too long without any response.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use proctor_core::config::{self, RelayConfig};

use crate::agent::AgentSession;
use crate::host::ManagedHost;
use crate::location::LocationResolver;
use crate::state::RelayState;

/// Run the connect/retry sweep until cancelled
pub async fn run_supervisor(state: Arc<RelayState>, cancel: CancellationToken) {
    loop {
        let config = state.config();
        sweep(&state, &config, &cancel);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.relay.connect_frequency) => {}
        }
    }
}

/// One pass over the configured hosts: create missing registry entries and
/// start a connect attempt for every disconnected host. Hosts already
/// connecting or connected are skipped.
fn sweep(state: &Arc<RelayState>, config: &Arc<RelayConfig>, cancel: &CancellationToken) {
    for entry in config.host_entries() {
        let host = state.registry.ensure(entry);
        if !host.begin_connecting() {
            continue;
        }

        let jitter = config.relay.connect_jitter.mul_f64(rand::random::<f64>());
        let config = Arc::clone(config);
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            connect_and_run(config, host, jitter, cancel).await;
        });
    }
}

async fn connect_and_run(
    config: Arc<RelayConfig>,
    host: Arc<ManagedHost>,
    jitter: std::time::Duration,
    cancel: CancellationToken,
) {
    // Space out connection attempts after a restart or network blip
    tokio::time::sleep(jitter).await;

    let resolver = Arc::new(LocationResolver::new(config.relay.location_cmd.clone()));
    let session_cancel = cancel.child_token();

    let session =
        match AgentSession::connect(&host, &config.relay, Arc::clone(&resolver), session_cancel.clone())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                // Repeated identical failures are logged once per streak
                if host.connect_failed(&e.to_string()) {
                    tracing::error!("failed to connect to {}: {}", host.hostname(), e);
                }
                return;
            }
        };

    host.attach_session(session.clone());
    tracing::info!("connected to host {}", host.hostname());

    {
        let host = Arc::clone(&host);
        tokio::spawn(async move {
            let location = resolver.lookup(host.hostname(), "", "").await;
            host.set_location(location);
        });
    }

    run_connected(&config, host, session, session_cancel).await;
}

/// Watch a connected host until the transport dies, the watchdog fires or
/// the relay shuts down, then tear the session down. Pending calls fail
/// immediately rather than hanging their callers.
async fn run_connected(
    config: &RelayConfig,
    host: Arc<ManagedHost>,
    session: Arc<AgentSession>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.relay.poll_frequency);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("{}: connection lost", host.hostname());
                break;
            }
            _ = ticker.tick() => {
                if host.is_stale(config.relay.watchdog_timeout) {
                    tracing::error!("{}: no response, closing connection", host.hostname());
                    break;
                }
            }
        }
    }

    session.close().await;
    host.mark_disconnected();
}

/// Periodically re-read the configuration file; a successful parse swaps in
/// the new snapshot, a failed one keeps the previous good configuration.
/// Connections established under the old snapshot are left alone.
pub async fn run_reload_loop(
    state: Arc<RelayState>,
    config_path: std::path::PathBuf,
    cancel: CancellationToken,
) {
    let mut last_seen = mtime(&config_path);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(state.config().relay.reload_check) => {}
        }

        let current = mtime(&config_path);
        if current == last_seen {
            continue;
        }
        last_seen = current;

        match config::load_config(&config_path) {
            Ok(new_config) => {
                state.swap_config(new_config);
                tracing::info!("reloaded configuration");
            }
            Err(e) => {
                tracing::error!("failed to reload configuration: {}", e);
            }
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
