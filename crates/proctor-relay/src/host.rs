//! Managed host state
//!
//! One `ManagedHost` per configured machine. The record is owned by the
//! host registry; its mutable state is only written by the host's own agent
//! session and lifecycle transitions. The user map is replaced wholesale on
//! each refresh so readers never observe a partially updated map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use proctor_core::traits::AgentCalls;
use proctor_core::types::{AgentInfo, AgentUserRecord, HostStatus, SessionUser, UserKey};

/// Arguments for one asynchronous user-location lookup
#[derive(Debug, Clone)]
pub struct LocationQuery {
    pub key: UserKey,
    pub client: String,
    pub hwaddr: String,
}

struct HostInner {
    status: HostStatus,
    users: HashMap<UserKey, SessionUser>,
    info: Option<AgentInfo>,
    location: String,
    last_response: Option<Instant>,
    /// Last connect error, kept to suppress identical repeats in the log
    last_error: Option<String>,
    agent: Option<Arc<dyn AgentCalls>>,
}

/// One machine running an agent
pub struct ManagedHost {
    hostname: String,
    alias: Option<String>,
    inner: Mutex<HostInner>,
}

impl ManagedHost {
    pub fn new(hostname: impl Into<String>, alias: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            hostname: hostname.into(),
            alias,
            inner: Mutex::new(HostInner {
                status: HostStatus::Disconnected,
                users: HashMap::new(),
                info: None,
                location: String::new(),
                last_response: None,
                last_error: None,
                agent: None,
            }),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Host-key alias used for known-hosts lookups, if configured
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn status(&self) -> HostStatus {
        self.inner.lock().unwrap().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == HostStatus::Connected
    }

    /// Claim the host for a connect attempt. Returns false if a session is
    /// already connecting or connected, so at most one attempt is in flight.
    pub fn begin_connecting(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.status != HostStatus::Disconnected {
            return false;
        }
        inner.status = HostStatus::Connecting;
        true
    }

    /// Record a failed connect attempt. Returns true if the error should be
    /// logged (it differs from the previous consecutive failure).
    pub fn connect_failed(&self, error: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.status = HostStatus::Disconnected;
        if inner.last_error.as_deref() == Some(error) {
            return false;
        }
        inner.last_error = Some(error.to_string());
        true
    }

    /// Attach an established agent session. Cached users are dropped; the
    /// agent pushes a fresh list right after hello.
    pub fn attach_session(&self, agent: Arc<dyn AgentCalls>) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = HostStatus::Connected;
        inner.agent = Some(agent);
        inner.users.clear();
        inner.last_error = None;
        inner.last_response = Some(Instant::now());
    }

    /// Drop the session and all cached state derived from it
    pub fn mark_disconnected(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = HostStatus::Disconnected;
        inner.agent = None;
        inner.users.clear();
        inner.info = None;
        inner.last_response = None;
    }

    pub fn agent(&self) -> Option<Arc<dyn AgentCalls>> {
        self.inner.lock().unwrap().agent.clone()
    }

    /// Record liveness; any inbound frame from the agent counts
    pub fn touch(&self) {
        self.inner.lock().unwrap().last_response = Some(Instant::now());
    }

    /// Watchdog check: connected but silent for longer than `timeout`
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.status != HostStatus::Connected {
            return false;
        }
        match inner.last_response {
            Some(at) => at.elapsed() > timeout,
            None => true,
        }
    }

    pub fn apply_info(&self, info: AgentInfo) {
        let mut inner = self.inner.lock().unwrap();
        inner.info = Some(info);
        inner.last_response = Some(Instant::now());
    }

    pub fn set_location(&self, location: String) {
        self.inner.lock().unwrap().location = location;
    }

    pub fn location(&self) -> String {
        self.inner.lock().unwrap().location.clone()
    }

    /// Replace the user map from an agent refresh. Entries whose key
    /// persists keep their resolved location; every record still gets a
    /// fresh lookup, returned for the caller to run asynchronously.
    pub fn refresh_users(&self, records: Vec<AgentUserRecord>) -> Vec<LocationQuery> {
        let mut queries = Vec::with_capacity(records.len());
        let mut inner = self.inner.lock().unwrap();
        let mut users = HashMap::with_capacity(records.len());

        for record in records {
            let key = UserKey::new(
                &record.username,
                &self.hostname,
                &record.client,
                &record.display,
            );
            queries.push(LocationQuery {
                key: key.clone(),
                client: record.client.clone(),
                hwaddr: record.hwaddr.clone(),
            });
            let user = match inner.users.remove(&key) {
                Some(mut existing) => {
                    existing.name = record.name;
                    existing.groups = record.groups;
                    existing.time = record.time;
                    existing.client_hw_addr = record.hwaddr;
                    existing
                }
                None => SessionUser {
                    username: record.username,
                    server: self.hostname.clone(),
                    client: record.client,
                    display: record.display,
                    client_hw_addr: record.hwaddr,
                    name: record.name,
                    groups: record.groups,
                    time: record.time,
                    location: String::new(),
                },
            };
            users.insert(key, user);
        }

        inner.users = users;
        queries
    }

    /// Update one user's location if the key is still present
    pub fn set_user_location(&self, key: &UserKey, location: String) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(key) {
            user.location = location;
        }
    }

    pub fn user(&self, key: &UserKey) -> Option<SessionUser> {
        self.inner.lock().unwrap().users.get(key).cloned()
    }

    pub fn users_snapshot(&self) -> Vec<SessionUser> {
        self.inner.lock().unwrap().users.values().cloned().collect()
    }

    pub fn user_count(&self) -> usize {
        self.inner.lock().unwrap().users.len()
    }

    /// Metrics for listServers; None until the first info payload arrived
    pub fn info(&self) -> Option<AgentInfo> {
        self.inner.lock().unwrap().info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str, client: &str, display: &str) -> AgentUserRecord {
        AgentUserRecord {
            username: username.into(),
            client: client.into(),
            hwaddr: "aa:bb".into(),
            display: display.into(),
            name: format!("{} name", username),
            groups: vec!["students".into()],
            time: 100,
        }
    }

    #[test]
    fn test_begin_connecting_claims_once() {
        let host = ManagedHost::new("ws00", None);
        assert!(host.begin_connecting());
        assert!(!host.begin_connecting());
        assert_eq!(host.status(), HostStatus::Connecting);
    }

    #[test]
    fn test_connect_failure_log_dedup() {
        let host = ManagedHost::new("ws00", None);
        assert!(host.connect_failed("connection refused"));
        assert!(!host.connect_failed("connection refused"));
        assert!(host.connect_failed("timed out"));
        assert!(!host.connect_failed("timed out"));
    }

    #[test]
    fn test_refresh_replaces_map_and_keeps_location() {
        let host = ManagedHost::new("ws00", None);
        host.refresh_users(vec![record("alice", "thin01", ":0")]);

        let key = UserKey::new("alice", "ws00", "thin01", ":0");
        host.set_user_location(&key, "room3".into());

        // Same key again: location survives the refresh
        host.refresh_users(vec![record("alice", "thin01", ":0")]);
        assert_eq!(host.user(&key).unwrap().location, "room3");

        // Key gone from the refresh: user disappears
        host.refresh_users(vec![record("bob", "thin02", ":0")]);
        assert!(host.user(&key).is_none());
        assert_eq!(host.user_count(), 1);
    }

    #[test]
    fn test_set_location_for_removed_key_is_noop() {
        let host = ManagedHost::new("ws00", None);
        host.refresh_users(vec![record("alice", "thin01", ":0")]);
        let key = UserKey::new("alice", "ws00", "thin01", ":0");
        host.refresh_users(vec![]);
        host.set_user_location(&key, "room3".into());
        assert_eq!(host.user_count(), 0);
    }

    #[test]
    fn test_stale_only_when_connected() {
        let host = ManagedHost::new("ws00", None);
        assert!(!host.is_stale(Duration::from_secs(0)));

        host.apply_info(AgentInfo {
            uptime: 1,
            load: 0.5,
            os: "linux".into(),
        });
        // Not connected yet, so not stale regardless of silence
        assert!(!host.is_stale(Duration::from_secs(0)));
    }

    #[test]
    fn test_mark_disconnected_clears_cached_state() {
        let host = ManagedHost::new("ws00", None);
        host.refresh_users(vec![record("alice", "thin01", ":0")]);
        host.apply_info(AgentInfo {
            uptime: 5,
            load: 0.1,
            os: "linux".into(),
        });
        host.mark_disconnected();
        assert_eq!(host.user_count(), 0);
        assert!(host.info().is_none());
        assert!(host.agent().is_none());
    }
}
