//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one logged-in desktop session on a managed host.
///
/// Unique and stable across refresh cycles; used as the map key for the
/// per-host user table and carried verbatim in request/response items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey {
    pub username: String,
    /// Hostname of the managed host the session lives on
    pub server: String,
    /// Thin-client name, empty for local sessions
    pub client: String,
    /// X display identifier, e.g. ":0"
    pub display: String,
}

impl UserKey {
    pub fn new(
        username: impl Into<String>,
        server: impl Into<String>,
        client: impl Into<String>,
        display: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            server: server.into(),
            client: client.into(),
            display: display.into(),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}@{}:{}",
            self.username, self.client, self.server, self.display
        )
    }
}

/// One logged-in desktop session, as tracked by the host registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub username: String,
    pub server: String,
    pub client: String,
    pub display: String,
    /// Hardware address of the client device, used for location lookups
    pub client_hw_addr: String,
    /// Display name (gecos)
    pub name: String,
    /// Group memberships as reported by the agent
    pub groups: Vec<String>,
    /// Login time, seconds since the epoch
    pub time: i64,
    /// Physical location, resolved asynchronously; empty until known
    pub location: String,
}

impl SessionUser {
    pub fn key(&self) -> UserKey {
        UserKey::new(&self.username, &self.server, &self.client, &self.display)
    }
}

/// Connection state of a managed host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatus {
    /// No backend session, eligible for the next retry sweep
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Backend session established, hello received
    Connected,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Disconnected => write!(f, "disconnected"),
            HostStatus::Connecting => write!(f, "connecting"),
            HostStatus::Connected => write!(f, "connected"),
        }
    }
}

/// One user record in an agent's `users` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUserRecord {
    pub username: String,
    pub client: String,
    #[serde(default)]
    pub hwaddr: String,
    pub display: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub time: i64,
}

/// Payload of an agent's `info` response and its unsolicited pushes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub uptime: i64,
    pub load: f64,
    pub os: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_key_equality_over_fields() {
        let a = UserKey::new("alice", "ws01", "thin03", ":0");
        let b = UserKey::new("alice", "ws01", "thin03", ":0");
        let c = UserKey::new("alice", "ws01", "thin04", ":0");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut map = std::collections::HashMap::new();
        map.insert(a, 1);
        assert!(map.contains_key(&b));
    }

    #[test]
    fn test_host_status_display() {
        assert_eq!(format!("{}", HostStatus::Connected), "connected");
        assert_eq!(format!("{}", HostStatus::Disconnected), "disconnected");
    }

    #[test]
    fn test_agent_user_record_defaults() {
        let rec: AgentUserRecord = serde_json::from_str(
            r#"{"username": "bob", "client": "thin07", "display": ":1"}"#,
        )
        .unwrap();
        assert!(rec.groups.is_empty());
        assert!(rec.hwaddr.is_empty());
        assert_eq!(rec.time, 0);
    }
}
