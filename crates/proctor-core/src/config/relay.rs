//! Relay configuration
//!
//! The `[hosts]` table maps a grouping key to a space-separated host list;
//! a key starting with `@` additionally names the host-key alias under
//! which those hosts' keys appear in the known-hosts file. Host names may
//! contain numeric ranges (`ws00-50`, `ws00-50.example.org`) which expand
//! to individual names with the zero padding of the range start.
//!
//! The `[acl]` table holds one authorization rule per entry, `who` in the
//! key and `filter: requests` in the value. Rule order is configuration
//! order; a client is bound to the first rule that applies to it. One
//! malformed rule fails the whole load so a partial rule set never becomes
//! active.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::acl::{AclRule, GroupLookup};
use crate::error::ConfigError;

/// Settings for the relay daemon itself
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Unix socket the front-end clients connect to
    pub socket_path: PathBuf,

    /// Interval of the connect/retry sweep over all configured hosts
    #[serde(with = "duration_secs")]
    pub connect_frequency: Duration,

    /// Interval of the per-host watchdog check
    #[serde(with = "duration_secs")]
    pub poll_frequency: Duration,

    /// Silence threshold after which the watchdog force-disconnects a host
    #[serde(with = "duration_secs")]
    pub watchdog_timeout: Duration,

    /// Upper bound of the random delay before each connect attempt
    #[serde(with = "duration_secs")]
    pub connect_jitter: Duration,

    /// Timeout for establishing one backend SSH session
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long an unused forwarding listener stays open
    #[serde(with = "duration_secs")]
    pub tunnel_idle: Duration,

    /// How often the configuration file is checked for changes
    #[serde(with = "duration_secs")]
    pub reload_check: Duration,

    /// Private key used to authenticate against the agents
    pub ssh_key: PathBuf,

    /// Known-hosts file used to verify agent host keys
    pub known_hosts: PathBuf,

    /// Username the relay logs in as on managed hosts
    pub agent_user: String,

    /// Command executed on the managed host to start the agent
    pub agent_cmd: String,

    /// SSH port on the managed hosts
    pub agent_port: u16,

    /// External executable resolving (host, client, hwaddr) to a location
    pub location_cmd: PathBuf,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/proctor/relay.sock"),
            connect_frequency: Duration::from_secs(60),
            poll_frequency: Duration::from_secs(10),
            watchdog_timeout: Duration::from_secs(30),
            connect_jitter: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            tunnel_idle: Duration::from_secs(10),
            reload_check: Duration::from_secs(30),
            ssh_key: PathBuf::from("/etc/proctor/ssh_key"),
            known_hosts: PathBuf::from("/etc/proctor/known_hosts"),
            agent_user: "proctor".to_string(),
            agent_cmd: "proctor-agent".to_string(),
            agent_port: 22,
            location_cmd: PathBuf::from("/usr/bin/proctor-get-location"),
        }
    }
}

/// A TOML table deserialized with its document order preserved.
///
/// ACL rule precedence is configuration order, which a plain map would lose.
#[derive(Debug, Clone, Default)]
pub struct OrderedTable(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for OrderedTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = OrderedTable;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a table of string values")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, String>()? {
                    entries.push((key, value));
                }
                Ok(OrderedTable(entries))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// One managed host derived from the `[hosts]` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub hostname: String,
    /// Host-key alias, when the host was listed under an `@alias` key
    pub alias: Option<String>,
}

/// The full relay configuration. Loaded once and swapped atomically as an
/// immutable snapshot on reload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub relay: RelaySettings,
    pub hosts: OrderedTable,
    pub acl: OrderedTable,

    #[serde(skip)]
    rules: Vec<Arc<AclRule>>,
    #[serde(skip)]
    host_entries: Vec<HostEntry>,
}

impl RelayConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the ACL and host sections and check required settings.
    /// Any error here must abort the load; the caller keeps its previous
    /// configuration.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.relay.agent_user.is_empty() {
            return Err(ConfigError::MissingField("relay.agent_user".into()));
        }
        if self.relay.agent_cmd.is_empty() {
            return Err(ConfigError::MissingField("relay.agent_cmd".into()));
        }
        if self.relay.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("relay.socket_path".into()));
        }

        self.rules = self
            .acl
            .0
            .iter()
            .map(|(who, value)| {
                AclRule::parse(who, value)
                    .map(Arc::new)
                    .map_err(|source| ConfigError::Acl {
                        rule: format!("{} = {}", who, value),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::new();
        for (key, list) in &self.hosts.0 {
            let alias = key.strip_prefix('@').map(str::to_string);
            for host in list.split_whitespace() {
                for hostname in expand_range(host) {
                    entries.push(HostEntry {
                        hostname,
                        alias: alias.clone(),
                    });
                }
            }
        }
        self.host_entries = entries;

        Ok(())
    }

    /// Parsed ACL rules in configuration order
    pub fn rules(&self) -> &[Arc<AclRule>] {
        &self.rules
    }

    /// All managed hosts, ranges expanded
    pub fn host_entries(&self) -> &[HostEntry] {
        &self.host_entries
    }

    /// First rule in configuration order applying to `username`, if any.
    /// A connecting client with no matching rule must be rejected.
    pub fn first_matching_acl(
        &self,
        username: &str,
        groups: &dyn GroupLookup,
    ) -> Option<Arc<AclRule>> {
        self.rules
            .iter()
            .find(|rule| rule.applies_to(username, groups))
            .cloned()
    }
}

/// Expand a numeric host range like `ws00-50` or `ws00-50.example.org`.
/// Names without a range expand to themselves; an inverted range expands
/// to nothing.
pub fn expand_range(host: &str) -> Vec<String> {
    for (i, _) in host.match_indices('-') {
        let (prefix, rest) = (&host[..i], &host[i + 1..]);

        let begin_start = prefix
            .rfind(|c: char| !c.is_ascii_digit())
            .map(|p| p + 1)
            .unwrap_or(0);
        let begin = &prefix[begin_start..];
        if begin.is_empty() {
            continue;
        }

        let end_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if end_len == 0 {
            continue;
        }
        let (end, domain) = rest.split_at(end_len);
        if !domain.is_empty()
            && !(domain.starts_with('.')
                && domain[1..]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        {
            continue;
        }

        let (Ok(first), Ok(last)) = (begin.parse::<u64>(), end.parse::<u64>()) else {
            continue;
        };
        let width = begin.len();
        let base = &prefix[..begin_start];
        return (first..=last)
            .map(|n| format!("{base}{n:0width$}{domain}"))
            .collect();
    }
    vec![host.to_string()]
}

// Durations are written as integer seconds in the config file
mod duration_secs {
    use serde::{self, Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
