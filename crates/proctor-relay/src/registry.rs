//! Host registry
//!
//! Authoritative set of managed hosts. Entries are created by the retry
//! sweep from the configuration and live for the process lifetime; a host
//! removed from the configuration just stops being retried.

use dashmap::DashMap;
use std::sync::Arc;

use proctor_core::config::HostEntry;
use proctor_core::types::SessionUser;

use crate::host::ManagedHost;

/// Registry of managed hosts, indexed by hostname
#[derive(Default)]
pub struct HostRegistry {
    hosts: DashMap<String, Arc<ManagedHost>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            hosts: DashMap::new(),
        }
    }

    /// Get the host for a configuration entry, creating it if needed
    pub fn ensure(&self, entry: &HostEntry) -> Arc<ManagedHost> {
        self.hosts
            .entry(entry.hostname.clone())
            .or_insert_with(|| ManagedHost::new(entry.hostname.clone(), entry.alias.clone()))
            .clone()
    }

    pub fn get(&self, hostname: &str) -> Option<Arc<ManagedHost>> {
        self.hosts.get(hostname).map(|r| Arc::clone(&r))
    }

    /// All known hosts, connected or not
    pub fn list(&self) -> Vec<Arc<ManagedHost>> {
        self.hosts.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Hosts with a live agent session
    pub fn connected(&self) -> Vec<Arc<ManagedHost>> {
        self.hosts
            .iter()
            .filter(|r| r.is_connected())
            .map(|r| Arc::clone(&r))
            .collect()
    }

    /// Every logged-in user across connected hosts
    pub fn all_users(&self) -> Vec<SessionUser> {
        self.connected()
            .iter()
            .flat_map(|host| host.users_snapshot())
            .collect()
    }

    /// Locations of every session belonging to `username`, for the
    /// `sameLocation` filter. Assumes relay usernames and managed-host
    /// usernames refer to the same person.
    pub fn locations_of(&self, username: &str) -> Vec<String> {
        self.all_users()
            .into_iter()
            .filter(|u| u.username == username)
            .map(|u| u.location)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hostname: &str) -> HostEntry {
        HostEntry {
            hostname: hostname.into(),
            alias: None,
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let registry = HostRegistry::new();
        let a = registry.ensure(&entry("ws00"));
        let b = registry.ensure(&entry("ws00"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connected_filters_by_status() {
        let registry = HostRegistry::new();
        registry.ensure(&entry("ws00"));
        registry.ensure(&entry("ws01"));
        assert!(registry.connected().is_empty());
    }
}
