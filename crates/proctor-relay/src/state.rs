//! Shared relay state
//!
//! The configuration lives behind an atomically swapped immutable snapshot:
//! readers clone the `Arc` once at entry and keep using that snapshot for
//! the whole operation, so a reload never changes semantics mid-request.

use std::sync::{Arc, RwLock};

use proctor_core::acl::{AclRule, GroupLookup};
use proctor_core::config::RelayConfig;

use crate::registry::HostRegistry;

/// Process-wide state of the relay daemon
pub struct RelayState {
    config: RwLock<Arc<RelayConfig>>,
    pub registry: HostRegistry,
    pub groups: Arc<dyn GroupLookup>,
}

impl RelayState {
    pub fn new(config: RelayConfig, groups: Arc<dyn GroupLookup>) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(Arc::new(config)),
            registry: HostRegistry::new(),
            groups,
        })
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<RelayConfig> {
        self.config.read().unwrap().clone()
    }

    /// Swap in a freshly validated configuration
    pub fn swap_config(&self, config: RelayConfig) {
        *self.config.write().unwrap() = Arc::new(config);
    }

    /// First ACL rule (configuration order) applying to `username`
    pub fn first_matching_acl(&self, username: &str) -> Option<Arc<AclRule>> {
        self.config().first_matching_acl(username, self.groups.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoGroups;
    impl GroupLookup for NoGroups {
        fn members(&self, _: &str) -> Vec<String> {
            vec![]
        }
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let config = RelayConfig::from_toml("[acl]\nalice = \"ALL: ALL\"").unwrap();
        let state = RelayState::new(config, Arc::new(NoGroups));

        let snapshot = state.config();
        assert_eq!(snapshot.rules().len(), 1);

        state.swap_config(RelayConfig::from_toml("").unwrap());
        // The captured snapshot is unchanged; new readers see the swap
        assert_eq!(snapshot.rules().len(), 1);
        assert!(state.config().rules().is_empty());
        assert!(state.first_matching_acl("alice").is_none());
    }
}
