//! proctor-relay: relay daemon library
//!
//! The relay terminates front-end client connections on a Unix socket,
//! maintains one authenticated SSH session to the agent on every managed
//! host, fans client requests out across those sessions and aggregates the
//! replies, enforcing per-user authorization before and after forwarding.

pub mod agent;
pub mod client;
pub mod host;
pub mod location;
pub mod registry;
pub mod state;
pub mod supervisor;
pub mod tunnel;

pub use host::ManagedHost;
pub use registry::HostRegistry;
pub use state::RelayState;
