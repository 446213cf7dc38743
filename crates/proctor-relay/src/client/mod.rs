//! Front-end client connections
//!
//! One `ClientSession` per accepted Unix-socket connection. The peer is
//! identified by its socket credentials and bound to an ACL rule for the
//! connection's lifetime; requests are parsed, authorized, fanned out across
//! agent sessions and answered with aggregated, post-filtered results.

mod listener;
mod requests;
mod session;

pub use listener::run_client_listener;
pub use requests::{lookup, Descriptor, Operation, RequestKind};
pub use session::ClientSession;
