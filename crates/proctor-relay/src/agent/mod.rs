//! Backend agent sessions
//!
//! One SSH session per connected managed host, multiplexing concurrently
//! in-flight calls by request ID over a single exec channel.

mod pending;
mod session;

pub use pending::PendingCalls;
pub use session::{AgentSession, ConnectError};
