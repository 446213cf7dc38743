//! proctor-core: Core abstractions and configuration for the proctor relay
//!
//! This crate provides the domain types, the authorization engine, the
//! configuration surface and the trait seams shared by the relay daemon and
//! its tests.

pub mod acl;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;
#[cfg(unix)]
pub mod unix;

pub use acl::{AclRule, GroupLookup};
pub use error::{AclParseError, CallError, ConfigError};
pub use types::{HostStatus, SessionUser, UserKey};
