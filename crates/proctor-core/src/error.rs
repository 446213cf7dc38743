//! Core error types for the proctor relay

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// An ACL rule failed to parse. A single bad rule fails the whole
    /// load so a partial rule set is never applied.
    #[error("invalid ACL rule '{rule}': {source}")]
    Acl {
        rule: String,
        #[source]
        source: AclParseError,
    },
}

/// Errors from parsing one line of the authorization DSL
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AclParseError {
    /// A `who`, `filter` or `requests` section with no tokens
    #[error("empty {0} section")]
    Empty(&'static str),

    /// `ALL` combined with other tokens in the same section
    #[error("ALL cannot be combined with other {0} tokens")]
    MixedAll(&'static str),

    /// Token not valid for its section
    #[error("invalid {section} token: {token:?}")]
    BadToken {
        section: &'static str,
        token: String,
    },

    /// Rule value without a `filter: requests` separator
    #[error("expected 'filter: requests', missing ':'")]
    MissingColon,
}

/// Errors surfaced by a remote call to a managed host's agent
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The agent answered with a non-empty error field
    #[error("agent returned error: {0}")]
    Remote(String),

    /// The backend session went away before the response arrived
    #[error("connection to host lost")]
    ConnectionLost,

    /// No agent session is attached to the host
    #[error("host is not connected")]
    NotConnected,

    /// The agent answered with something the relay cannot interpret
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A forwarding listener for a returned port could not be opened
    #[error("tunnel error: {0}")]
    Tunnel(String),
}
