//! proctor-protocol: Wire protocol for the proctor relay
//!
//! This crate defines the length-framed JSON protocol spoken on both legs of
//! the relay: front-end client to relay, and relay to the agent running on
//! each managed host.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{FrameCodec, MAX_PAYLOAD_SIZE};
pub use error::ProtocolError;
pub use message::{Request, Response, HELLO_ID, INFO_PUSH_ID, USERS_PUSH_ID};
