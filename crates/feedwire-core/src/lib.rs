//! # feedwire-core
//!
//! Foundation types shared by every feedwire crate:
//!
//! - [`ids`]: branded identifier newtypes ([`SessionId`])
//! - [`message`]: broadcast messages, priorities and the outbound envelope
//! - [`protocol`]: the JSON subscription protocol spoken by sessions
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod message;
pub mod protocol;

pub use ids::SessionId;
pub use message::{BroadcastMessage, Envelope, MessageKind, Priority};
pub use protocol::{ClientRequest, ProtocolError, ServerReply};
