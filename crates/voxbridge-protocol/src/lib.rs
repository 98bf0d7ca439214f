//! Canonical wire protocol for the voxbridge relay.
//!
//! Three surfaces share these types:
//! - the browser WebSocket protocol ([`client`]),
//! - the assistant subprocess line-JSON protocol ([`agent`]),
//! - the conversation history unit both of them carry ([`turns`]).
//!
//! Everything here is pure data: parse and validate only, no I/O.

pub mod agent;
pub mod client;
pub mod turns;

pub use agent::{AgentCommand, AgentEvent, ContentBlock};
pub use client::{ClientCommand, ServerEvent};
pub use turns::{Role, TokenUsage, Turn, TurnMetadata};
