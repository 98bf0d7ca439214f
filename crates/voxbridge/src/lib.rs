//! voxbridge: a voice front-end relay for a line-JSON assistant CLI.
//!
//! Architecture, leaves first: the subprocess transport owns the assistant
//! process and frames its line-JSON streams; the event translator
//! reassembles streamed fragments into turns; the session manager
//! serializes lifecycle and turn flow; the history store keeps the
//! conversation for reconnecting clients; the hub fans broadcasts out to
//! every connected socket.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod ws;
