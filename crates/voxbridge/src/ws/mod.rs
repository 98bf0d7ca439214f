//! WebSocket surface: connection hub and per-connection handler.

pub mod handler;
pub mod hub;
