//! Error taxonomy for the relay core.

use thiserror::Error;

/// Errors crossing component boundaries in the session relay.
///
/// Parse failures on subprocess output are deliberately absent: a malformed
/// upstream line is logged and dropped inside the transport and must never
/// surface to clients. There are no automatic retries anywhere -- every
/// failure is reported upward or absorbed with a log line.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The assistant subprocess failed to start. Fatal to that start
    /// attempt; the session stays stopped.
    #[error("failed to spawn assistant process: {0}")]
    Spawn(#[source] std::io::Error),

    /// A command needed a running session and there is none. Answered to
    /// the submitting client only; recoverable by starting a session.
    #[error("no assistant session is running")]
    NotRunning,

    /// The subprocess stopped accepting input mid-write.
    #[error("assistant process is not accepting input")]
    Transport,

    /// A client payload failed to parse or used an unknown type. Answered
    /// with an error event; the connection stays open.
    #[error("invalid client message: {0}")]
    MalformedClientMessage(String),
}
