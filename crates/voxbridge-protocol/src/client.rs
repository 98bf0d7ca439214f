//! Browser WebSocket protocol.
//!
//! These types define the JSON messages exchanged with the voice UI over a
//! persistent socket. Tags are kebab-case and payload fields camelCase,
//! which is the wire format the browser client speaks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::turns::{Turn, TurnMetadata};

// ============================================================================
// Commands (Client -> Server)
// ============================================================================

/// Commands sent from the browser to the relay.
///
/// An unrecognized `type` fails to parse; the server answers with an
/// [`ServerEvent::Error`] and keeps the connection open.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Start the assistant session.
    StartSession,

    /// Stop the assistant session.
    StopSession,

    /// Request a full history snapshot. Sent on (re)connect; the server
    /// never pushes history unasked.
    GetHistory,

    /// Clear the conversation history without touching the session.
    ClearHistory,

    /// One recognized voice transcript to forward to the assistant.
    VoiceCommand { transcript: String },
}

// ============================================================================
// Events (Server -> Client)
// ============================================================================

/// Events sent from the relay to the browser: broadcasts to every connected
/// client, or direct responses to the issuing one.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Session lifecycle flipped.
    SessionStatus { running: bool },

    /// Session metadata from the assistant's init event.
    SessionInit {
        model: String,
        #[serde(rename = "runtimeVersion", skip_serializing_if = "Option::is_none")]
        runtime_version: Option<String>,
    },

    /// The assistant subprocess terminated on its own.
    SessionEnded { code: Option<i32> },

    /// Full history snapshot, oldest first.
    History { messages: Vec<Turn> },

    /// Human-readable progress notice.
    Status { message: String },

    /// Streamed text fragment of the in-flight turn.
    Partial { text: String },

    /// The assistant invoked a tool.
    ToolCall {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolId")]
        tool_id: String,
        input: Value,
    },

    /// A turn completed; carries the reassembled answer.
    Response {
        #[serde(rename = "fullResponse")]
        full_response: String,
        #[serde(rename = "spokenSummary")]
        spoken_summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        metadata: TurnMetadata,
    },

    /// Error message.
    Error { message: String },

    /// The history was cleared.
    HistoryCleared,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turns::Turn;

    #[test]
    fn test_command_tags_parse() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"start-session"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::StartSession);

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"clear-history"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::ClearHistory);

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"voice-command","transcript":"list my files"}"#)
                .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::VoiceCommand {
                transcript: "list my files".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_command_type_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>("not json").is_err());
    }

    #[test]
    fn test_extra_fields_are_tolerated() {
        // Older clients attach fields the server no longer reads.
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"voice-command","transcript":"hi","workingDir":"/home/u"}"#,
        )
        .unwrap();
        assert!(matches!(cmd, ClientCommand::VoiceCommand { .. }));
    }

    #[test]
    fn test_event_wire_shapes() {
        let json = serde_json::to_string(&ServerEvent::SessionStatus { running: true }).unwrap();
        assert!(json.contains("\"type\":\"session-status\""));
        assert!(json.contains("\"running\":true"));

        let json = serde_json::to_string(&ServerEvent::ToolCall {
            tool_name: "bash".to_string(),
            tool_id: "tc_1".to_string(),
            input: serde_json::json!({"command": "ls"}),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"tool-call\""));
        assert!(json.contains("\"toolName\":\"bash\""));
        assert!(json.contains("\"toolId\":\"tc_1\""));

        let json = serde_json::to_string(&ServerEvent::Response {
            full_response: "Done.".to_string(),
            spoken_summary: "Done".to_string(),
            model: Some("sonnet".to_string()),
            metadata: TurnMetadata::default(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"response\""));
        assert!(json.contains("\"fullResponse\":\"Done.\""));
        assert!(json.contains("\"spokenSummary\":\"Done\""));

        let json = serde_json::to_string(&ServerEvent::HistoryCleared).unwrap();
        assert_eq!(json, r#"{"type":"history-cleared"}"#);
    }

    #[test]
    fn test_history_event_uses_turn_wire_shape() {
        let json = serde_json::to_string(&ServerEvent::History {
            messages: vec![Turn::user("hello", 1)],
        })
        .unwrap();
        assert!(json.contains("\"type\":\"history\""));
        // Turns nest their role under `type` as the browser expects.
        assert!(json.contains("\"messages\":[{\"type\":\"user\""));
    }

    #[test]
    fn test_session_ended_keeps_null_code() {
        // A signal-killed subprocess has no exit code; the client still
        // receives the field.
        let json = serde_json::to_string(&ServerEvent::SessionEnded { code: None }).unwrap();
        assert_eq!(json, r#"{"type":"session-ended","code":null}"#);
    }
}
