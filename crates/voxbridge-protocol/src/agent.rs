//! Assistant subprocess line protocol.
//!
//! The assistant CLI is spawned once per session in stream-json mode: the
//! relay writes one JSON user-message envelope per turn to its stdin and
//! reads one JSON event per stdout line. These are the native shapes of
//! that stream, plus the conversion into canonical turn accounting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::turns::TokenUsage;

// ============================================================================
// Events (subprocess stdout -> relay)
// ============================================================================

/// One parsed stdout line from the assistant subprocess.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Lifecycle notices; `subtype == "init"` carries session metadata.
    System(SystemEvent),

    /// A complete or incremental assistant message with content blocks.
    Assistant { message: AssistantMessage },

    /// Fine-grained streaming text delta.
    ContentBlockDelta { delta: StreamDelta },

    /// Terminal event closing the current turn.
    Result(Box<ResultEvent>),

    /// Stream-level error.
    Error {
        #[serde(default)]
        message: Option<String>,
    },

    /// Unrecognized tag -- tolerated for forward compatibility.
    #[serde(other)]
    Unknown,
}

impl AgentEvent {
    /// Parse one stdout line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// `system` event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemEvent {
    pub subtype: String,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub session_id: Option<String>,

    /// Names of the tools available to the assistant.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Assistant runtime version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Assistant message body: an ordered list of content blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One content block within an assistant message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Streaming delta payload. Only text deltas matter to the relay; other
/// delta kinds arrive without `text` and degrade to a no-op.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub text: Option<String>,
}

/// Terminal `result` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: Option<String>,

    #[serde(default)]
    pub is_error: bool,

    #[serde(default)]
    pub duration_ms: Option<u64>,

    #[serde(default)]
    pub duration_api_ms: Option<u64>,

    #[serde(default)]
    pub num_turns: Option<u32>,

    #[serde(default)]
    pub total_cost_usd: Option<f64>,

    #[serde(default)]
    pub usage: Option<ResultUsage>,

    /// The subprocess's own rendering of the answer. The relay reassembles
    /// turn content from the streamed fragments instead; kept for
    /// diagnostics.
    #[serde(default)]
    pub result: Option<String>,
}

/// Native token accounting inside a `result` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultUsage {
    #[serde(default)]
    pub input_tokens: u64,

    #[serde(default)]
    pub output_tokens: u64,

    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,

    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
}

impl From<ResultUsage> for TokenUsage {
    fn from(usage: ResultUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_write_tokens: usage.cache_creation_input_tokens,
        }
    }
}

// ============================================================================
// Commands (relay -> subprocess stdin)
// ============================================================================

/// One stdin line to the assistant subprocess.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    /// A user message opening one turn.
    User { message: UserPayload },
}

impl AgentCommand {
    /// Build the user-message envelope for one turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            message: UserPayload {
                role: "user".to_string(),
                content: vec![UserContent::Text { text: text.into() }],
            },
        }
    }
}

/// Inner message object of a user command.
#[derive(Debug, Clone, Serialize)]
pub struct UserPayload {
    pub role: String,
    pub content: Vec<UserContent>,
}

/// Content block inside a user message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    Text { text: String },
}
