//! Canonical conversation turns.
//!
//! A `Turn` is the persistent unit of a conversation: one user request or
//! one assistant answer. Turns live in the in-memory history and ride the
//! `history` and `response` payloads to the browser.

use serde::{Deserialize, Serialize};

/// One entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Message role. Serialized as `type` -- the browser client switches on
    /// `msg.type === 'user' | 'assistant'`.
    #[serde(rename = "type")]
    pub role: Role,

    /// Final text content.
    pub content: String,

    /// Short text intended for audible playback (assistant turns).
    #[serde(
        rename = "spokenSummary",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub spoken_summary: Option<String>,

    /// Request accounting from the assistant's terminal result event
    /// (assistant turns only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,

    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Turn {
    /// A user turn, appended the moment its command is accepted.
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            spoken_summary: None,
            metadata: None,
            timestamp,
        }
    }

    /// A completed assistant turn.
    pub fn assistant(
        content: impl Into<String>,
        spoken_summary: impl Into<String>,
        metadata: TurnMetadata,
        timestamp: i64,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            spoken_summary: Some(spoken_summary.into()),
            metadata: Some(metadata),
            timestamp,
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Accounting captured from the assistant's terminal `result` event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Wall-clock duration of the turn.
    #[serde(rename = "durationMs", default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Time spent in upstream API calls.
    #[serde(
        rename = "apiDurationMs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub api_duration_ms: Option<u64>,

    /// Number of internal assistant turns consumed by this request.
    #[serde(rename = "numTurns", default, skip_serializing_if = "Option::is_none")]
    pub num_turns: Option<u32>,

    #[serde(
        rename = "totalCostUsd",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub total_cost_usd: Option<f64>,

    #[serde(rename = "tokenUsage", default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,

    /// Whether the assistant reported the turn as failed.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Token counts for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,

    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,

    #[serde(
        rename = "cacheReadTokens",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_read_tokens: Option<u64>,

    #[serde(
        rename = "cacheWriteTokens",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cache_write_tokens: Option<u64>,
}
