//! Translator from subprocess events to domain events.
//!
//! Owns the in-flight turn accumulator: streamed text and tool-call
//! fragments collect here until a terminal `result` (or an error, or
//! process death) closes the turn. One subprocess event can produce zero or
//! more domain events.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use voxbridge_protocol::agent::{
    AgentEvent, AssistantMessage, ContentBlock, ResultEvent, StreamDelta, SystemEvent,
};
use voxbridge_protocol::turns::{TokenUsage, TurnMetadata};

/// Spoken-summary fallback cap, in characters.
const SPOKEN_FALLBACK_MAX_CHARS: usize = 500;

/// Marker the voice preamble asks the assistant to end its reply with.
/// Case-insensitive, body may span lines, non-greedy to the first `]`.
static SPOKEN_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\[spoken:\s*(.*?)\]").expect("valid spoken marker regex"));

/// Session facts captured once from the subprocess init event.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub tools: Vec<String>,
    pub version: Option<String>,
}

/// Normalized events the rest of the relay consumes.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// The subprocess announced itself.
    SessionInit(SessionMeta),

    /// Streamed text fragment of the in-flight turn.
    Partial { text: String },

    /// The assistant invoked a tool.
    ToolCall {
        name: String,
        id: String,
        input: Value,
    },

    /// The in-flight turn closed normally.
    TurnComplete {
        content: String,
        spoken_summary: String,
        metadata: TurnMetadata,
    },

    /// The in-flight turn failed; its partial output is discarded.
    TurnError { message: String },
}

/// Fragments of the turn currently being streamed.
#[derive(Debug, Default)]
struct TurnAccumulator {
    text: String,
    tool_calls: Vec<ToolCallRecord>,
}

#[derive(Debug)]
struct ToolCallRecord {
    name: String,
    id: String,
    input: Value,
}

/// Stateful translator; one per subprocess incarnation.
#[derive(Default)]
pub struct Translator {
    accumulator: Option<TurnAccumulator>,
    init_seen: bool,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a turn boundary when a user command is accepted. A live
    /// accumulator here means the previous turn never saw its terminal
    /// event -- a protocol violation; the fragments are dropped, never
    /// merged into the new turn.
    pub fn begin_turn(&mut self) {
        if let Some(acc) = self.accumulator.take() {
            warn!(
                "discarding stale turn accumulator at new turn boundary ({} chars, {} tool calls)",
                acc.text.len(),
                acc.tool_calls.len()
            );
        }
    }

    /// The subprocess died; whatever was in flight is gone.
    pub fn abort_turn(&mut self) {
        if let Some(acc) = self.accumulator.take() {
            debug!(
                "dropping {} buffered chars from interrupted turn",
                acc.text.len()
            );
        }
    }

    /// Translate one subprocess event into zero or more domain events.
    pub fn translate(&mut self, event: AgentEvent) -> Vec<DomainEvent> {
        match event {
            AgentEvent::System(sys) => self.on_system(sys),
            AgentEvent::Assistant { message } => self.on_assistant(message),
            AgentEvent::ContentBlockDelta { delta } => self.on_delta(delta),
            AgentEvent::Result(result) => self.on_result(*result),
            AgentEvent::Error { message } => self.on_error(message),
            AgentEvent::Unknown => Vec::new(),
        }
    }

    fn accumulator(&mut self) -> &mut TurnAccumulator {
        self.accumulator.get_or_insert_with(TurnAccumulator::default)
    }

    fn on_system(&mut self, sys: SystemEvent) -> Vec<DomainEvent> {
        if sys.subtype != "init" {
            return Vec::new();
        }
        if self.init_seen {
            debug!("ignoring repeated init event");
            return Vec::new();
        }
        self.init_seen = true;
        vec![DomainEvent::SessionInit(SessionMeta {
            model: sys.model,
            session_id: sys.session_id,
            tools: sys.tools,
            version: sys.version,
        })]
    }

    fn on_assistant(&mut self, message: AssistantMessage) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        for block in message.content {
            match block {
                ContentBlock::Text { text } => {
                    self.accumulator().text.push_str(&text);
                    events.push(DomainEvent::Partial { text });
                }
                ContentBlock::ToolUse { id, name, input } => {
                    self.accumulator().tool_calls.push(ToolCallRecord {
                        name: name.clone(),
                        id: id.clone(),
                        input: input.clone(),
                    });
                    events.push(DomainEvent::ToolCall { name, id, input });
                }
                ContentBlock::Unknown => {
                    debug!("skipping unrecognized content block");
                }
            }
        }
        events
    }

    fn on_delta(&mut self, delta: StreamDelta) -> Vec<DomainEvent> {
        match delta.text {
            Some(text) if !text.is_empty() => {
                self.accumulator().text.push_str(&text);
                vec![DomainEvent::Partial { text }]
            }
            _ => {
                debug!("ignoring non-text stream delta");
                Vec::new()
            }
        }
    }

    fn on_result(&mut self, result: ResultEvent) -> Vec<DomainEvent> {
        let acc = self.accumulator.take().unwrap_or_default();
        if !acc.tool_calls.is_empty() {
            debug!("turn closed after {} tool calls", acc.tool_calls.len());
        }
        let spoken_summary = extract_spoken_summary(&acc.text);
        let metadata = TurnMetadata {
            duration_ms: result.duration_ms,
            api_duration_ms: result.duration_api_ms,
            num_turns: result.num_turns,
            total_cost_usd: result.total_cost_usd,
            token_usage: result.usage.map(TokenUsage::from),
            is_error: result.is_error,
        };
        vec![DomainEvent::TurnComplete {
            content: acc.text,
            spoken_summary,
            metadata,
        }]
    }

    fn on_error(&mut self, message: Option<String>) -> Vec<DomainEvent> {
        self.accumulator = None;
        vec![DomainEvent::TurnError {
            message: message.unwrap_or_else(|| "assistant stream error".to_string()),
        }]
    }
}

/// Extract the short text meant for audible playback.
///
/// The LAST `[SPOKEN: ...]` marker wins -- the assistant sometimes echoes
/// the instruction format earlier in its reply. Without a marker, the final
/// paragraph stands in, capped at 500 characters.
pub fn extract_spoken_summary(content: &str) -> String {
    if let Some(caps) = SPOKEN_MARKER.captures_iter(content).last() {
        return caps[1].trim().to_string();
    }
    let trimmed = content.trim();
    let last_paragraph = trimmed.rsplit("\n\n").next().unwrap_or(trimmed).trim();
    truncate_chars(last_paragraph, SPOKEN_FALLBACK_MAX_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
