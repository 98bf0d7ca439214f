//! Session lifecycle and turn orchestration.
//!
//! One logical assistant session per server process. All state transitions
//! are serialized behind a single lock, and pump events are tagged with a
//! generation counter so that output from a previous subprocess
//! incarnation -- a crash racing a stop, a late partial after restart --
//! can never corrupt the current session or duplicate a broadcast.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, mpsc};

use voxbridge_protocol::agent::AgentCommand;
use voxbridge_protocol::client::ServerEvent;
use voxbridge_protocol::turns::Turn;

use crate::agent::translator::{DomainEvent, Translator};
use crate::agent::transport::{AgentTransport, EVENT_BUFFER_SIZE, ExitInfo, TransportEvent};
use crate::config::AgentConfig;
use crate::error::SessionError;
use crate::history::HistoryStore;
use crate::ws::hub::WsHub;

/// Instructions wrapped around every voice transcript. The trailing marker
/// is what the spoken-summary extraction looks for.
const VOICE_PROMPT_PREFIX: &str = "You are being invoked via a voice interface. Be brief. After completing the user's request, end your response with a spoken summary in this exact format: [SPOKEN: your 1-2 sentence summary here]. Keep it conversational and concise - it will be read aloud.\n\nUser's voice request: ";

/// Lifecycle of the logical assistant session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Running,
}

impl SessionState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Facts reported by the subprocess once per running period.
#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub tools: Vec<String>,
    pub runtime_version: Option<String>,
}

struct SessionInner {
    state: SessionState,
    /// Live subprocess handle. `Some` only while Starting/Running -- the
    /// at-most-one-process invariant in type form.
    transport: Option<AgentTransport>,
    translator: Option<Arc<Mutex<Translator>>>,
    metadata: Option<SessionMetadata>,
    /// Bumped on every start and stop; pump events carrying an older value
    /// belong to a dead incarnation and are dropped.
    generation: u64,
}

/// Owner of the single assistant session.
pub struct SessionManager {
    inner: Mutex<SessionInner>,
    history: Arc<HistoryStore>,
    hub: Arc<WsHub>,
    agent_config: AgentConfig,
}

impl SessionManager {
    pub fn new(
        agent_config: AgentConfig,
        history: Arc<HistoryStore>,
        hub: Arc<WsHub>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Stopped,
                transport: None,
                translator: None,
                metadata: None,
                generation: 0,
            }),
            history,
            hub,
            agent_config,
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Session metadata from the subprocess init event, if seen.
    pub async fn metadata(&self) -> Option<SessionMetadata> {
        self.inner.lock().await.metadata.clone()
    }

    /// Start the assistant session.
    ///
    /// A start while Starting/Running is a logged no-op -- there is never a
    /// second concurrent subprocess. A spawn failure leaves the session
    /// Stopped, is reported to all clients via `status`, and is not
    /// retried.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if !inner.state.is_stopped() {
            info!("session already {}; ignoring start request", inner.state);
            return Ok(());
        }
        inner.state = SessionState::Starting;
        self.history.clear().await;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let transport = match AgentTransport::spawn(&self.agent_config, event_tx) {
            Ok(transport) => transport,
            Err(e) => {
                error!("assistant spawn failed: {e}");
                inner.state = SessionState::Stopped;
                drop(inner);
                self.hub
                    .broadcast(ServerEvent::Status {
                        message: format!("Failed to start assistant session: {e}"),
                    })
                    .await;
                return Err(e);
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        let translator = Arc::new(Mutex::new(Translator::new()));
        inner.transport = Some(transport);
        inner.translator = Some(Arc::clone(&translator));
        inner.metadata = None;
        inner.state = SessionState::Running;
        drop(inner);

        tokio::spawn({
            let manager = Arc::clone(self);
            async move { manager.pump(generation, event_rx, translator).await }
        });

        info!("assistant session running");
        self.hub
            .broadcast(ServerEvent::SessionStatus { running: true })
            .await;
        Ok(())
    }

    /// Stop the assistant session. Idempotent: a second stop produces no
    /// second broadcast.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_stopped() {
            debug!("session already stopped");
            return;
        }
        if let Some(transport) = inner.transport.take() {
            transport.stop();
        }
        inner.translator = None;
        inner.metadata = None;
        inner.generation += 1;
        inner.state = SessionState::Stopped;
        drop(inner);

        self.history.clear().await;
        self.hub
            .broadcast(ServerEvent::SessionStatus { running: false })
            .await;
        info!("assistant session stopped");
    }

    /// Forward one voice transcript to the assistant.
    ///
    /// The user turn lands in history before the subprocess round-trip
    /// begins, so "what was asked" survives even if no answer ever
    /// arrives. A submit during an in-flight turn is accepted and queues at
    /// the subprocess's stdin; the one-accumulator invariant keeps an early
    /// submit from corrupting turn reassembly.
    pub async fn submit(&self, transcript: &str) -> Result<(), SessionError> {
        let inner = self.inner.lock().await;
        if !inner.state.is_running() {
            return Err(SessionError::NotRunning);
        }

        self.history
            .append(Turn::user(transcript, Utc::now().timestamp_millis()))
            .await;

        if let Some(translator) = inner.translator.as_ref() {
            translator.lock().await.begin_turn();
        }

        let command = AgentCommand::user(format!("{VOICE_PROMPT_PREFIX}{transcript}"));
        match inner.transport.as_ref() {
            Some(transport) => transport.write_line(&command).await,
            None => Err(SessionError::NotRunning),
        }
    }

    /// Event pump for one subprocess incarnation.
    async fn pump(
        self: Arc<Self>,
        generation: u64,
        mut event_rx: mpsc::Receiver<TransportEvent>,
        translator: Arc<Mutex<Translator>>,
    ) {
        while let Some(event) = event_rx.recv().await {
            match event {
                TransportEvent::Event(raw) => {
                    // Scope the translator lock: `apply` takes the session
                    // lock, and `submit` holds it while locking the
                    // translator.
                    let domain_events = { translator.lock().await.translate(raw) };
                    for domain_event in domain_events {
                        self.apply(generation, domain_event).await;
                    }
                }
                TransportEvent::Exited(exit) => {
                    translator.lock().await.abort_turn();
                    self.handle_exit(generation, exit).await;
                    break;
                }
            }
        }
        debug!("session pump finished (generation {generation})");
    }

    /// Apply one domain event, unless it belongs to a dead incarnation.
    async fn apply(&self, generation: u64, event: DomainEvent) {
        match event {
            DomainEvent::SessionInit(meta) => {
                let broadcast = {
                    let mut inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return;
                    }
                    let metadata = SessionMetadata {
                        model: meta.model,
                        session_id: meta.session_id,
                        tools: meta.tools,
                        runtime_version: meta.version,
                    };
                    info!(
                        "assistant session initialized (model={:?}, {} tools)",
                        metadata.model,
                        metadata.tools.len()
                    );
                    let event = ServerEvent::SessionInit {
                        model: metadata.model.clone().unwrap_or_default(),
                        runtime_version: metadata.runtime_version.clone(),
                    };
                    inner.metadata = Some(metadata);
                    event
                };
                self.hub.broadcast(broadcast).await;
            }
            DomainEvent::Partial { text } => {
                if !self.is_current(generation).await {
                    return;
                }
                self.hub.broadcast(ServerEvent::Partial { text }).await;
            }
            DomainEvent::ToolCall { name, id, input } => {
                if !self.is_current(generation).await {
                    return;
                }
                self.hub
                    .broadcast(ServerEvent::ToolCall {
                        tool_name: name,
                        tool_id: id,
                        input,
                    })
                    .await;
            }
            DomainEvent::TurnComplete {
                content,
                spoken_summary,
                metadata,
            } => {
                let model = {
                    let inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return;
                    }
                    inner.metadata.as_ref().and_then(|m| m.model.clone())
                };
                self.history
                    .append(Turn::assistant(
                        content.clone(),
                        spoken_summary.clone(),
                        metadata.clone(),
                        Utc::now().timestamp_millis(),
                    ))
                    .await;
                self.hub
                    .broadcast(ServerEvent::Response {
                        full_response: content,
                        spoken_summary,
                        model,
                        metadata,
                    })
                    .await;
            }
            DomainEvent::TurnError { message } => {
                if !self.is_current(generation).await {
                    return;
                }
                warn!("assistant turn failed: {message}");
                self.hub.broadcast(ServerEvent::Error { message }).await;
            }
        }
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.inner.lock().await.generation == generation
    }

    /// The subprocess died on its own. If this incarnation is still current
    /// the session collapses to Stopped and everyone hears `session-ended`;
    /// a stale exit (after an explicit stop) is ignored. The history keeps
    /// the user turn of any in-flight request -- its assistant half is
    /// simply absent.
    async fn handle_exit(&self, generation: u64, exit: ExitInfo) {
        {
            let mut inner = self.inner.lock().await;
            if inner.generation != generation {
                debug!("ignoring exit from a previous session incarnation");
                return;
            }
            inner.transport = None;
            inner.translator = None;
            inner.metadata = None;
            inner.generation += 1;
            inner.state = SessionState::Stopped;
        }
        warn!(
            "assistant process exited unexpectedly (code={:?}, signal={:?})",
            exit.code, exit.signal
        );
        self.hub
            .broadcast(ServerEvent::SessionEnded { code: exit.code })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_defaults_to_stopped() {
        let state = SessionState::default();
        assert!(state.is_stopped());
        assert!(!state.is_running());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
        assert_eq!(SessionState::Starting.to_string(), "starting");
        assert_eq!(SessionState::Running.to_string(), "running");
    }

    #[test]
    fn test_voice_preamble_mandates_spoken_marker() {
        // The preamble must ask for the exact marker the extractor scans
        // for.
        assert!(VOICE_PROMPT_PREFIX.contains("[SPOKEN:"));
        assert!(VOICE_PROMPT_PREFIX.ends_with("User's voice request: "));
    }
}
