//! End-to-end relay tests against stub assistant subprocesses.
//!
//! Each stub is a small shell script speaking the assistant's line protocol:
//! an init event on startup, then canned events per stdin line. The tests
//! drive the session manager directly and observe broadcasts through
//! registered hub connections, exactly as the WebSocket layer does.

#![cfg(unix)]

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use voxbridge::config::AgentConfig;
use voxbridge::error::SessionError;
use voxbridge::history::HistoryStore;
use voxbridge::session::{SessionManager, SessionState};
use voxbridge::ws::hub::WsHub;
use voxbridge_protocol::client::ServerEvent;
use voxbridge_protocol::turns::Role;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Replies instantly to every prompt.
const ECHO_STUB: &str = r#"
echo '{"type":"system","subtype":"init","model":"stub-model","session_id":"sess-1","tools":["bash","edit"],"version":"1.2.3"}'
while IFS= read -r _line; do
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"All done. "}]}}'
  echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"[SPOKEN: Finished the task.]"}}'
  echo '{"type":"result","subtype":"success","is_error":false,"duration_ms":12,"duration_api_ms":8,"num_turns":1,"total_cost_usd":0.001,"usage":{"input_tokens":10,"output_tokens":20}}'
done
"#;

/// Replies after a one second think, leaving a window where the turn is
/// observably in flight.
const SLOW_STUB: &str = r#"
echo '{"type":"system","subtype":"init","model":"stub-model"}'
while IFS= read -r _line; do
  sleep 1
  echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Answer."}]}}'
  echo '{"type":"result","subtype":"success","duration_ms":1000}'
done
"#;

/// Dies with a nonzero code as soon as the first prompt arrives.
const CRASH_STUB: &str = r#"
echo '{"type":"system","subtype":"init","model":"stub-model"}'
IFS= read -r _line
exit 7
"#;

struct Harness {
    session: Arc<SessionManager>,
    history: Arc<HistoryStore>,
    hub: Arc<WsHub>,
    _script: tempfile::TempPath,
}

fn harness(stub: &str) -> Harness {
    let mut file = tempfile::NamedTempFile::new().expect("create stub script");
    file.write_all(stub.as_bytes()).expect("write stub script");
    let script = file.into_temp_path();

    let agent = AgentConfig {
        binary: PathBuf::from("/bin/sh"),
        args: vec![script.to_string_lossy().into_owned()],
        working_dir: std::env::temp_dir(),
        env: HashMap::new(),
    };
    let history = Arc::new(HistoryStore::new());
    let hub = Arc::new(WsHub::new());
    let session = SessionManager::new(agent, Arc::clone(&history), Arc::clone(&hub));

    Harness {
        session,
        history,
        hub,
        _script: script,
    }
}

/// Receive events until one satisfies the predicate, skipping the rest.
async fn wait_for<F>(rx: &mut mpsc::Receiver<ServerEvent>, mut pred: F) -> ServerEvent
where
    F: FnMut(&ServerEvent) -> bool,
{
    loop {
        let event = timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("hub channel closed");
        if pred(&event) {
            return event;
        }
    }
}

/// Collect everything broadcast within the window.
async fn drain_for(rx: &mut mpsc::Receiver<ServerEvent>, window: Duration) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match timeout(deadline.saturating_duration_since(tokio::time::Instant::now()), rx.recv())
            .await
        {
            Ok(Some(event)) => events.push(event),
            Ok(None) | Err(_) => return events,
        }
    }
}

#[tokio::test]
async fn test_start_broadcasts_status_and_init() {
    let h = harness(ECHO_STUB);
    let (mut rx, _) = h.hub.register();

    h.session.start().await.unwrap();
    assert_eq!(h.session.state().await, SessionState::Running);

    wait_for(&mut rx, |e| {
        matches!(e, ServerEvent::SessionStatus { running: true })
    })
    .await;
    let init = wait_for(&mut rx, |e| matches!(e, ServerEvent::SessionInit { .. })).await;
    match init {
        ServerEvent::SessionInit {
            model,
            runtime_version,
        } => {
            assert_eq!(model, "stub-model");
            assert_eq!(runtime_version.as_deref(), Some("1.2.3"));
        }
        _ => unreachable!(),
    }

    let metadata = h.session.metadata().await.expect("metadata captured");
    assert_eq!(metadata.tools, vec!["bash", "edit"]);
    assert_eq!(metadata.session_id.as_deref(), Some("sess-1"));
}

#[tokio::test]
async fn test_turn_roundtrip_reassembles_content() {
    let h = harness(ECHO_STUB);
    let (mut rx, _) = h.hub.register();
    h.session.start().await.unwrap();

    h.session.submit("what time is it").await.unwrap();

    // Streamed fragments arrive before the terminal response.
    wait_for(&mut rx, |e| {
        matches!(e, ServerEvent::Partial { text } if text == "All done. ")
    })
    .await;

    let response = wait_for(&mut rx, |e| matches!(e, ServerEvent::Response { .. })).await;
    match response {
        ServerEvent::Response {
            full_response,
            spoken_summary,
            model,
            metadata,
        } => {
            assert_eq!(full_response, "All done. [SPOKEN: Finished the task.]");
            assert_eq!(spoken_summary, "Finished the task.");
            assert_eq!(model.as_deref(), Some("stub-model"));
            assert_eq!(metadata.duration_ms, Some(12));
            assert_eq!(metadata.token_usage.unwrap().output_tokens, 20);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_history_ordering_across_turns() {
    let h = harness(SLOW_STUB);
    let (mut rx, _) = h.hub.register();
    h.session.start().await.unwrap();

    // The user turn is appended synchronously on submit.
    h.session.submit("A").await.unwrap();
    assert_eq!(h.history.len().await, 1);

    wait_for(&mut rx, |e| matches!(e, ServerEvent::Response { .. })).await;
    assert_eq!(h.history.len().await, 2);

    // While B is in flight: exactly [user A, assistant A, user B].
    h.session.submit("B").await.unwrap();
    let turns = h.history.snapshot().await;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "A");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[2].role, Role::User);
    assert_eq!(turns[2].content, "B");

    wait_for(&mut rx, |e| matches!(e, ServerEvent::Response { .. })).await;
    let turns = h.history.snapshot().await;
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[3].role, Role::Assistant);
    assert_eq!(turns[3].content, "Answer.");
}

#[tokio::test]
async fn test_response_fans_out_to_all_clients() {
    let h = harness(ECHO_STUB);
    let (mut rx1, _) = h.hub.register();
    let (mut rx2, _) = h.hub.register();
    h.session.start().await.unwrap();

    h.session.submit("hello").await.unwrap();

    let r1 = wait_for(&mut rx1, |e| matches!(e, ServerEvent::Response { .. })).await;
    let r2 = wait_for(&mut rx2, |e| matches!(e, ServerEvent::Response { .. })).await;
    assert_eq!(
        serde_json::to_value(&r1).unwrap(),
        serde_json::to_value(&r2).unwrap()
    );
}

#[tokio::test]
async fn test_crash_mid_turn_keeps_the_question() {
    let h = harness(CRASH_STUB);
    let (mut rx, _) = h.hub.register();
    h.session.start().await.unwrap();
    wait_for(&mut rx, |e| matches!(e, ServerEvent::SessionInit { .. })).await;

    h.session.submit("doomed request").await.unwrap();

    let ended = wait_for(&mut rx, |e| matches!(e, ServerEvent::SessionEnded { .. })).await;
    match ended {
        ServerEvent::SessionEnded { code } => assert_eq!(code, Some(7)),
        _ => unreachable!(),
    }
    assert_eq!(h.session.state().await, SessionState::Stopped);

    // The question survives; its answer never existed.
    let turns = h.history.snapshot().await;
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].content, "doomed request");
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let h = harness(ECHO_STUB);
    let (mut rx, _) = h.hub.register();
    h.session.start().await.unwrap();
    wait_for(&mut rx, |e| {
        matches!(e, ServerEvent::SessionStatus { running: true })
    })
    .await;

    h.session.stop().await;
    wait_for(&mut rx, |e| {
        matches!(e, ServerEvent::SessionStatus { running: false })
    })
    .await;
    assert!(h.history.is_empty().await);

    // A second stop must not produce another transition, and the killed
    // subprocess's exit must not surface as session-ended.
    h.session.stop().await;
    let stragglers = drain_for(&mut rx, Duration::from_millis(500)).await;
    assert!(
        stragglers.iter().all(|e| !matches!(
            e,
            ServerEvent::SessionStatus { .. } | ServerEvent::SessionEnded { .. }
        )),
        "unexpected lifecycle events after double stop: {stragglers:?}"
    );
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let h = harness(ECHO_STUB);
    let (mut rx, _) = h.hub.register();
    h.session.start().await.unwrap();
    wait_for(&mut rx, |e| {
        matches!(e, ServerEvent::SessionStatus { running: true })
    })
    .await;
    wait_for(&mut rx, |e| matches!(e, ServerEvent::SessionInit { .. })).await;

    // Second start: no second process, so no second status or init event.
    h.session.start().await.unwrap();
    assert_eq!(h.session.state().await, SessionState::Running);
    let stragglers = drain_for(&mut rx, Duration::from_millis(500)).await;
    assert!(
        stragglers.iter().all(|e| !matches!(
            e,
            ServerEvent::SessionStatus { .. } | ServerEvent::SessionInit { .. }
        )),
        "unexpected lifecycle events after redundant start: {stragglers:?}"
    );
}

#[tokio::test]
async fn test_submit_without_session_is_rejected() {
    let h = harness(ECHO_STUB);
    let err = h.session.submit("anyone there?").await.unwrap_err();
    assert!(matches!(err, SessionError::NotRunning));
    assert!(h.history.is_empty().await);
}

#[tokio::test]
async fn test_spawn_failure_reports_status_and_stays_stopped() {
    let mut h = harness(ECHO_STUB);
    // Rebuild the manager with a binary that cannot exist.
    let agent = AgentConfig {
        binary: PathBuf::from("/nonexistent/voxbridge-agent"),
        args: Vec::new(),
        working_dir: std::env::temp_dir(),
        env: HashMap::new(),
    };
    h.session = SessionManager::new(agent, Arc::clone(&h.history), Arc::clone(&h.hub));
    let (mut rx, _) = h.hub.register();

    let err = h.session.start().await.unwrap_err();
    assert!(matches!(err, SessionError::Spawn(_)));
    assert_eq!(h.session.state().await, SessionState::Stopped);

    let status = wait_for(&mut rx, |e| matches!(e, ServerEvent::Status { .. })).await;
    match status {
        ServerEvent::Status { message } => {
            assert!(message.contains("Failed to start assistant session"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_restart_begins_with_empty_history() {
    let h = harness(ECHO_STUB);
    let (mut rx, _) = h.hub.register();
    h.session.start().await.unwrap();
    h.session.submit("first").await.unwrap();
    wait_for(&mut rx, |e| matches!(e, ServerEvent::Response { .. })).await;
    assert_eq!(h.history.len().await, 2);

    h.session.stop().await;
    h.session.start().await.unwrap();
    assert!(h.history.is_empty().await);
    assert_eq!(h.session.state().await, SessionState::Running);
}
