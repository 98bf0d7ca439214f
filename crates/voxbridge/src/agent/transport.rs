//! Assistant subprocess transport.
//!
//! Owns the OS process and its three standard streams. Line framing and
//! JSON decoding happen here; everything downstream sees parsed
//! [`AgentEvent`]s. A line that fails to parse is logged and dropped -- it
//! never stops the stream.

use std::io;
use std::process::Stdio;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use voxbridge_protocol::agent::AgentEvent;

use crate::config::AgentConfig;
use crate::error::SessionError;

/// Buffer for parsed subprocess events in flight to the session pump.
pub const EVENT_BUFFER_SIZE: usize = 256;

/// Buffer for stdin lines awaiting the writer task.
const WRITE_BUFFER_SIZE: usize = 32;

/// Notifications produced by a live transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// One successfully parsed stdout event.
    Event(AgentEvent),

    /// The process terminated. Sent exactly once, for any cause.
    Exited(ExitInfo),
}

/// How the subprocess ended.
#[derive(Debug, Clone, Copy)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Handle to a spawned assistant process.
///
/// Dropping the handle closes stdin; [`stop`](Self::stop) kills the
/// process. Each incarnation gets its own handle -- the session manager
/// never holds more than one.
pub struct AgentTransport {
    line_tx: mpsc::Sender<String>,
    kill_tx: mpsc::Sender<()>,
}

impl AgentTransport {
    /// Spawn the assistant CLI and wire its streams.
    ///
    /// Events and the final exit notification arrive on `event_tx`. The
    /// subprocess inherits this process's environment plus the configured
    /// extras and working directory.
    pub fn spawn(
        config: &AgentConfig,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, SessionError> {
        let mut cmd = Command::new(&config.binary);
        cmd.args(&config.args)
            .current_dir(&config.working_dir)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(SessionError::Spawn)?;
        info!(
            "spawned assistant process (pid={}) in {}",
            child.id().unwrap_or(0),
            config.working_dir.display()
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SessionError::Spawn(io::Error::other("stdin not piped")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SessionError::Spawn(io::Error::other("stdout not piped")))?;
        let stderr = child.stderr.take();

        // stdout reader: one parsed event per non-empty line.
        {
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match AgentEvent::parse(&line) {
                        Ok(event) => {
                            if event_tx.send(TransportEvent::Event(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("dropping unparseable assistant output: {e} - line: {line}");
                        }
                    }
                }
                debug!("assistant stdout closed");
            });
        }

        // stderr drain for diagnostics.
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        debug!("assistant stderr: {line}");
                    }
                }
            });
        }

        // stdin writer. The sender half lives in the transport handle;
        // closing it drops stdin and ends the pipe.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(WRITE_BUFFER_SIZE);
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = line_rx.recv().await {
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    warn!("failed to write to assistant stdin: {e}");
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    warn!("failed to flush assistant stdin: {e}");
                    break;
                }
            }
        });

        // wait task: owns the child and reports the exit exactly once.
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx.recv() => {
                    debug!("kill requested, terminating assistant process");
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let exit = match status {
                Ok(status) => ExitInfo {
                    code: status.code(),
                    signal: exit_signal(&status),
                },
                Err(e) => {
                    warn!("failed to reap assistant process: {e}");
                    ExitInfo {
                        code: None,
                        signal: None,
                    }
                }
            };
            info!(
                "assistant process exited (code={:?}, signal={:?})",
                exit.code, exit.signal
            );
            let _ = event_tx.send(TransportEvent::Exited(exit)).await;
        });

        Ok(Self { line_tx, kill_tx })
    }

    /// Enqueue one newline-terminated JSON message for the subprocess.
    pub async fn write_line<T: Serialize>(&self, payload: &T) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(payload).map_err(|_| SessionError::Transport)?;
        line.push('\n');
        self.line_tx
            .send(line)
            .await
            .map_err(|_| SessionError::NotRunning)
    }

    /// Ask the wait task to kill the process. Idempotent: with the process
    /// already gone this is a no-op.
    pub fn stop(&self) {
        let _ = self.kill_tx.try_send(());
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    use tokio::time::timeout;

    use voxbridge_protocol::agent::AgentCommand;

    use super::*;

    const RECV_TIMEOUT: Duration = Duration::from_secs(10);

    fn shell_config(script: &str) -> AgentConfig {
        AgentConfig {
            binary: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: std::env::temp_dir(),
            env: HashMap::new(),
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport channel closed")
    }

    #[tokio::test]
    async fn test_emits_parsed_events_then_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let config =
            shell_config(r#"echo '{"type":"system","subtype":"init","model":"stub"}'; exit 0"#);
        let _transport = AgentTransport::spawn(&config, tx).unwrap();

        match next_event(&mut rx).await {
            TransportEvent::Event(AgentEvent::System(sys)) => {
                assert_eq!(sys.subtype, "init");
                assert_eq!(sys.model.as_deref(), Some("stub"));
            }
            other => panic!("expected init event, got {other:?}"),
        }
        match next_event(&mut rx).await {
            TransportEvent::Exited(exit) => assert_eq!(exit.code, Some(0)),
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_line_is_dropped_not_fatal() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = shell_config(
            r#"echo 'this is not json'; echo '{"type":"result"}'; exit 0"#,
        );
        let _transport = AgentTransport::spawn(&config, tx).unwrap();

        // The garbage line never arrives; the valid one after it does.
        match next_event(&mut rx).await {
            TransportEvent::Event(AgentEvent::Result(_)) => {}
            other => panic!("expected result event, got {other:?}"),
        }
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Exited(_)));
    }

    #[tokio::test]
    async fn test_write_line_reaches_stdin() {
        let (tx, mut rx) = mpsc::channel(16);
        // Stub acknowledges one stdin line with a result event.
        let config = shell_config(r#"IFS= read -r _line; echo '{"type":"result"}'"#);
        let transport = AgentTransport::spawn(&config, tx).unwrap();

        transport
            .write_line(&AgentCommand::user("hello"))
            .await
            .unwrap();

        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Event(AgentEvent::Result(_))
        ));
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Exited(_)));
    }

    #[tokio::test]
    async fn test_stop_kills_and_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(16);
        let config = shell_config("sleep 30");
        let transport = AgentTransport::spawn(&config, tx).unwrap();

        transport.stop();
        transport.stop();

        match next_event(&mut rx).await {
            TransportEvent::Exited(exit) => {
                assert_eq!(exit.code, None);
                assert_eq!(exit.signal, Some(9));
            }
            other => panic!("expected exit, got {other:?}"),
        }
        // Exactly one exit notification: the channel closes afterwards.
        assert!(timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().is_none());
    }
}
