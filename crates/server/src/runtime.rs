// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-backed reference runtime
//!
//! The default implementation of the agent-runtime port: each message
//! spawns the configured command in the session's working directory, writes
//! the prompt to stdin, and streams stdout lines back as `text_delta`
//! events. Production deployments swap a real LLM runner in at the
//! composition root; this keeps `dorkd` operable end-to-end without one.

use async_trait::async_trait;
use dork_core::{
    AgentRuntime, EventStream, PermissionMode, RuntimeConfig, RuntimeError, SendOptions,
    SessionOptions, StreamEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone)]
struct SessionState {
    cwd: Option<PathBuf>,
    permission_mode: PermissionMode,
}

pub struct ProcessRuntime {
    config: RuntimeConfig,
    default_cwd: Option<PathBuf>,
    sessions: Mutex<HashMap<String, SessionState>>,
    // One send_message at a time per session id, per the port contract.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessRuntime {
    pub fn new(config: RuntimeConfig, default_cwd: Option<PathBuf>) -> Self {
        Self {
            config,
            default_cwd,
            sessions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    fn session_cwd(&self, session_id: &str, opts: &SendOptions) -> Option<PathBuf> {
        opts.cwd
            .clone()
            .or_else(|| self.sessions.lock().get(session_id).and_then(|s| s.cwd.clone()))
            .or_else(|| self.default_cwd.clone())
    }
}

#[async_trait]
impl AgentRuntime for ProcessRuntime {
    async fn ensure_session(
        &self,
        session_id: &str,
        opts: SessionOptions,
    ) -> Result<(), RuntimeError> {
        let mut sessions = self.sessions.lock();
        let entry = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState { cwd: None, permission_mode: opts.permission_mode });
        if opts.cwd.is_some() {
            entry.cwd = opts.cwd;
        }
        entry.permission_mode = opts.permission_mode;
        Ok(())
    }

    async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        opts: SendOptions,
    ) -> Result<EventStream, RuntimeError> {
        let lock = self.session_lock(session_id);
        let cwd = self.session_cwd(session_id, &opts);

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &cwd {
            command.current_dir(cwd);
        }

        let mut input = String::new();
        if let Some(append) = &opts.system_prompt_append {
            input.push_str(append);
            input.push_str("\n\n");
        }
        input.push_str(content);

        let (tx, stream) = EventStream::channel(EventStream::DEFAULT_CAPACITY);
        let session = session_id.to_string();
        tokio::spawn(async move {
            // Serialize with any other in-flight message for this session.
            let _guard = lock.lock().await;

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(e) => {
                    let _ = tx
                        .send(StreamEvent::Error { message: format!("spawn failed: {e}") })
                        .await;
                    return;
                }
            };
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::warn!(session = %session, error = %e, "stdin write failed");
                }
                drop(stdin);
            }
            let Some(stdout) = child.stdout.take() else {
                let _ = tx
                    .send(StreamEvent::Error { message: "no stdout from runtime".to_string() })
                    .await;
                return;
            };

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let delta = StreamEvent::TextDelta { text: format!("{line}\n") };
                        if tx.send(delta).await.is_err() {
                            return; // cursor closed; child dies via kill_on_drop
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error { message: format!("read failed: {e}") })
                            .await;
                        return;
                    }
                }
            }

            let terminal = match child.wait().await {
                Ok(status) if status.success() => StreamEvent::Done {},
                Ok(status) => StreamEvent::Error {
                    message: format!("runtime exited with {status}"),
                },
                Err(e) => StreamEvent::Error { message: format!("wait failed: {e}") },
            };
            let _ = tx.send(terminal).await;
        });
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_runtime() -> ProcessRuntime {
        ProcessRuntime::new(
            RuntimeConfig { command: "cat".to_string(), args: vec![] },
            None,
        )
    }

    #[tokio::test]
    async fn streams_stdout_lines_then_done() {
        let rt = echo_runtime();
        rt.ensure_session("s1", SessionOptions::default()).await.unwrap();
        let mut stream = rt
            .send_message("s1", "one\ntwo", SendOptions::default())
            .await
            .unwrap();

        let mut text = String::new();
        loop {
            match stream.next().await {
                Some(StreamEvent::TextDelta { text: t }) => text.push_str(&t),
                Some(StreamEvent::Done {}) => break,
                Some(other) => panic!("unexpected event {other:?}"),
                None => panic!("stream ended without done"),
            }
        }
        assert_eq!(text, "one\ntwo\n");
    }

    #[tokio::test]
    async fn system_prompt_append_precedes_content() {
        let rt = echo_runtime();
        let mut stream = rt
            .send_message(
                "s1",
                "body",
                SendOptions {
                    system_prompt_append: Some("<relay_context/>".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first, StreamEvent::TextDelta { text: "<relay_context/>\n".into() });
    }

    #[tokio::test]
    async fn missing_command_yields_error_event() {
        let rt = ProcessRuntime::new(
            RuntimeConfig { command: "/no/such/binary".to_string(), args: vec![] },
            None,
        );
        let mut stream = rt
            .send_message("s1", "hi", SendOptions::default())
            .await
            .unwrap();
        match stream.next().await {
            Some(StreamEvent::Error { message }) => assert!(message.contains("spawn failed")),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_command_reports_exit_status() {
        let rt = ProcessRuntime::new(
            RuntimeConfig { command: "false".to_string(), args: vec![] },
            None,
        );
        let mut stream = rt
            .send_message("s1", "", SendOptions::default())
            .await
            .unwrap();
        loop {
            match stream.next().await {
                Some(StreamEvent::Error { message }) => {
                    assert!(message.contains("exited"));
                    break;
                }
                Some(_) => {}
                None => panic!("stream ended without a terminal event"),
            }
        }
    }
}
