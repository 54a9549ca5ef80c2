// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent runtime port
//!
//! The single interface abstracting whatever actually executes LLM prompts.
//! The relay's agent adapter, the pulse scheduler's direct mode, and the
//! session gateway all drive implementations of [`AgentRuntime`];
//! implementations are expected to serialize internally per session id.

use crate::schedule::PermissionMode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("session error: {0}")]
    Session(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Options for [`AgentRuntime::ensure_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub permission_mode: PermissionMode,
    pub cwd: Option<PathBuf>,
    pub has_started: bool,
}

/// Options for [`AgentRuntime::send_message`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub permission_mode: Option<PermissionMode>,
    pub cwd: Option<PathBuf>,
    pub system_prompt_append: Option<String>,
}

/// One event from an agent session's output stream.
///
/// The stream is finite and non-restartable; it terminates on `done` or
/// `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        output: serde_json::Value,
    },
    ToolApprovalRequest {
        id: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        detail: serde_json::Value,
    },
    AskUserQuestion {
        id: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        detail: serde_json::Value,
    },
    TaskUpdate {
        tasks: serde_json::Value,
    },
    Error {
        message: String,
    },
    Done {},
}

impl StreamEvent {
    /// True for `done` and `error`, the two stream terminators.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done {} | Self::Error { .. })
    }
}

/// Pull-based cursor over a session's stream events.
///
/// Dropping or [`close`](EventStream::close)-ing the cursor cancels the
/// underlying producer; there is no rewinding.
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Create a producer/cursor pair with a bounded buffer.
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamEvent>, EventStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, EventStream { rx })
    }

    /// A cursor that yields a fixed sequence of events, then ends.
    pub fn from_events(events: Vec<StreamEvent>) -> EventStream {
        let (tx, stream) = Self::channel(events.len().max(1));
        for ev in events {
            // Capacity covers the whole script; try_send cannot fail here.
            let _ = tx.try_send(ev);
        }
        stream
    }

    /// Next event, or `None` once the stream is exhausted or closed.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Stop the producer; subsequent `next` calls drain buffered events only.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Abstract interface to the LLM session runner.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn ensure_session(
        &self,
        session_id: &str,
        opts: SessionOptions,
    ) -> Result<(), RuntimeError>;

    async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        opts: SendOptions,
    ) -> Result<EventStream, RuntimeError>;
}

/// Scripted runtime for tests: replays a fixed event sequence per message
/// and records every call.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeRuntime {
    script: parking_lot::Mutex<Vec<StreamEvent>>,
    delay: parking_lot::Mutex<std::time::Duration>,
    sent: parking_lot::Mutex<Vec<FakeSentMessage>>,
    ensured: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone)]
pub struct FakeSentMessage {
    pub session_id: String,
    pub content: String,
    pub system_prompt_append: Option<String>,
    pub cwd: Option<PathBuf>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            script: parking_lot::Mutex::new(vec![
                StreamEvent::TextDelta { text: "hi".into() },
                StreamEvent::Done {},
            ]),
            delay: parking_lot::Mutex::new(std::time::Duration::ZERO),
            sent: parking_lot::Mutex::new(Vec::new()),
            ensured: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Replace the replayed event sequence.
    pub fn set_script(&self, events: Vec<StreamEvent>) {
        *self.script.lock() = events;
    }

    /// Pause between replayed events (for cancellation tests).
    pub fn set_event_delay(&self, delay: std::time::Duration) {
        *self.delay.lock() = delay;
    }

    pub fn sent_messages(&self) -> Vec<FakeSentMessage> {
        self.sent.lock().clone()
    }

    pub fn ensured_sessions(&self) -> Vec<String> {
        self.ensured.lock().clone()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl AgentRuntime for FakeRuntime {
    async fn ensure_session(
        &self,
        session_id: &str,
        _opts: SessionOptions,
    ) -> Result<(), RuntimeError> {
        self.ensured.lock().push(session_id.to_string());
        Ok(())
    }

    async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        opts: SendOptions,
    ) -> Result<EventStream, RuntimeError> {
        self.sent.lock().push(FakeSentMessage {
            session_id: session_id.to_string(),
            content: content.to_string(),
            system_prompt_append: opts.system_prompt_append,
            cwd: opts.cwd,
        });
        let script = self.script.lock().clone();
        let delay = *self.delay.lock();
        if delay.is_zero() {
            return Ok(EventStream::from_events(script));
        }
        let (tx, stream) = EventStream::channel(1);
        tokio::spawn(async move {
            for ev in script {
                tokio::time::sleep(delay).await;
                if tx.send(ev).await.is_err() {
                    return; // cursor closed mid-stream
                }
            }
        });
        Ok(stream)
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
