//! Frames exchanged over the log and terminal sockets, and the per-view
//! bookkeeping around them.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A frame sent by the terminal client.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientFrame {
    #[serde(rename = "Op")]
    pub op: ClientOp,
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientOp {
    Stdin,
    Ping,
}

/// Terminal output sent by the server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerFrame {
    #[serde(rename = "Op")]
    pub op: String,
    #[serde(rename = "Data", default)]
    pub data: String,
}

/// A log or status line streamed while a cluster is being detached.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFrame {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub cluster_name: String,
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    Log,
    Status,
}

/// Collects the frames received on one log socket.
#[derive(Clone, Debug, Default)]
pub struct LogSession {
    frames: Vec<LogFrame>,
    completed: bool,
}

/// How a log socket ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Closed {
    pub frames: Vec<LogFrame>,
    pub completed: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("connection closed before any logs were received")]
    ClosedEarly,

    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),
}

/// A socket owned by a view.
pub trait Socket {
    fn close(&mut self);
}

/// Holds at most one open socket for a view.
///
/// Opening a new socket closes the previous one, and the socket is closed
/// when the slot is dropped with the view.
#[derive(Debug)]
pub struct SocketSlot<S: Socket> {
    socket: Option<S>,
}

// === impl ClientFrame ===

impl ClientFrame {
    pub fn stdin(data: impl Into<String>) -> Self {
        Self {
            op: ClientOp::Stdin,
            data: Some(data.into()),
        }
    }

    pub fn ping() -> Self {
        Self {
            op: ClientOp::Ping,
            data: None,
        }
    }

    pub fn encode(&self) -> String {
        // A struct of strings and unit enums always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// === impl ServerFrame ===

impl ServerFrame {
    /// Returns terminal output, ignoring control frames.
    pub fn stdout(&self) -> Option<&str> {
        if self.op == "stdout" {
            Some(&self.data)
        } else {
            None
        }
    }
}

// === impl LogFrame ===

impl LogFrame {
    /// A `STATUS` frame reporting `Detached` marks the end of the operation.
    pub fn is_completion(&self) -> bool {
        self.kind == LogKind::Status && self.status.eq_ignore_ascii_case("detached")
    }

    /// The frame's time of day in local time, or the raw timestamp when it
    /// is not RFC 3339.
    pub fn display_time(&self) -> String {
        match DateTime::parse_from_rfc3339(&self.timestamp) {
            Ok(ts) => ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
            Err(_) => self.timestamp.clone(),
        }
    }
}

// === impl LogSession ===

impl LogSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a text message from the socket.
    ///
    /// Malformed frames are reported to the caller but leave the session
    /// untouched.
    pub fn on_message(&mut self, text: &str) -> Result<&LogFrame, StreamError> {
        let frame = serde_json::from_str::<LogFrame>(text).map_err(|error| {
            tracing::warn!(%error, "dropping malformed log frame");
            error
        })?;
        if frame.is_completion() {
            tracing::info!(cluster = %frame.cluster_name, "detachment completed");
            self.completed = true;
        }
        let idx = self.frames.len();
        self.frames.push(frame);
        Ok(&self.frames[idx])
    }

    pub fn frames(&self) -> &[LogFrame] {
        &self.frames
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Ends the session when the socket closes.
    ///
    /// Closing is the normal end of a log stream; it is only an error when
    /// nothing at all was received.
    pub fn on_close(self) -> Result<Closed, StreamError> {
        if self.frames.is_empty() {
            return Err(StreamError::ClosedEarly);
        }
        Ok(Closed {
            frames: self.frames,
            completed: self.completed,
        })
    }
}

// === impl SocketSlot ===

impl<S: Socket> SocketSlot<S> {
    pub fn new() -> Self {
        Self { socket: None }
    }

    pub fn open(&mut self, socket: S) -> &mut S {
        if let Some(mut prev) = self.socket.take() {
            tracing::debug!("closing previous socket");
            prev.close();
        }
        self.socket.insert(socket)
    }

    pub fn get_mut(&mut self) -> Option<&mut S> {
        self.socket.as_mut()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
    }
}

impl<S: Socket> Default for SocketSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> Drop for SocketSlot<S> {
    fn drop(&mut self) {
        self.close();
    }
}
