// ── GameManager Atoms: Error Types ─────────────────────────────────────────
// Single canonical error enum for the GameManager, built with `thiserror`.
//
// Design rules:
//   • Variants follow the wire-level error taxonomy one-to-one: every
//     user-visible failure serializes as `{ code, message, details? }` where
//     `code` is the stable kind string returned by `kind()`.
//   • The `#[from]` attribute wires std/external error conversions
//     automatically; I/O and JSON failures surface as `transport` and
//     `protocol` respectively.
//   • No variant carries secret material (passwords, tokens) in its message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GmError {
    /// Malformed upstream frame or unknown method. The session survives.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Tool argument failed schema validation. The session survives.
    #[error("validation error: {tool}: {message}")]
    Validation { tool: String, message: String },

    /// Upstream or downstream socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Lobby authentication failed; the lobby connection stays down.
    #[error("auth error: {0}")]
    Auth(String),

    /// Publish/close against a channel that is not open. No side effect.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A channel-owning tool or method was called by a session that did not
    /// negotiate the channels extension.
    #[error("channels extension required: {0}")]
    ChannelsRequired(String),

    /// Engine subprocess failed to start, exited unexpectedly, or never
    /// produced a Bridge handshake within the deadline.
    #[error("engine error: {0}")]
    Engine(String),

    /// Bridge IPC handshake failure, framing error, or unexpected disconnect.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// The Bridge refused a command (unknown type, invalid unit id, wrong
    /// team, unknown build def). Surfaced as a `command_error` channel event.
    #[error("command error: {0}")]
    Command(String),

    /// Inbound command queue full.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// Unexpected invariant violation. Logged with full context.
    #[error("internal error: {0}")]
    Internal(String),

    /// Filesystem or OS-level I/O failure. Reported as `transport` upstream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure. Reported as `protocol`.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GmError {
    /// Stable wire code for this error kind. These strings are part of the
    /// upstream protocol contract; never rename them.
    pub fn kind(&self) -> &'static str {
        match self {
            GmError::Protocol(_) | GmError::Serialization(_) => "protocol",
            GmError::Validation { .. } => "validation",
            GmError::Transport(_) | GmError::Io(_) => "transport",
            GmError::Auth(_) => "auth",
            GmError::ChannelClosed(_) => "channel-closed",
            GmError::ChannelsRequired(_) => "channels-required",
            GmError::Engine(_) => "engine",
            GmError::Bridge(_) => "bridge",
            GmError::Command(_) => "command-error",
            GmError::Backpressure(_) => "backpressure",
            GmError::Internal(_) => "internal",
        }
    }

    /// Create a validation error for a named tool.
    pub fn validation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { tool: tool.into(), message: message.into() }
    }

    /// Serialize into the single wire shape shared by responses,
    /// notifications, and channel-removal payloads.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.kind().to_string(),
            message: self.to_string(),
            details: None,
        }
    }
}

// ── Wire shape ─────────────────────────────────────────────────────────────

/// `{ code, message, details? }` — the one error shape every surface uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All GameManager operations should return this type.
pub type GmResult<T> = Result<T, GmError>;
