// ── GameManager Atoms: Pure Data Types ─────────────────────────────────────
// Plain struct/enum definitions shared across the engine layers.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};

// ── Channels ───────────────────────────────────────────────────────────────

/// What kind of resource a channel is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    LobbyChat,
    GameInstance,
    Replay,
}

/// Channel lifecycle. Publishes are accepted only in `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLifecycle {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Summary of one channel, as listed in `channels/changed` additions and the
/// `channel_list` tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub channel_id: String,
    pub kind: ChannelKind,
    pub state: ChannelLifecycle,
}

// ── Tool content envelope ──────────────────────────────────────────────────
// Tool handler outputs are wrapped as `{ content: [...], isError }` per the
// upstream protocol.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Wrap a successful tool payload as `{ success: true, data }`.
    pub fn ok(data: serde_json::Value) -> Self {
        let body = serde_json::json!({ "success": true, "data": data });
        ToolCallResult {
            content: vec![ToolContent::Text { text: body.to_string() }],
            is_error: false,
        }
    }

    /// Wrap a normalized error body as `{ success: false, error }`.
    pub fn err(error: crate::atoms::error::ErrorBody) -> Self {
        let body = serde_json::json!({ "success": false, "error": error });
        ToolCallResult {
            content: vec![ToolContent::Text { text: body.to_string() }],
            is_error: true,
        }
    }
}

// ── Lobby ──────────────────────────────────────────────────────────────────

/// Destination of a `Say`: a chat room or a user's private message stream.
/// Wire values are fixed by the lobby protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SayPlace {
    Channel,
    User,
}

impl SayPlace {
    pub fn as_wire(self) -> u8 {
        match self {
            SayPlace::Channel => 0,
            SayPlace::User => 4,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(SayPlace::Channel),
            4 => Some(SayPlace::User),
            _ => None,
        }
    }
}

/// Lobby connection authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    Anonymous,
    Authenticated,
    Dead,
}

// ── Engine instances ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Loading,
    Running,
    Paused,
    Ended,
}
