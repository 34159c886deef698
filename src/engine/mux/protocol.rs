// GameManager — Upstream Protocol Types
//
// Wire types for the line-delimited JSON-RPC interface the agent host speaks:
// requests, responses, notifications, and the channel-extension messages.

use crate::atoms::error::{ErrorBody, GmError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── JSON-RPC 2.0 Framing ──────────────────────────────────────────────

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Application-level failure; the taxonomy code travels in `error.data.code`.
pub const APP_ERROR: i32 = -32000;
/// The client negotiated without the channels extension but called a
/// channel-owning method or tool.
pub const CHANNELS_REQUIRED: i32 = -32001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        RpcResponse { jsonrpc: "2.0".into(), id, result: Some(result), error: None }
    }

    pub fn err(id: u64, error: RpcError) -> Self {
        RpcResponse { jsonrpc: "2.0".into(), id, result: None, error: Some(error) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        RpcError { code, message: message.into(), data: None }
    }

    /// Map a taxonomy error onto the wire: JSON-RPC code plus the
    /// `{ code, message, details? }` body in `data`.
    pub fn from_gm(err: &GmError) -> Self {
        let body = err.to_body();
        RpcError {
            code: APP_ERROR,
            message: body.message.clone(),
            data: Some(serde_json::to_value(&body).unwrap_or(Value::Null)),
        }
    }

    pub fn channels_required(method: &str) -> Self {
        RpcError::new(
            CHANNELS_REQUIRED,
            format!("{method} requires the channels extension, which this session did not negotiate"),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    pub fn new(method: &str, params: Value) -> Self {
        RpcNotification { jsonrpc: "2.0".into(), method: method.into(), params: Some(params) }
    }
}

/// One parsed inbound frame. Requests carry an id; notifications do not.
#[derive(Debug, Clone)]
pub enum Inbound {
    Request(RpcRequest),
    Notification(RpcNotification),
}

/// Parse one wire line. A frame with an `id` is a request, without one a
/// notification; anything else is a protocol error.
pub fn parse_inbound(line: &str) -> Result<Inbound, GmError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| GmError::Protocol(format!("malformed frame: {e}")))?;
    if !value.is_object() {
        return Err(GmError::Protocol("frame is not a JSON object".into()));
    }
    if value.get("method").is_none() {
        return Err(GmError::Protocol("frame has no method".into()));
    }
    if value.get("id").is_some() {
        serde_json::from_value(value)
            .map(Inbound::Request)
            .map_err(|e| GmError::Protocol(format!("malformed request: {e}")))
    } else {
        serde_json::from_value(value)
            .map(Inbound::Notification)
            .map_err(|e| GmError::Protocol(format!("malformed notification: {e}")))
    }
}

// ── initialize ─────────────────────────────────────────────────────────

/// Capability bundle advertised by the server and acknowledged by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSetDecl {
    pub name: String,
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub push_events: bool,
    #[serde(default)]
    pub channels: bool,
    #[serde(default)]
    pub rollback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Feature-set names the client understands. Absent means tools-only
    /// legacy mode: no channels, no push events.
    #[serde(default)]
    pub feature_sets: Option<Vec<String>>,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    /// Everything the server declares; the acknowledged subset is enabled.
    pub feature_sets: Vec<FeatureSetDecl>,
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

// ── tools/list, tools/call ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input.
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    /// Upstream-settable deadline for this invocation.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// ── channels/* ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsOpenParams {
    pub map: String,
    #[serde(default)]
    pub game: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsCloseParams {
    pub channel_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsPublishParams {
    pub channel_id: String,
    /// Opaque text payload, forwarded verbatim to the owning resource.
    pub body: String,
}

/// Server → client: one payload from a channel's owning resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsIncomingParams {
    pub channel_id: String,
    pub body: String,
}

/// Server → client: open-channel set delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsChangedParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added: Vec<crate::atoms::types::ChannelInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    /// Present when a removal was abnormal (engine crash, bridge loss).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

// ── state/checkpoint, state/rollback ───────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointParams {
    pub feature_set: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResult {
    pub checkpoint_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackParams {
    pub checkpoint_id: String,
}
