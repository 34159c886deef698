// GameManager — Tool Registry & Dispatcher
// Each tool group is a self-contained module with definitions + executor.
// Arguments are validated against the declared JSON schema before any
// handler runs; handlers return plain JSON that the multiplexer wraps in
// the protocol content envelope.

pub mod game;
pub mod lobby;

use crate::atoms::error::{GmError, GmResult};
use crate::engine::mux::protocol::ToolDecl;
use crate::engine::state::GmState;
use log::info;
use serde_json::Value;
use std::sync::Arc;

/// A declared tool plus the feature set that owns it and whether calling it
/// opens or touches channels (legacy sessions get a `channels-required`
/// error for those).
pub struct ToolEntry {
    pub decl: ToolDecl,
    pub feature_set: &'static str,
    pub needs_channels: bool,
}

/// The full registry, in listing order. Tool names are unique; the
/// multiplexer filters by the session's negotiated feature sets.
pub fn registry() -> Vec<ToolEntry> {
    let mut entries = lobby::definitions();
    entries.extend(game::definitions());
    entries
}

pub fn find(name: &str) -> Option<ToolEntry> {
    registry().into_iter().find(|entry| entry.decl.name == name)
}

/// Execute one validated tool call.
pub async fn dispatch(
    state: &Arc<GmState>,
    name: &str,
    args: &Value,
    channels_negotiated: bool,
) -> GmResult<Value> {
    let entry = find(name)
        .ok_or_else(|| GmError::Validation {
            tool: name.to_string(),
            message: "unknown tool".into(),
        })?;
    if entry.needs_channels && !channels_negotiated {
        return Err(GmError::ChannelsRequired(name.to_string()));
    }
    validate(name, &entry.decl.input_schema, args)?;
    info!("[tools] {name} {}", truncate(&args.to_string(), 200));

    match name {
        _ if name.starts_with("lobby_") && name != "lobby_start_game" => {
            lobby::execute(state, name, args).await
        }
        _ => game::execute(state, name, args).await,
    }
}

// ── Schema validation ──────────────────────────────────────────────────
// A deliberately small validator: object shape, required keys, primitive
// types. Anything richer belongs in the handler.

pub fn validate(tool: &str, schema: &Value, args: &Value) -> GmResult<()> {
    let fail = |message: String| GmError::Validation { tool: tool.to_string(), message };

    if !args.is_object() && !args.is_null() {
        return Err(fail("arguments must be an object".into()));
    }
    let empty = serde_json::Map::new();
    let args_map = args.as_object().unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args_map.contains_key(key) {
                return Err(fail(format!("missing required argument '{key}'")));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (key, value) in args_map {
        let Some(declared) = properties.get(key) else {
            return Err(fail(format!("unexpected argument '{key}'")));
        };
        let Some(expected) = declared.get("type").and_then(Value::as_str) else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        };
        if !ok {
            return Err(fail(format!("argument '{key}' must be a {expected}")));
        }
    }
    Ok(())
}

/// Shorthand for the `{"type":"object", ...}` schemas every tool declares.
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub(crate) fn required_str<'a>(tool: &str, args: &'a Value, key: &str) -> GmResult<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| GmError::Validation {
        tool: tool.to_string(),
        message: format!("missing required argument '{key}'"),
    })
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        format!("{}...", &text[..limit])
    }
}
