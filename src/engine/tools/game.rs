// Game tool group: starting local instances and managing their channels.
// In-game unit commands do not travel through tools at all — they are
// published on the game-instance channel and decoded inside the Bridge.

use super::{object_schema, required_str, ToolEntry};
use crate::atoms::constants::{DEFAULT_GAME, DEFAULT_OPPONENT};
use crate::atoms::error::{GmError, GmResult};
use crate::engine::mux::features;
use crate::engine::mux::protocol::ToolDecl;
use crate::engine::state::GmState;
use crate::engine::supervisor::InstanceSpec;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn definitions() -> Vec<ToolEntry> {
    vec![
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_start_game".into(),
                description: "Start a local game against an AI opponent and stream its events \
                              on a new game-instance channel."
                    .into(),
                input_schema: object_schema(
                    json!({
                        "map": {"type": "string"},
                        "opponent": {"type": "string"},
                        "headless": {"type": "boolean"},
                        "game": {"type": "string"},
                    }),
                    &["map"],
                ),
            },
            feature_set: features::GAME_STATE,
            needs_channels: true,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "channel_open".into(),
                description: "Lower-level game start: spawn an engine for a map/game pair and \
                              return the channel id."
                    .into(),
                input_schema: object_schema(
                    json!({
                        "map": {"type": "string"},
                        "game": {"type": "string"},
                    }),
                    &["map"],
                ),
            },
            feature_set: features::GAME_STATE,
            needs_channels: true,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "channel_list".into(),
                description: "List the session's channels and their states.".into(),
                input_schema: object_schema(json!({}), &[]),
            },
            feature_set: features::GAME_STATE,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "channel_close".into(),
                description: "Close a channel: stops the engine behind a game channel, leaves \
                              the room behind a lobby channel."
                    .into(),
                input_schema: object_schema(
                    json!({"channel_id": {"type": "string"}}),
                    &["channel_id"],
                ),
            },
            feature_set: features::GAME_STATE,
            needs_channels: false,
        },
    ]
}

pub async fn execute(state: &Arc<GmState>, name: &str, args: &Value) -> GmResult<Value> {
    match name {
        "lobby_start_game" | "channel_open" => {
            let spec = InstanceSpec {
                map: required_str(name, args, "map")?.to_string(),
                game: args
                    .get("game")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_GAME)
                    .to_string(),
                opponent: args
                    .get("opponent")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_OPPONENT)
                    .to_string(),
                headless: args.get("headless").and_then(Value::as_bool).unwrap_or(true),
            };
            let channel_id = state.supervisor.start(spec).await?;
            Ok(json!({ "channelId": channel_id }))
        }
        "channel_list" => Ok(json!({ "channels": state.channels.list() })),
        "channel_close" => {
            let channel_id = required_str(name, args, "channel_id")?;
            if state.supervisor.is_running(channel_id) {
                // The waiter closes the channel once the engine is reaped.
                state.supervisor.stop(channel_id)?;
            } else if let Some(room) = channel_id.strip_prefix("lobby:") {
                let lobby = state
                    .lobby
                    .lock()
                    .await
                    .clone()
                    .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
                lobby.leave_channel(room).await?;
            } else {
                return Err(GmError::ChannelClosed(channel_id.to_string()));
            }
            Ok(json!({ "closed": channel_id }))
        }
        _ => Err(GmError::Internal(format!("game dispatch got {name}"))),
    }
}
