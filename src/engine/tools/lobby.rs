// Lobby tool group: connection, authentication, chat, and battle membership.
// Thin translation from validated arguments onto LobbyClient operations; the
// client owns every bit of connection state.

use super::{object_schema, required_str, ToolEntry};
use crate::atoms::constants::DEFAULT_LOBBY_PORT;
use crate::atoms::error::{GmError, GmResult};
use crate::atoms::types::SayPlace;
use crate::engine::lobby::LobbyClient;
use crate::engine::mux::features;
use crate::engine::mux::protocol::ToolDecl;
use crate::engine::state::GmState;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn definitions() -> Vec<ToolEntry> {
    let set = features::LOBBY_CHAT;
    vec![
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_connect".into(),
                description: "Connect to the lobby server. Replaces any previous connection; \
                              state is rebuilt from scratch."
                    .into(),
                input_schema: object_schema(
                    json!({
                        "host": {"type": "string"},
                        "port": {"type": "integer"},
                    }),
                    &["host"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_disconnect".into(),
                description: "Drop the lobby connection and close all lobby channels.".into(),
                input_schema: object_schema(json!({}), &[]),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_login".into(),
                description: "Authenticate on the connected lobby server. Falls back to the \
                              GM_LOBBY_USERNAME / GM_LOBBY_PASSWORD environment when arguments \
                              are omitted."
                    .into(),
                input_schema: object_schema(
                    json!({
                        "username": {"type": "string"},
                        "password": {"type": "string"},
                    }),
                    &[],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_register".into(),
                description: "Register a new lobby account.".into(),
                input_schema: object_schema(
                    json!({
                        "username": {"type": "string"},
                        "password": {"type": "string"},
                        "email": {"type": "string"},
                    }),
                    &["username", "password"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_say".into(),
                description: "Send chat to a room (place=0) or a user (place=4).".into(),
                input_schema: object_schema(
                    json!({
                        "target": {"type": "string"},
                        "text": {"type": "string"},
                        "place": {"type": "integer"},
                    }),
                    &["target", "text"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_join_channel".into(),
                description: "Join a lobby chat room; opens a lobby-chat channel for it.".into(),
                input_schema: object_schema(
                    json!({"name": {"type": "string"}}),
                    &["name"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_leave_channel".into(),
                description: "Leave a lobby chat room and close its channel.".into(),
                input_schema: object_schema(
                    json!({"name": {"type": "string"}}),
                    &["name"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_list_battles".into(),
                description: "List battles seen since login.".into(),
                input_schema: object_schema(json!({}), &[]),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_list_users".into(),
                description: "List users currently online.".into(),
                input_schema: object_schema(json!({}), &[]),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_join_battle".into(),
                description: "Join a battle by id.".into(),
                input_schema: object_schema(
                    json!({"battle_id": {"type": "integer"}}),
                    &["battle_id"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_leave_battle".into(),
                description: "Leave the current battle.".into(),
                input_schema: object_schema(json!({}), &[]),
            },
            feature_set: set,
            needs_channels: false,
        },
        ToolEntry {
            decl: ToolDecl {
                name: "lobby_matchmaker_join".into(),
                description: "Join a matchmaker queue.".into(),
                input_schema: object_schema(
                    json!({"queue": {"type": "string"}}),
                    &["queue"],
                ),
            },
            feature_set: set,
            needs_channels: false,
        },
    ]
}

async fn client(state: &Arc<GmState>) -> GmResult<Arc<LobbyClient>> {
    state
        .lobby
        .lock()
        .await
        .clone()
        .ok_or_else(|| GmError::Transport("no lobby connection; call lobby_connect first".into()))
}

pub async fn execute(state: &Arc<GmState>, name: &str, args: &Value) -> GmResult<Value> {
    match name {
        "lobby_connect" => {
            let host = required_str(name, args, "host")?;
            let port = args
                .get("port")
                .and_then(Value::as_u64)
                .map(|p| p as u16)
                .unwrap_or(DEFAULT_LOBBY_PORT);
            let mut slot = state.lobby.lock().await;
            if let Some(old) = slot.take() {
                old.disconnect().await;
            }
            let fresh =
                Arc::new(LobbyClient::connect(host, port, state.channels.clone()).await?);
            let greeting = fresh.greeting();
            *slot = Some(fresh);
            Ok(json!({
                "host": host,
                "port": port,
                "greeting": greeting.map(|w| json!({
                    "engine": w.engine,
                    "game": w.game,
                    "version": w.version,
                })),
            }))
        }
        "lobby_disconnect" => {
            let mut slot = state.lobby.lock().await;
            match slot.take() {
                Some(old) => {
                    old.disconnect().await;
                    Ok(json!({ "disconnected": true }))
                }
                None => Ok(json!({ "disconnected": false })),
            }
        }
        "lobby_login" => {
            let lobby = client(state).await?;
            let username = args
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| state.config.lobby_username.clone())
                .ok_or_else(|| GmError::Auth("no username given or configured".into()))?;
            let password = args
                .get("password")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| state.config.lobby_password.clone())
                .ok_or_else(|| GmError::Auth("no password given or configured".into()))?;
            lobby.login(&username, &password).await?;
            Ok(json!({ "username": username }))
        }
        "lobby_register" => {
            let lobby = client(state).await?;
            let username = required_str(name, args, "username")?;
            let password = required_str(name, args, "password")?;
            let email = args.get("email").and_then(Value::as_str);
            lobby.register(username, password, email).await?;
            Ok(json!({ "registered": username }))
        }
        "lobby_say" => {
            let lobby = client(state).await?;
            let target = required_str(name, args, "target")?;
            let text = required_str(name, args, "text")?;
            let place = match args.get("place") {
                None | Some(Value::Null) => SayPlace::Channel,
                Some(raw) => raw
                    .as_u64()
                    .and_then(|p| SayPlace::from_wire(p as u8))
                    .ok_or_else(|| GmError::Validation {
                        tool: name.to_string(),
                        message: format!("place must be 0 (channel) or 4 (user), got {raw}"),
                    })?,
            };
            lobby.say(place, target, text).await?;
            Ok(json!({ "sent": true }))
        }
        "lobby_join_channel" => {
            let lobby = client(state).await?;
            let room = required_str(name, args, "name")?;
            let channel_id = lobby.join_channel(room).await?;
            Ok(json!({ "channelId": channel_id }))
        }
        "lobby_leave_channel" => {
            let lobby = client(state).await?;
            let room = required_str(name, args, "name")?;
            lobby.leave_channel(room).await?;
            Ok(json!({ "left": room }))
        }
        "lobby_list_battles" => {
            let lobby = client(state).await?;
            Ok(json!({ "battles": lobby.list_battles() }))
        }
        "lobby_list_users" => {
            let lobby = client(state).await?;
            let users: Vec<Value> = lobby
                .list_users()
                .into_iter()
                .map(|u| json!({ "name": u.name, "country": u.country, "rank": u.rank }))
                .collect();
            Ok(json!({ "users": users }))
        }
        "lobby_join_battle" => {
            let lobby = client(state).await?;
            let battle_id = args
                .get("battle_id")
                .and_then(Value::as_u64)
                .ok_or_else(|| GmError::Validation {
                    tool: name.to_string(),
                    message: "missing required argument 'battle_id'".into(),
                })? as u32;
            lobby.join_battle(battle_id).await?;
            Ok(json!({ "battleId": battle_id }))
        }
        "lobby_leave_battle" => {
            let lobby = client(state).await?;
            lobby.leave_battle().await?;
            Ok(json!({ "left": true }))
        }
        "lobby_matchmaker_join" => {
            let lobby = client(state).await?;
            let queue = required_str(name, args, "queue")?;
            lobby.matchmaker_join(queue).await?;
            Ok(json!({ "queue": queue }))
        }
        _ => Err(GmError::Internal(format!("lobby dispatch got {name}"))),
    }
}
