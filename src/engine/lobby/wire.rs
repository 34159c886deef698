// GameManager — Lobby Wire Codec
//
// The lobby server speaks a line-framed text protocol: `Command JSON\n`,
// identical shape in both directions. Field names on the wire are PascalCase
// (the server is a C# codebase); serde renames keep Rust naming local.

use crate::atoms::error::{GmError, GmResult};
use base64::Engine as _;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The digest the lobby protocol expects in login/register commands.
pub fn hash_password(password: &str) -> String {
    let digest = Md5::digest(password.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Split one raw line into its command name and JSON argument object.
/// Commands without arguments are legal (`Ping`).
pub fn split_line(line: &str) -> GmResult<(&str, Value)> {
    let line = line.trim_end();
    if line.is_empty() {
        return Err(GmError::Protocol("empty lobby line".into()));
    }
    match line.split_once(' ') {
        Some((command, rest)) => {
            let args: Value = serde_json::from_str(rest)
                .map_err(|e| GmError::Protocol(format!("lobby args for {command}: {e}")))?;
            Ok((command, args))
        }
        None => Ok((line, Value::Null)),
    }
}

fn format_line<T: Serialize>(command: &str, args: &T) -> GmResult<String> {
    Ok(format!("{command} {}", serde_json::to_string(args)?))
}

// ── Client → server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Login {
    pub name: String,
    pub password_hash: String,
    pub client_id: String,
    pub locale: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Register {
    pub name: String,
    pub password_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Say {
    pub place: u8,
    pub target: String,
    pub text: String,
    pub is_emote: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinChannel {
    pub channel_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaveChannel {
    pub channel_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinBattle {
    pub battle_id: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchMakerJoin {
    pub queue: String,
}

/// Everything this client ever puts on the wire.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    Login(Login),
    Register(Register),
    Say(Say),
    JoinChannel(JoinChannel),
    LeaveChannel(LeaveChannel),
    JoinBattle(JoinBattle),
    LeaveBattle,
    MatchMakerJoin(MatchMakerJoin),
    Ping,
}

impl ClientCommand {
    pub fn to_line(&self) -> GmResult<String> {
        match self {
            ClientCommand::Login(args) => format_line("Login", args),
            ClientCommand::Register(args) => format_line("Register", args),
            ClientCommand::Say(args) => format_line("Say", args),
            ClientCommand::JoinChannel(args) => format_line("JoinChannel", args),
            ClientCommand::LeaveChannel(args) => format_line("LeaveChannel", args),
            ClientCommand::JoinBattle(args) => format_line("JoinBattle", args),
            ClientCommand::LeaveBattle => Ok("LeaveBattle {}".into()),
            ClientCommand::MatchMakerJoin(args) => format_line("MatchMakerJoin", args),
            ClientCommand::Ping => Ok("Ping".into()),
        }
    }
}

// ── Server → client ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Welcome {
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultResponse {
    #[serde(default)]
    pub result_code: i32,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ResultResponse {
    pub fn is_ok(&self) -> bool {
        self.result_code == 0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelJoined {
    pub channel_name: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelUser {
    pub channel_name: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Said {
    #[serde(default)]
    pub place: u8,
    #[serde(default)]
    pub target: String,
    pub user: String,
    pub text: String,
    #[serde(default)]
    pub is_emote: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserSeen {
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub rank: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserGone {
    pub name: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Battle descriptor. Every field beyond the id is optional: the server may
/// send an update before the open, and a partial header must still merge.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BattleHeader {
    pub battle_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub founder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_players: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BattleRef {
    pub battle_id: u32,
    #[serde(default)]
    pub user: Option<String>,
}

/// Every server line this client understands, plus a passthrough for the
/// rest. Unknown commands are preserved (and forwarded raw) rather than
/// dropped silently.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Welcome(Welcome),
    LoginResponse(ResultResponse),
    RegisterResponse(ResultResponse),
    Ping,
    ChannelJoined(ChannelJoined),
    ChannelLeft(ChannelUser),
    ChannelUserAdded(ChannelUser),
    ChannelUserRemoved(ChannelUser),
    Said(Said),
    UserSeen(UserSeen),
    UserGone(UserGone),
    BattleAdded(BattleHeader),
    BattleUpdate(BattleHeader),
    BattleRemoved(BattleRef),
    JoinedBattle(BattleRef),
    LeftBattle(BattleRef),
    Unknown { command: String, args: Value },
}

impl ServerMessage {
    pub fn parse(line: &str) -> GmResult<Self> {
        let (command, args) = split_line(line)?;
        let parsed = match command {
            "Welcome" => ServerMessage::Welcome(from_args(command, args)?),
            "LoginResponse" => ServerMessage::LoginResponse(from_args(command, args)?),
            "RegisterResponse" => ServerMessage::RegisterResponse(from_args(command, args)?),
            "Ping" => ServerMessage::Ping,
            "ChannelJoined" => ServerMessage::ChannelJoined(from_args(command, args)?),
            "ChannelLeft" => ServerMessage::ChannelLeft(from_args(command, args)?),
            "ChannelUserAdded" => ServerMessage::ChannelUserAdded(from_args(command, args)?),
            "ChannelUserRemoved" => ServerMessage::ChannelUserRemoved(from_args(command, args)?),
            "Said" => ServerMessage::Said(from_args(command, args)?),
            "User" => ServerMessage::UserSeen(from_args(command, args)?),
            "UserDisconnected" => ServerMessage::UserGone(from_args(command, args)?),
            "BattleAdded" => ServerMessage::BattleAdded(from_args(command, args)?),
            "BattleUpdate" => ServerMessage::BattleUpdate(from_args(command, args)?),
            "BattleRemoved" => ServerMessage::BattleRemoved(from_args(command, args)?),
            "JoinedBattle" => ServerMessage::JoinedBattle(from_args(command, args)?),
            "LeftBattle" => ServerMessage::LeftBattle(from_args(command, args)?),
            _ => ServerMessage::Unknown { command: command.to_string(), args },
        };
        Ok(parsed)
    }
}

fn from_args<T: for<'de> Deserialize<'de>>(command: &str, args: Value) -> GmResult<T> {
    serde_json::from_value(args)
        .map_err(|e| GmError::Protocol(format!("lobby {command}: {e}")))
}
