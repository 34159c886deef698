// GameManager — Lobby Protocol Client
//
// Connects to the lobby server over plaintext TCP, authenticates with a
// digested password, and tracks rooms, users, and battles seen since login.
// Every push from the server becomes a `channels/incoming` notification on
// the owning channel: `lobby:<room>` for room chat, the global `lobby`
// channel for everything else.
//
// Reconnect is an explicit operation that rebuilds state from scratch; this
// client never retries on its own.

pub mod wire;

use crate::atoms::constants::{LOBBY_CLIENT_ID, LOBBY_GLOBAL_CHANNEL, LOBBY_LOCALE};
use crate::atoms::error::{GmError, GmResult};
use crate::atoms::types::{AuthState, ChannelKind, SayPlace};
use crate::engine::mux::channels::ChannelTable;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use wire::{BattleHeader, ClientCommand, ServerMessage, UserSeen, Welcome};

/// How long to wait for the server to answer a request-shaped command.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

// ── Tracked state ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct LobbyModel {
    pub auth: Option<AuthState>,
    pub username: Option<String>,
    pub greeting: Option<Welcome>,
    pub joined_rooms: HashSet<String>,
    pub users: HashMap<String, UserSeen>,
    pub battles: HashMap<u32, BattleHeader>,
    pub current_battle: Option<u32>,
}

impl LobbyModel {
    /// Merge a battle header into the table. An update for an unknown battle
    /// is treated as an open with partial fields.
    fn merge_battle(&mut self, header: BattleHeader) {
        let entry = self
            .battles
            .entry(header.battle_id)
            .or_insert_with(|| BattleHeader { battle_id: header.battle_id, ..Default::default() });
        if header.title.is_some() {
            entry.title = header.title;
        }
        if header.founder.is_some() {
            entry.founder = header.founder;
        }
        if header.map.is_some() {
            entry.map = header.map;
        }
        if header.game.is_some() {
            entry.game = header.game;
        }
        if header.engine.is_some() {
            entry.engine = header.engine;
        }
        if header.max_players.is_some() {
            entry.max_players = header.max_players;
        }
        if header.player_count.is_some() {
            entry.player_count = header.player_count;
        }
    }
}

type PendingMap = Mutex<HashMap<&'static str, VecDeque<oneshot::Sender<GmResult<serde_json::Value>>>>>;

// ── Client handle ──────────────────────────────────────────────────────

pub struct LobbyClient {
    writer_tx: mpsc::Sender<String>,
    model: Arc<Mutex<LobbyModel>>,
    pending: Arc<PendingMap>,
    channels: Arc<ChannelTable>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl LobbyClient {
    /// Connect and enter the Greeted state (the server speaks first). The
    /// returned handle owns the socket tasks; dropping it without calling
    /// `disconnect` leaks nothing but leaves the reader running until the
    /// socket dies.
    pub async fn connect(host: &str, port: u16, channels: Arc<ChannelTable>) -> GmResult<Self> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| GmError::Transport(format!("lobby connect {addr}: {e}")))?;
        info!("[lobby] connected to {addr}");

        let (read_half, mut write_half) = stream.into_split();
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(64);

        // Single writer task owns the socket write half.
        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    warn!("[lobby] write failed: {e}");
                    break;
                }
                if let Err(e) = write_half.write_all(b"\n").await {
                    warn!("[lobby] write failed: {e}");
                    break;
                }
            }
            debug!("[lobby] writer task exiting");
        });

        let model = Arc::new(Mutex::new(LobbyModel {
            auth: Some(AuthState::Anonymous),
            ..Default::default()
        }));
        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));

        // The global lobby channel carries non-room events. Publishing on it
        // sends a raw `Command JSON` line — the escape hatch for lobby
        // commands without a dedicated tool. Opened before the reader starts
        // so no push can precede the channel addition.
        let (raw_tx, mut raw_rx) = mpsc::channel::<String>(16);
        let raw_writer = writer_tx.clone();
        tokio::spawn(async move {
            while let Some(line) = raw_rx.recv().await {
                if raw_writer.send(line).await.is_err() {
                    break;
                }
            }
        });
        channels.open(LOBBY_GLOBAL_CHANNEL, ChannelKind::LobbyChat, raw_tx)?;

        let reader_task = tokio::spawn(reader_loop(
            read_half,
            writer_tx.clone(),
            model.clone(),
            pending.clone(),
            channels.clone(),
        ));

        let client = LobbyClient { writer_tx, model, pending, channels, reader_task };
        client.await_greeting().await;
        Ok(client)
    }

    /// The server speaks first; connection is Greeted once its welcome line
    /// lands. Servers that never greet are tolerated — login will tell.
    async fn await_greeting(&self) {
        for _ in 0..200 {
            if self.model.lock().greeting.is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        warn!("[lobby] no greeting within 5s, continuing anyway");
    }

    /// Tear down the socket and close every lobby channel. Idempotent.
    pub async fn disconnect(&self) {
        self.reader_task.abort();
        self.model.lock().auth = Some(AuthState::Dead);
        fail_pending(&self.pending, "disconnected");
        self.channels.close_all_of_kind(ChannelKind::LobbyChat, None);
        info!("[lobby] disconnected");
    }

    pub fn auth_state(&self) -> AuthState {
        self.model.lock().auth.unwrap_or(AuthState::Dead)
    }

    pub fn greeting(&self) -> Option<Welcome> {
        self.model.lock().greeting.clone()
    }

    pub fn username(&self) -> Option<String> {
        self.model.lock().username.clone()
    }

    pub fn list_battles(&self) -> Vec<BattleHeader> {
        let model = self.model.lock();
        let mut battles: Vec<BattleHeader> = model.battles.values().cloned().collect();
        battles.sort_by_key(|b| b.battle_id);
        battles
    }

    pub fn list_users(&self) -> Vec<UserSeen> {
        let model = self.model.lock();
        let mut users: Vec<UserSeen> = model.users.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    async fn send(&self, command: ClientCommand) -> GmResult<()> {
        let line = command.to_line()?;
        self.writer_tx
            .send(line)
            .await
            .map_err(|_| GmError::Transport("lobby writer closed".into()))
    }

    /// Send a command and wait for the named response line.
    async fn request(
        &self,
        command: ClientCommand,
        response: &'static str,
    ) -> GmResult<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().entry(response).or_default().push_back(tx);
        self.send(command).await?;
        match tokio::time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GmError::Transport("lobby response channel dropped".into())),
            Err(_) => Err(GmError::Transport(format!("lobby {response} timed out"))),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> GmResult<()> {
        let args = self
            .request(
                ClientCommand::Login(wire::Login {
                    name: username.to_string(),
                    password_hash: wire::hash_password(password),
                    client_id: LOBBY_CLIENT_ID.into(),
                    locale: LOBBY_LOCALE.into(),
                }),
                "LoginResponse",
            )
            .await?;
        let response: wire::ResultResponse = serde_json::from_value(args)?;
        if !response.is_ok() {
            return Err(GmError::Auth(
                response.reason.unwrap_or_else(|| format!("login rejected ({})", response.result_code)),
            ));
        }
        let mut model = self.model.lock();
        model.auth = Some(AuthState::Authenticated);
        model.username = Some(username.to_string());
        info!("[lobby] authenticated as {username}");
        Ok(())
    }

    pub async fn register(&self, username: &str, password: &str, email: Option<&str>) -> GmResult<()> {
        let args = self
            .request(
                ClientCommand::Register(wire::Register {
                    name: username.to_string(),
                    password_hash: wire::hash_password(password),
                    email: email.map(str::to_string),
                }),
                "RegisterResponse",
            )
            .await?;
        let response: wire::ResultResponse = serde_json::from_value(args)?;
        if !response.is_ok() {
            return Err(GmError::Auth(
                response.reason.unwrap_or_else(|| format!("register rejected ({})", response.result_code)),
            ));
        }
        Ok(())
    }

    pub async fn say(&self, place: SayPlace, target: &str, text: &str) -> GmResult<()> {
        self.require_auth()?;
        self.send(ClientCommand::Say(wire::Say {
            place: place.as_wire(),
            target: target.to_string(),
            text: text.to_string(),
            is_emote: false,
        }))
        .await
    }

    /// Join a chat room and open its channel. Returns the channel id.
    pub async fn join_channel(&self, room: &str) -> GmResult<String> {
        self.require_auth()?;
        let args = self
            .request(
                ClientCommand::JoinChannel(wire::JoinChannel { channel_name: room.to_string() }),
                "ChannelJoined",
            )
            .await?;
        let joined: wire::ChannelJoined = serde_json::from_value(args)?;
        self.model.lock().joined_rooms.insert(joined.channel_name.clone());

        // Per-room forwarder: published bodies become Say lines.
        let (room_tx, mut room_rx) = mpsc::channel::<String>(16);
        let writer = self.writer_tx.clone();
        let room_name = joined.channel_name.clone();
        tokio::spawn(async move {
            while let Some(body) = room_rx.recv().await {
                let say = ClientCommand::Say(wire::Say {
                    place: SayPlace::Channel.as_wire(),
                    target: room_name.clone(),
                    text: body,
                    is_emote: false,
                });
                match say.to_line() {
                    Ok(line) => {
                        if writer.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("[lobby] say encode failed: {e}"),
                }
            }
        });

        let channel_id = room_channel_id(&joined.channel_name);
        self.channels.open(&channel_id, ChannelKind::LobbyChat, room_tx)?;
        Ok(channel_id)
    }

    /// Leave a chat room and close its channel.
    pub async fn leave_channel(&self, room: &str) -> GmResult<()> {
        self.require_auth()?;
        self.send(ClientCommand::LeaveChannel(wire::LeaveChannel {
            channel_name: room.to_string(),
        }))
        .await?;
        self.model.lock().joined_rooms.remove(room);
        self.channels.close(&room_channel_id(room), None)?;
        Ok(())
    }

    pub async fn join_battle(&self, battle_id: u32) -> GmResult<()> {
        self.require_auth()?;
        let args = self
            .request(
                ClientCommand::JoinBattle(wire::JoinBattle { battle_id }),
                "JoinedBattle",
            )
            .await?;
        let joined: wire::BattleRef = serde_json::from_value(args)?;
        self.model.lock().current_battle = Some(joined.battle_id);
        Ok(())
    }

    pub async fn leave_battle(&self) -> GmResult<()> {
        self.require_auth()?;
        self.send(ClientCommand::LeaveBattle).await?;
        self.model.lock().current_battle = None;
        Ok(())
    }

    pub async fn matchmaker_join(&self, queue: &str) -> GmResult<()> {
        self.require_auth()?;
        self.send(ClientCommand::MatchMakerJoin(wire::MatchMakerJoin {
            queue: queue.to_string(),
        }))
        .await
    }

    fn require_auth(&self) -> GmResult<()> {
        match self.auth_state() {
            AuthState::Authenticated => Ok(()),
            AuthState::Anonymous => Err(GmError::Auth("not logged in".into())),
            AuthState::Dead => Err(GmError::Transport("lobby connection is down".into())),
        }
    }
}

pub fn room_channel_id(room: &str) -> String {
    format!("lobby:{room}")
}

fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock();
    for (_, queue) in map.iter_mut() {
        while let Some(tx) = queue.pop_front() {
            let _ = tx.send(Err(GmError::Transport(format!("lobby {reason}"))));
        }
    }
}

/// Settle one waiter for `key`, if any. Returns true when a waiter consumed
/// the message.
fn settle(pending: &PendingMap, key: &'static str, args: &serde_json::Value) -> bool {
    let mut map = pending.lock();
    if let Some(queue) = map.get_mut(key) {
        if let Some(tx) = queue.pop_front() {
            let _ = tx.send(Ok(args.clone()));
            return true;
        }
    }
    false
}

// ── Reader loop ────────────────────────────────────────────────────────

async fn reader_loop(
    read_half: tokio::net::tcp::OwnedReadHalf,
    writer_tx: mpsc::Sender<String>,
    model: Arc<Mutex<LobbyModel>>,
    pending: Arc<PendingMap>,
    channels: Arc<ChannelTable>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // Malformed lines are logged and dropped; they never abort
                // the connection.
                let message = match ServerMessage::parse(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("[lobby] dropping malformed line: {e}");
                        continue;
                    }
                };
                handle_message(message, &line, &writer_tx, &model, &pending, &channels).await;
            }
            Ok(None) => {
                info!("[lobby] server closed the connection");
                break;
            }
            Err(e) => {
                warn!("[lobby] read error: {e}");
                break;
            }
        }
    }

    // Disconnected: fail outstanding requests, close lobby channels, tell
    // the host.
    model.lock().auth = Some(AuthState::Dead);
    fail_pending(&pending, "connection lost");
    let err = GmError::Transport("lobby connection lost".into());
    channels.close_all_of_kind(ChannelKind::LobbyChat, Some(&err));
    channels
        .outbox()
        .notify("lobby/disconnected", serde_json::json!({ "reason": "connection lost" }));
}

/// Raw JSON body forwarded to the host: the line's argument object with the
/// command name folded in.
fn event_body(command: &str, line: &str) -> String {
    let args = wire::split_line(line).map(|(_, v)| v).unwrap_or(serde_json::Value::Null);
    let mut body = serde_json::json!({ "command": command });
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), args.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    body.to_string()
}

async fn handle_message(
    message: ServerMessage,
    raw_line: &str,
    writer_tx: &mpsc::Sender<String>,
    model: &Arc<Mutex<LobbyModel>>,
    pending: &Arc<PendingMap>,
    channels: &Arc<ChannelTable>,
) {
    match message {
        ServerMessage::Welcome(welcome) => {
            info!(
                "[lobby] greeted (engine {:?}, game {:?})",
                welcome.engine, welcome.game
            );
            model.lock().greeting = Some(welcome);
        }
        ServerMessage::Ping => {
            // Keepalive; answer in kind.
            let _ = writer_tx.send("Ping".into()).await;
        }
        ServerMessage::LoginResponse(_) => {
            settle(pending, "LoginResponse", &args_of(raw_line));
        }
        ServerMessage::RegisterResponse(_) => {
            settle(pending, "RegisterResponse", &args_of(raw_line));
        }
        ServerMessage::ChannelJoined(ref joined) => {
            if !settle(pending, "ChannelJoined", &args_of(raw_line)) {
                // Server-initiated join (e.g. forced into a moderation room):
                // surface on the global channel, the agent decides.
                debug!("[lobby] unsolicited ChannelJoined {}", joined.channel_name);
                channels
                    .outbox()
                    .incoming(LOBBY_GLOBAL_CHANNEL, event_body("ChannelJoined", raw_line));
            }
        }
        ServerMessage::Said(ref said) => {
            let target_room = {
                let model = model.lock();
                model.joined_rooms.contains(&said.target).then(|| said.target.clone())
            };
            match (SayPlace::from_wire(said.place), target_room) {
                (Some(SayPlace::Channel), Some(room)) => {
                    channels
                        .outbox()
                        .incoming(&room_channel_id(&room), event_body("Said", raw_line));
                }
                _ => {
                    channels
                        .outbox()
                        .incoming(LOBBY_GLOBAL_CHANNEL, event_body("Said", raw_line));
                }
            }
        }
        ServerMessage::ChannelUserAdded(ref member) => {
            channels.outbox().incoming(
                &room_channel_id(&member.channel_name),
                event_body("ChannelUserAdded", raw_line),
            );
        }
        ServerMessage::ChannelUserRemoved(ref member) => {
            channels.outbox().incoming(
                &room_channel_id(&member.channel_name),
                event_body("ChannelUserRemoved", raw_line),
            );
        }
        ServerMessage::ChannelLeft(ref member) => {
            let ours = model.lock().username.as_deref() == Some(member.user_name.as_str());
            if ours {
                model.lock().joined_rooms.remove(&member.channel_name);
                let _ = channels.close(&room_channel_id(&member.channel_name), None);
            } else {
                channels.outbox().incoming(
                    &room_channel_id(&member.channel_name),
                    event_body("ChannelLeft", raw_line),
                );
            }
        }
        ServerMessage::UserSeen(user) => {
            model.lock().users.insert(user.name.clone(), user);
            channels
                .outbox()
                .incoming(LOBBY_GLOBAL_CHANNEL, event_body("User", raw_line));
        }
        ServerMessage::UserGone(ref user) => {
            model.lock().users.remove(&user.name);
            channels
                .outbox()
                .incoming(LOBBY_GLOBAL_CHANNEL, event_body("UserDisconnected", raw_line));
        }
        ServerMessage::BattleAdded(header) | ServerMessage::BattleUpdate(header) => {
            let command = raw_line.split_whitespace().next().unwrap_or("BattleUpdate");
            model.lock().merge_battle(header);
            channels
                .outbox()
                .incoming(LOBBY_GLOBAL_CHANNEL, event_body(command, raw_line));
        }
        ServerMessage::BattleRemoved(ref battle) => {
            model.lock().battles.remove(&battle.battle_id);
            channels
                .outbox()
                .incoming(LOBBY_GLOBAL_CHANNEL, event_body("BattleRemoved", raw_line));
        }
        ServerMessage::JoinedBattle(_) => {
            if !settle(pending, "JoinedBattle", &args_of(raw_line)) {
                channels
                    .outbox()
                    .incoming(LOBBY_GLOBAL_CHANNEL, event_body("JoinedBattle", raw_line));
            }
        }
        ServerMessage::LeftBattle(_) => {
            channels
                .outbox()
                .incoming(LOBBY_GLOBAL_CHANNEL, event_body("LeftBattle", raw_line));
        }
        ServerMessage::Unknown { ref command, .. } => {
            debug!("[lobby] passing through {command}");
            channels
                .outbox()
                .incoming(LOBBY_GLOBAL_CHANNEL, event_body(command, raw_line));
        }
    }
}

fn args_of(line: &str) -> serde_json::Value {
    wire::split_line(line).map(|(_, v)| v).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battle_merge_tolerates_update_before_open() {
        let mut model = LobbyModel::default();
        model.merge_battle(BattleHeader {
            battle_id: 9,
            map: Some("SimpleChess".into()),
            ..Default::default()
        });
        model.merge_battle(BattleHeader {
            battle_id: 9,
            title: Some("1v1".into()),
            ..Default::default()
        });
        let battle = &model.battles[&9];
        assert_eq!(battle.map.as_deref(), Some("SimpleChess"));
        assert_eq!(battle.title.as_deref(), Some("1v1"));
    }

    #[test]
    fn event_body_folds_command_into_args() {
        let body = event_body("Said", r#"Said {"User":"alice","Text":"hi"}"#);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["command"], "Said");
        assert_eq!(parsed["User"], "alice");
    }

    #[test]
    fn room_channel_ids_are_prefixed() {
        assert_eq!(room_channel_id("main"), "lobby:main");
    }
}
