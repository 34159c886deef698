// End-to-end protocol tests: a client driving `run_session` over in-memory
// pipes, with a scripted lobby server on a real TCP socket where the
// scenario needs one.

use game_manager::engine::ipc::IpcRouter;
use game_manager::engine::mux::{run_session, SessionEnd};
use game_manager::engine::state::Config;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ── Harness ────────────────────────────────────────────────────────────

struct TestClient {
    to_server: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    incoming: mpsc::UnboundedReceiver<Value>,
    session: JoinHandle<SessionEnd>,
    next_id: u64,
    _tmp: tempfile::TempDir,
}

impl TestClient {
    async fn start(engine_path: Option<PathBuf>) -> Self {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Arc::new(Config {
            write_root: tmp.path().join("instances"),
            data_root: tmp.path().join("shared"),
            engine_path,
            bridge_library: None,
            lobby_username: None,
            lobby_password: None,
        });
        let router = IpcRouter::new(tmp.path().join("gm.sock"));
        tokio::spawn(router.clone().run());

        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_end);
        let (client_read, to_server) = tokio::io::split(client_end);

        let session = tokio::spawn(async move {
            run_session(server_read, server_write, config, router)
                .await
                .expect("session run")
        });

        // Pump every server line into an inspectable queue.
        let (tx, incoming) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(client_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(serde_json::from_str(&line).unwrap_or(Value::Null)).is_err() {
                    break;
                }
            }
        });

        TestClient { to_server, incoming, session, next_id: 0, _tmp: tmp }
    }

    async fn send_raw(&mut self, line: &str) {
        self.to_server.write_all(line.as_bytes()).await.unwrap();
        self.to_server.write_all(b"\n").await.unwrap();
    }

    async fn request(&mut self, method: &str, params: Value) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send_raw(&frame.to_string()).await;
        id
    }

    /// Pull messages until `predicate` matches, buffering nothing: earlier
    /// messages are returned alongside so tests can assert ordering.
    async fn wait_for(&mut self, predicate: impl Fn(&Value) -> bool) -> (Vec<Value>, Value) {
        let mut seen = Vec::new();
        loop {
            let message = tokio::time::timeout(Duration::from_secs(10), self.incoming.recv())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended");
            if predicate(&message) {
                return (seen, message);
            }
            seen.push(message);
        }
    }

    async fn response(&mut self, id: u64) -> (Vec<Value>, Value) {
        self.wait_for(|m| m.get("id").and_then(Value::as_u64) == Some(id)).await
    }

    async fn initialize(&mut self, feature_sets: Option<Vec<&str>>) -> Value {
        let mut params = json!({ "protocolVersion": "2025-03-26" });
        if let Some(sets) = feature_sets {
            params["featureSets"] = json!(sets);
        }
        let id = self.request("initialize", params).await;
        let (_, response) = self.response(id).await;
        response["result"].clone()
    }
}

fn tool_body(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"].as_str().expect("tool content text");
    serde_json::from_str(text).expect("tool body json")
}

/// A long-lived stand-in for the engine binary.
#[cfg(unix)]
fn sleeper_engine(tmp: &std::path::Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = tmp.join("fake-spring");
    std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ── Negotiation ────────────────────────────────────────────────────────

#[tokio::test]
async fn initialize_advertises_and_enables_feature_sets() {
    let mut client = TestClient::start(None).await;
    let result = client.initialize(Some(vec!["game.state", "lobby.chat"])).await;

    assert_eq!(result["serverInfo"]["name"], "game-manager");
    let declared: Vec<&str> = result["featureSets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert!(declared.contains(&"game.commands"));
    let enabled = result["enabled"].as_array().unwrap();
    assert_eq!(enabled.len(), 2);
}

#[tokio::test]
async fn tools_list_is_filtered_by_negotiated_sets() {
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["game.state"])).await;

    let id = client.request("tools/list", json!({})).await;
    let (_, response) = client.response(id).await;
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"lobby_start_game"));
    assert!(names.contains(&"channel_list"));
    assert!(!names.contains(&"lobby_connect"));
}

// ── Legacy clients (S5) ────────────────────────────────────────────────

#[tokio::test]
async fn legacy_client_gets_tools_but_channel_tools_error() {
    let mut client = TestClient::start(None).await;
    client.initialize(None).await;

    // Plain tools still work.
    let id = client.request("tools/call", json!({ "name": "channel_list" })).await;
    let (_, response) = client.response(id).await;
    let body = tool_body(&response);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["channels"], json!([]));

    // Channel-owning tools refuse with the dedicated code.
    let id = client
        .request("tools/call", json!({ "name": "lobby_start_game", "arguments": { "map": "SimpleChess" } }))
        .await;
    let (_, response) = client.response(id).await;
    let body = tool_body(&response);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "channels-required");
}

// ── Protocol errors ────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_method_and_malformed_frames_keep_the_session() {
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["game.state"])).await;

    client.send_raw("this is not json").await;
    let id = client.request("game/teleport", json!({})).await;
    let (_, response) = client.response(id).await;
    assert_eq!(response["error"]["code"], -32601);

    // Session still serves requests afterwards.
    let id = client.request("tools/list", json!({})).await;
    let (_, response) = client.response(id).await;
    assert!(response["result"]["tools"].is_array());
}

#[tokio::test]
async fn publish_on_unknown_channel_is_channel_closed() {
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["game.state"])).await;

    let id = client
        .request(
            "channels/publish",
            json!({ "channelId": "game:local-1", "body": "{\"type\":\"stop\"}" }),
        )
        .await;
    let (_, response) = client.response(id).await;
    assert_eq!(response["error"]["data"]["code"], "channel-closed");
}

#[tokio::test]
async fn validation_errors_name_the_offender() {
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["lobby.chat"])).await;

    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_connect", "arguments": { "host": "x", "port": "not-a-port" } }),
        )
        .await;
    let (_, response) = client.response(id).await;
    let body = tool_body(&response);
    assert_eq!(body["error"]["code"], "validation");
    assert!(body["error"]["message"].as_str().unwrap().contains("port"));
}

// ── Shutdown ───────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_ends_the_session_gracefully() {
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["game.state"])).await;
    let id = client.request("shutdown", json!({})).await;
    let (_, response) = client.response(id).await;
    assert!(response["result"].is_object());
    let end = client.session.await.unwrap();
    assert_eq!(end, SessionEnd::Graceful);
}

// ── Local game lifecycle ───────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn start_game_emits_added_before_response_and_close_removes() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = sleeper_engine(tmp.path());
    let mut client = TestClient::start(Some(engine)).await;
    client.initialize(Some(vec!["game.state", "game.commands"])).await;

    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_start_game", "arguments": { "map": "SimpleChess", "opponent": "NullAI", "headless": true } }),
        )
        .await;
    let (earlier, response) = client.response(id).await;
    let body = tool_body(&response);
    assert_eq!(body["success"], true);
    let channel_id = body["data"]["channelId"].as_str().unwrap().to_string();
    assert!(channel_id.starts_with("game:local-"));

    // channels/changed with the addition was enqueued before the response.
    let added = earlier.iter().find(|m| {
        m["method"] == "channels/changed" && m["params"]["added"][0]["channelId"] == json!(channel_id)
    });
    assert!(added.is_some(), "no channels/changed addition before response: {earlier:?}");

    // Closing stops the engine and removes the channel.
    let id = client
        .request("channels/close", json!({ "channelId": channel_id }))
        .await;
    let (_, response) = client.response(id).await;
    assert!(response["result"].is_object());
    let (_, removal) = client
        .wait_for(|m| m["method"] == "channels/changed" && m["params"]["removed"][0] == json!(channel_id))
        .await;
    // An explicit stop is not an error removal.
    assert!(removal["params"]["error"].is_null());
}

#[cfg(unix)]
#[tokio::test]
async fn checkpoint_rollback_checkpoint_builds_a_parent_chain() {
    let tmp = tempfile::TempDir::new().unwrap();
    let engine = sleeper_engine(tmp.path());
    let mut client = TestClient::start(Some(engine)).await;
    client.initialize(Some(vec!["game.state"])).await;

    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_start_game", "arguments": { "map": "SimpleChess" } }),
        )
        .await;
    let (_, response) = client.response(id).await;
    let channel_id = tool_body(&response)["data"]["channelId"].as_str().unwrap().to_string();

    let id = client
        .request(
            "state/checkpoint",
            json!({ "featureSet": "game.state", "channelId": channel_id }),
        )
        .await;
    let (_, response) = client.response(id).await;
    let first = response["result"]["checkpointId"].as_str().unwrap().to_string();
    assert!(response["result"]["parentId"].is_null());

    let id = client
        .request("state/rollback", json!({ "checkpointId": first }))
        .await;
    let (_, response) = client.response(id).await;
    assert_eq!(response["result"]["channelId"], json!(channel_id));

    let id = client
        .request(
            "state/checkpoint",
            json!({ "featureSet": "game.state", "channelId": channel_id }),
        )
        .await;
    let (_, response) = client.response(id).await;
    let second = response["result"]["checkpointId"].as_str().unwrap();
    assert_ne!(second, first);
    // The rolled-back checkpoint is the new one's parent.
    assert_eq!(response["result"]["parentId"], json!(first));
}

#[tokio::test]
async fn rollback_on_non_rollback_set_is_refused() {
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["lobby.chat"])).await;
    let id = client
        .request("state/checkpoint", json!({ "featureSet": "lobby.chat" }))
        .await;
    let (_, response) = client.response(id).await;
    assert_eq!(response["error"]["data"]["code"], "validation");
}

// ── Lobby chat round trip (S4) ─────────────────────────────────────────

/// A scripted lobby server: greets, accepts one login, echoes room joins
/// and says.
async fn scripted_lobby() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(b"Welcome {\"Engine\":\"105.0\",\"Game\":\"Zero-K\",\"Version\":\"1.0\"}\n")
            .await
            .unwrap();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.starts_with("Login ") {
                write_half
                    .write_all(b"LoginResponse {\"ResultCode\":0}\n")
                    .await
                    .unwrap();
            } else if line.starts_with("JoinChannel ") {
                write_half
                    .write_all(
                        b"ChannelJoined {\"ChannelName\":\"main\",\"Users\":[\"agent\",\"alice\"]}\n",
                    )
                    .await
                    .unwrap();
            } else if let Some(args) = line.strip_prefix("Say ") {
                let say: Value = serde_json::from_str(args).unwrap();
                let said = json!({
                    "Place": 0,
                    "Target": say["Target"],
                    "User": "agent",
                    "Text": say["Text"],
                });
                write_half
                    .write_all(format!("Said {said}\n").as_bytes())
                    .await
                    .unwrap();
            }
        }
    });
    (port, task)
}

#[tokio::test]
async fn lobby_chat_round_trip() {
    let (port, _lobby) = scripted_lobby().await;
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["lobby.chat"])).await;

    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_connect", "arguments": { "host": "127.0.0.1", "port": port } }),
        )
        .await;
    let (_, response) = client.response(id).await;
    let body = tool_body(&response);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["greeting"]["game"], "Zero-K");

    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_login", "arguments": { "username": "agent", "password": "pw" } }),
        )
        .await;
    let (_, response) = client.response(id).await;
    assert_eq!(tool_body(&response)["success"], true);

    let id = client
        .request("tools/call", json!({ "name": "lobby_join_channel", "arguments": { "name": "main" } }))
        .await;
    let (earlier, response) = client.response(id).await;
    let body = tool_body(&response);
    assert_eq!(body["data"]["channelId"], "lobby:main");
    let added_before_response = earlier.iter().any(|m| {
        m["method"] == "channels/changed"
            && m["params"]["added"][0]["channelId"] == json!("lobby:main")
    });
    assert!(added_before_response);

    // Publish on the room channel; the say comes back as channels/incoming
    // on the same channel with our name on it.
    let id = client
        .request("channels/publish", json!({ "channelId": "lobby:main", "body": "hello" }))
        .await;
    let (_, response) = client.response(id).await;
    assert!(response["result"].is_object());

    let (_, incoming) = client
        .wait_for(|m| m["method"] == "channels/incoming" && m["params"]["channelId"] == "lobby:main")
        .await;
    let event: Value =
        serde_json::from_str(incoming["params"]["body"].as_str().unwrap()).unwrap();
    assert_eq!(event["command"], "Said");
    assert_eq!(event["Text"], "hello");
    assert_eq!(event["User"], "agent");
}

#[tokio::test]
async fn lobby_disconnect_closes_lobby_channels() {
    let (port, lobby) = scripted_lobby().await;
    let mut client = TestClient::start(None).await;
    client.initialize(Some(vec!["lobby.chat"])).await;

    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_connect", "arguments": { "host": "127.0.0.1", "port": port } }),
        )
        .await;
    client.response(id).await;
    let id = client
        .request(
            "tools/call",
            json!({ "name": "lobby_login", "arguments": { "username": "agent", "password": "pw" } }),
        )
        .await;
    client.response(id).await;
    let id = client
        .request("tools/call", json!({ "name": "lobby_join_channel", "arguments": { "name": "main" } }))
        .await;
    client.response(id).await;

    // Server goes away: all lobby channels close with a transport error and
    // the host is told.
    lobby.abort();
    let (_, removal) = client
        .wait_for(|m| {
            m["method"] == "channels/changed"
                && m["params"]["removed"].as_array().is_some_and(|r| !r.is_empty())
        })
        .await;
    assert_eq!(removal["params"]["error"]["code"], "transport");
    let (_, notice) = client.wait_for(|m| m["method"] == "lobby/disconnected").await;
    assert!(notice["params"]["reason"].is_string());
}
