// GameManager — Bridge IPC Router
//
// Accepts Bridge connections on a local stream socket and matches each to an
// expected engine instance by handshake token. Frames are newline-delimited
// JSON. First frame from the Bridge: `hello`; first frame back: `welcome`;
// after that, events flow Bridge → GameManager and commands the other way.

use crate::atoms::error::{GmError, GmResult};
use crate::engine::mux::channels::ChannelTable;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// How long a fresh connection has to present its `hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Hello {
    #[serde(rename = "type")]
    kind: String,
    token: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
struct Welcome {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Sent to the Supervisor when a bound Bridge connection ends.
#[derive(Debug)]
pub struct BridgeDisconnect {
    pub channel_id: String,
    /// True when the Bridge sent its final `release` frame before closing.
    pub graceful: bool,
}

/// What the Supervisor registers before spawning an engine.
pub struct ExpectedBridge {
    pub channel_id: String,
    pub channels: Arc<ChannelTable>,
    pub disconnect_tx: mpsc::UnboundedSender<BridgeDisconnect>,
}

pub struct IpcRouter {
    socket_path: PathBuf,
    pending: Mutex<HashMap<String, ExpectedBridge>>,
    bound: Mutex<HashSet<String>>,
}

impl IpcRouter {
    pub fn new(socket_path: PathBuf) -> Arc<Self> {
        Arc::new(IpcRouter {
            socket_path,
            pending: Mutex::new(HashMap::new()),
            bound: Mutex::new(HashSet::new()),
        })
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Register the Bridge an about-to-spawn engine is expected to present.
    pub fn expect(&self, token: String, expected: ExpectedBridge) {
        debug!("[ipc] expecting bridge for {}", expected.channel_id);
        self.pending.lock().insert(token, expected);
    }

    /// Withdraw a pending expectation (handshake deadline, engine died
    /// early). Returns true when the Bridge had not yet handshaken.
    pub fn cancel(&self, token: &str) -> bool {
        self.pending.lock().remove(token).is_some()
    }

    /// Bind the listener and serve connections until the process exits.
    pub async fn run(self: Arc<Self>) -> GmResult<()> {
        // A stale socket file from a crashed run would fail the bind.
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| GmError::Bridge(format!("bind {}: {e}", self.socket_path.display())))?;
        info!("[ipc] listening on {}", self.socket_path.display());

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let router = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = router.serve_connection(stream).await {
                            warn!("[ipc] connection ended with error: {e}");
                        }
                    });
                }
                Err(e) => {
                    warn!("[ipc] accept error: {e}");
                }
            }
        }
    }

    async fn serve_connection(self: Arc<Self>, stream: UnixStream) -> GmResult<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // Handshake first; everything else on this socket waits for it.
        let first = tokio::time::timeout(HELLO_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| GmError::Bridge("hello timed out".into()))?
            .map_err(|e| GmError::Bridge(format!("hello read: {e}")))?
            .ok_or_else(|| GmError::Bridge("closed before hello".into()))?;
        let hello: Hello = serde_json::from_str(&first)
            .map_err(|e| GmError::Bridge(format!("malformed hello: {e}")))?;
        if hello.kind != "hello" {
            return Err(GmError::Bridge(format!("expected hello, got {}", hello.kind)));
        }

        let expected = match self.pending.lock().remove(&hello.token) {
            Some(expected) => expected,
            None => {
                if self.bound.lock().contains(&hello.token) {
                    // Duplicate handshake: the first connection keeps the
                    // binding, this one is closed.
                    warn!("[ipc] duplicate handshake for bound token, closing");
                } else {
                    warn!("[ipc] unmatched handshake token, dropping");
                }
                return Ok(());
            }
        };
        self.bound.lock().insert(hello.token.clone());
        info!(
            "[ipc] bridge bound to {} (version {})",
            expected.channel_id,
            hello.version.as_deref().unwrap_or("unknown")
        );

        // Commands published on the channel land here and go out the socket.
        // Bound before the welcome goes out: once the Bridge (or anyone
        // observing it) sees the welcome, the channel accepts publishes.
        let (command_tx, mut command_rx) = mpsc::channel::<String>(64);
        expected.channels.bind(&expected.channel_id, command_tx)?;

        write_half
            .write_all(format!("{}\n", serde_json::to_string(&Welcome { kind: "welcome" })?).as_bytes())
            .await
            .map_err(|e| GmError::Bridge(format!("welcome write: {e}")))?;

        let mut graceful = false;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(frame)) => {
                            if frame.trim().is_empty() {
                                continue;
                            }
                            if frame_type(&frame) == Some("release") {
                                debug!("[ipc] {} released", expected.channel_id);
                                graceful = true;
                                expected.channels.outbox().incoming(&expected.channel_id, frame);
                                break;
                            }
                            expected.channels.outbox().incoming(&expected.channel_id, frame);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("[ipc] read error on {}: {e}", expected.channel_id);
                            break;
                        }
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(body) => {
                            if let Err(e) = write_half.write_all(body.as_bytes()).await {
                                warn!("[ipc] write error on {}: {e}", expected.channel_id);
                                break;
                            }
                            if let Err(e) = write_half.write_all(b"\n").await {
                                warn!("[ipc] write error on {}: {e}", expected.channel_id);
                                break;
                            }
                        }
                        // Channel closed upstream; keep reading events until
                        // the Bridge goes away.
                        None => {
                            command_rx = never_channel();
                        }
                    }
                }
            }
        }

        self.bound.lock().remove(&hello.token);
        let _ = expected.disconnect_tx.send(BridgeDisconnect {
            channel_id: expected.channel_id,
            graceful,
        });
        Ok(())
    }
}

/// A receiver that never yields; swapped in once the publish side closes so
/// the select loop degenerates to reads only.
fn never_channel() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::mem::forget(tx);
    rx
}

fn frame_type(frame: &str) -> Option<&str> {
    // Cheap peek; full decoding happens host-side.
    let value: serde_json::Value = serde_json::from_str(frame).ok()?;
    value.get("type").and_then(|t| t.as_str()).map(|t| match t {
        "release" => "release",
        _ => "other",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::ChannelKind;
    use crate::engine::mux::outbox::Outbox;

    fn router_with_table() -> (Arc<IpcRouter>, Arc<ChannelTable>, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let router = IpcRouter::new(tmp.path().join("gm.sock"));
        let (outbox, _rx) = Outbox::test_pair();
        (router, Arc::new(ChannelTable::new(outbox)), tmp)
    }

    #[tokio::test]
    async fn handshake_binds_expected_token() {
        let (router, channels, _tmp) = router_with_table();
        channels.open_pending("game:local-1", ChannelKind::GameInstance).unwrap();
        let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
        router.expect(
            "tok".into(),
            ExpectedBridge {
                channel_id: "game:local-1".into(),
                channels: channels.clone(),
                disconnect_tx,
            },
        );
        tokio::spawn(router.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = UnixStream::connect(router.socket_path()).await.unwrap();
        stream
            .write_all(b"{\"type\":\"hello\",\"token\":\"tok\",\"version\":\"0.1\"}\n")
            .await
            .unwrap();
        let mut reply = String::new();
        let mut reader = BufReader::new(&mut stream);
        reader.read_line(&mut reply).await.unwrap();
        assert!(reply.contains("welcome"));

        // Channel is now publishable.
        channels.publish("game:local-1", "{\"type\":\"stop\"}".into()).await.unwrap();

        drop(stream);
        let gone = disconnect_rx.recv().await.unwrap();
        assert_eq!(gone.channel_id, "game:local-1");
        assert!(!gone.graceful);
    }

    #[tokio::test]
    async fn unmatched_token_is_dropped() {
        let (router, _channels, _tmp) = router_with_table();
        tokio::spawn(router.clone().run());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut stream = UnixStream::connect(router.socket_path()).await.unwrap();
        stream
            .write_all(b"{\"type\":\"hello\",\"token\":\"who\"}\n")
            .await
            .unwrap();
        let mut reply = String::new();
        let mut reader = BufReader::new(&mut stream);
        // Server closes without a welcome.
        let n = reader.read_line(&mut reply).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn cancel_reports_whether_still_pending() {
        let (router, channels, _tmp) = router_with_table();
        let (disconnect_tx, _rx) = mpsc::unbounded_channel();
        router.expect(
            "tok".into(),
            ExpectedBridge { channel_id: "game:local-1".into(), channels, disconnect_tx },
        );
        assert!(router.cancel("tok"));
        assert!(!router.cancel("tok"));
    }
}
