// GameManager — Engine Supervisor
//
// Owns engine subprocesses: prepares the per-instance write directory,
// generates the start-script, spawns the engine, correlates it with a
// channel id and an expected Bridge handshake, and reaps it on exit.
// Destruction cascades to channel closure; nobody else touches the child.

pub mod script;
pub mod writedir;

use crate::atoms::constants::{
    ENV_HANDSHAKE_TOKEN, ENV_IPC_SOCKET, HANDSHAKE_DEADLINE_SECS,
};
use crate::atoms::error::{GmError, GmResult};
use crate::atoms::types::{ChannelKind, EngineStatus};
use crate::engine::ipc::{BridgeDisconnect, ExpectedBridge, IpcRouter};
use crate::engine::mux::channels::ChannelTable;
use crate::engine::state::Config;
use log::{debug, info, warn};
use parking_lot::Mutex;
use script::StartScript;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// What a caller asks for when starting a local game.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub map: String,
    pub game: String,
    pub opponent: String,
    pub headless: bool,
}

struct InstanceRecord {
    instance_id: String,
    spec: InstanceSpec,
    token: String,
    status: EngineStatus,
    started_at: Instant,
    /// Keep the channel alive when this process goes away (rollback
    /// restart); the channel is parked in `Opening` instead of closed.
    preserve_channel: bool,
    /// Fires the waiter task's kill arm. Consumed on first use.
    kill_tx: Option<oneshot::Sender<()>>,
}

pub struct Supervisor {
    config: Arc<Config>,
    channels: Arc<ChannelTable>,
    router: Arc<IpcRouter>,
    /// Keyed by channel id; the channel id is the only name other
    /// components know an instance by.
    instances: Arc<Mutex<HashMap<String, InstanceRecord>>>,
    counter: AtomicU64,
    disconnect_tx: mpsc::UnboundedSender<BridgeDisconnect>,
}

impl Supervisor {
    pub fn new(
        config: Arc<Config>,
        channels: Arc<ChannelTable>,
        router: Arc<IpcRouter>,
    ) -> Arc<Self> {
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Supervisor {
            config,
            channels,
            router,
            instances: Arc::new(Mutex::new(HashMap::new())),
            counter: AtomicU64::new(0),
            disconnect_tx,
        });
        tokio::spawn(supervisor.clone().drain_disconnects(disconnect_rx));
        supervisor
    }

    /// Start a local game. Returns the channel id once the engine process is
    /// spawned; the Bridge handshake completes asynchronously within the
    /// deadline or the channel closes with an `engine` error.
    pub async fn start(self: &Arc<Self>, spec: InstanceSpec) -> GmResult<String> {
        let instance_id = self.next_instance_id();
        let channel_id = format!("game:{instance_id}");
        // Channel first, then the expectation, then the process: the added
        // notification must precede anything the instance can emit.
        self.channels.open_pending(&channel_id, ChannelKind::GameInstance)?;
        self.launch(&channel_id, &instance_id, spec).await?;
        Ok(channel_id)
    }

    /// Stop a running instance. The waiter task does the actual cleanup.
    pub fn stop(&self, channel_id: &str) -> GmResult<()> {
        let mut instances = self.instances.lock();
        let record = instances
            .get_mut(channel_id)
            .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
        record.status = EngineStatus::Ended;
        if let Some(kill_tx) = record.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        Ok(())
    }

    pub fn is_running(&self, channel_id: &str) -> bool {
        self.instances.lock().contains_key(channel_id)
    }

    pub fn spec_of(&self, channel_id: &str) -> Option<InstanceSpec> {
        self.instances.lock().get(channel_id).map(|r| r.spec.clone())
    }

    pub fn running_channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear down the engine behind a channel and start a fresh one with the
    /// same channel id. The host sees a continuous channel: `engine_ended`,
    /// then a new `init` once the replacement Bridge handshakes.
    pub async fn restart(self: &Arc<Self>, channel_id: &str, spec: InstanceSpec) -> GmResult<()> {
        {
            let mut instances = self.instances.lock();
            let record = instances
                .get_mut(channel_id)
                .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
            record.status = EngineStatus::Ended;
            record.preserve_channel = true;
            if let Some(kill_tx) = record.kill_tx.take() {
                let _ = kill_tx.send(());
            }
        }
        // Wait for the waiter to reap; it parks the channel in Opening.
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.is_running(channel_id) {
            if Instant::now() >= deadline {
                return Err(GmError::Engine(format!(
                    "old engine for {channel_id} did not exit in time"
                )));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let instance_id = self.next_instance_id();
        self.launch(channel_id, &instance_id, spec).await
    }

    fn next_instance_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("local-{n}")
    }

    /// Prepare the write-dir, register the Bridge expectation, and spawn.
    /// On failure the channel is closed with an `engine` error.
    async fn launch(
        self: &Arc<Self>,
        channel_id: &str,
        instance_id: &str,
        spec: InstanceSpec,
    ) -> GmResult<()> {
        let token = Uuid::new_v4().to_string();
        match self.try_launch(channel_id, instance_id, &spec, &token).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.router.cancel(&token);
                let _ = self.channels.close(channel_id, Some(&err));
                Err(err)
            }
        }
    }

    async fn try_launch(
        self: &Arc<Self>,
        channel_id: &str,
        instance_id: &str,
        spec: &InstanceSpec,
        token: &str,
    ) -> GmResult<()> {
        let engine_binary = self.engine_binary(spec);
        let root = self.config.write_root.join(instance_id);
        std::fs::create_dir_all(&root)?;
        let write_dir = writedir::prepare(
            &root,
            &self.config.data_root,
            self.config.bridge_library.as_deref(),
            token,
            self.router.socket_path(),
        )?;
        let start_script = StartScript {
            map: spec.map.clone(),
            game: spec.game.clone(),
            engine_version: None,
            opponent: spec.opponent.clone(),
        };
        std::fs::write(&write_dir.script_path, start_script.render())?;

        self.router.expect(
            token.to_string(),
            ExpectedBridge {
                channel_id: channel_id.to_string(),
                channels: self.channels.clone(),
                disconnect_tx: self.disconnect_tx.clone(),
            },
        );

        let mut child = Command::new(&engine_binary)
            .arg("--write-dir")
            .arg(&write_dir.root)
            .arg(&write_dir.script_path)
            .env(ENV_HANDSHAKE_TOKEN, token)
            .env(ENV_IPC_SOCKET, self.router.socket_path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GmError::Engine(format!("failed to spawn {}: {e}", engine_binary.display()))
            })?;
        info!("[supervisor] spawned {} for {channel_id}", engine_binary.display());

        // Engine output becomes structured log lines.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stdout, instance_id.to_string(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stderr, instance_id.to_string(), "stderr"));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        self.instances.lock().insert(
            channel_id.to_string(),
            InstanceRecord {
                instance_id: instance_id.to_string(),
                spec: spec.clone(),
                token: token.to_string(),
                status: EngineStatus::Loading,
                started_at: Instant::now(),
                preserve_channel: false,
                kill_tx: Some(kill_tx),
            },
        );

        tokio::spawn(self.clone().wait_for_exit(channel_id.to_string(), child, kill_rx));
        tokio::spawn(
            self.clone()
                .enforce_handshake_deadline(channel_id.to_string(), token.to_string()),
        );
        Ok(())
    }

    fn engine_binary(&self, spec: &InstanceSpec) -> PathBuf {
        if let Some(path) = &self.config.engine_path {
            return path.clone();
        }
        // Engine binaries live under the shared content tree.
        let name = if spec.headless { "spring-headless" } else { "spring" };
        self.config.data_root.join("engine").join(name)
    }

    // ── Reaping ────────────────────────────────────────────────────────

    async fn wait_for_exit(
        self: Arc<Self>,
        channel_id: String,
        mut child: tokio::process::Child,
        kill_rx: oneshot::Receiver<()>,
    ) {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                debug!("[supervisor] killing {channel_id}");
                let _ = child.kill().await;
                child.wait().await
            }
        };

        let Some(record) = self.instances.lock().remove(&channel_id) else {
            return;
        };
        let never_handshook = self.router.cancel(&record.token);
        let exit_code = status.as_ref().ok().and_then(|s| s.code());
        let runtime_secs = record.started_at.elapsed().as_secs();
        info!(
            "[supervisor] {} exited (code {:?}) after {}s",
            record.instance_id, exit_code, runtime_secs
        );

        // EngineEnded travels as a regular incoming event; the error payload
        // (when abnormal) rides only on the channels/changed removal.
        let ended = serde_json::json!({
            "type": "engine_ended",
            "exitCode": exit_code,
            "runtimeSecs": runtime_secs,
            "endedAt": chrono::Utc::now().to_rfc3339(),
        });
        self.channels.outbox().incoming(&channel_id, ended.to_string());

        if record.preserve_channel {
            let _ = self.channels.unbind(&channel_id);
            return;
        }

        let error = if record.status == EngineStatus::Ended {
            // Explicitly stopped; a kill is the expected outcome.
            None
        } else if never_handshook {
            Some(GmError::Engine(format!(
                "engine exited (code {exit_code:?}) before the bridge handshake"
            )))
        } else if exit_code != Some(0) {
            Some(GmError::Engine(format!("engine exited with code {exit_code:?}")))
        } else {
            None
        };
        let _ = self.channels.close(&channel_id, error.as_ref());
    }

    async fn enforce_handshake_deadline(self: Arc<Self>, channel_id: String, token: String) {
        tokio::time::sleep(Duration::from_secs(HANDSHAKE_DEADLINE_SECS)).await;
        if self.router.cancel(&token) {
            warn!(
                "[supervisor] no bridge handshake for {channel_id} within {HANDSHAKE_DEADLINE_SECS}s"
            );
            let kill_tx = {
                let mut instances = self.instances.lock();
                instances.get_mut(&channel_id).and_then(|r| r.kill_tx.take())
            };
            if let Some(kill_tx) = kill_tx {
                let _ = kill_tx.send(());
            }
        }
    }

    async fn drain_disconnects(
        self: Arc<Self>,
        mut disconnect_rx: mpsc::UnboundedReceiver<BridgeDisconnect>,
    ) {
        while let Some(gone) = disconnect_rx.recv().await {
            if gone.graceful {
                debug!("[supervisor] bridge released {}", gone.channel_id);
                if let Some(record) = self.instances.lock().get_mut(&gone.channel_id) {
                    record.status = EngineStatus::Ended;
                }
                continue;
            }
            // Bridge lost while the engine may still be alive: the channel
            // is useless, kill the engine and let the waiter clean up.
            warn!("[supervisor] bridge connection lost for {}", gone.channel_id);
            let kill_tx = {
                let mut instances = self.instances.lock();
                instances.get_mut(&gone.channel_id).and_then(|r| r.kill_tx.take())
            };
            if let Some(kill_tx) = kill_tx {
                let _ = kill_tx.send(());
            }
        }
    }
}

async fn drain_output<R>(reader: R, instance_id: String, stream: &'static str)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            debug!("[engine:{instance_id}:{stream}] {trimmed}");
        }
    }
}
