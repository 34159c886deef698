// GameManager — Channel & Feature-Set Multiplexer
//
// One session per upstream transport connection. The root task reads
// line-delimited frames; tool invocations are spawned as child tasks with
// deadlines; a single writer task (the Outbox) serializes every response and
// notification back out. Side-effect notifications are enqueued by handlers
// before their response, so the wire order follows.

pub mod channels;
pub mod checkpoints;
pub mod features;
pub mod outbox;
pub mod protocol;

use crate::atoms::constants::{
    DEFAULT_TOOL_TIMEOUT_MS, PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use crate::atoms::error::{GmError, GmResult};
use crate::atoms::types::ToolCallResult;
use crate::engine::ipc::IpcRouter;
use crate::engine::state::{Config, GmState};
use crate::engine::supervisor::InstanceSpec;
use crate::engine::tools;
use features::Negotiated;
use log::{debug, info, warn};
use outbox::Outbox;
use parking_lot::Mutex;
use protocol::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

/// How a session ended; the binary maps this to its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent `shutdown` and the teardown ran.
    Graceful,
    /// Transport dropped without a shutdown.
    TransportLost,
}

struct Session {
    state: Arc<GmState>,
    outbox: Outbox,
    negotiated: Mutex<Negotiated>,
    checkpoints: Mutex<checkpoints::CheckpointTree>,
    /// Checkpoint payloads for the game feature set: enough to rebuild the
    /// instance behind a channel. Opaque to the protocol layer.
    checkpoint_specs: Mutex<HashMap<String, (String, InstanceSpec)>>,
    /// In-flight tool tasks by request id, for deadline/disconnect abort.
    in_flight: Arc<Mutex<HashMap<u64, tokio::task::AbortHandle>>>,
}

/// Serve one session over any line-based transport.
pub async fn run_session<R, W>(
    reader: R,
    writer: W,
    config: Arc<Config>,
    router: Arc<IpcRouter>,
) -> GmResult<SessionEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let outbox = Outbox::spawn(writer);
    let state = GmState::new(config, outbox.clone(), router);
    let session = Arc::new(Session {
        state,
        outbox,
        negotiated: Mutex::new(Negotiated::negotiate(None)),
        checkpoints: Mutex::new(checkpoints::CheckpointTree::new()),
        checkpoint_specs: Mutex::new(HashMap::new()),
        in_flight: Arc::new(Mutex::new(HashMap::new())),
    });

    let mut lines = BufReader::new(reader).lines();
    let end = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_inbound(&line) {
                    Ok(Inbound::Request(request)) => {
                        if session.handle_request(request).await {
                            break SessionEnd::Graceful;
                        }
                    }
                    Ok(Inbound::Notification(notification)) => {
                        session.handle_notification(notification).await;
                    }
                    Err(err) => {
                        // Recover the id when the frame was valid JSON so
                        // the caller is not left waiting forever.
                        match recover_id(&line) {
                            Some(id) => session.outbox.response(RpcResponse::err(
                                id,
                                RpcError::new(PARSE_ERROR, err.to_string()),
                            )),
                            None => warn!("[mux] dropping malformed frame: {err}"),
                        }
                    }
                }
            }
            Ok(None) => {
                info!("[mux] upstream closed");
                break SessionEnd::TransportLost;
            }
            Err(e) => {
                warn!("[mux] upstream read error: {e}");
                break SessionEnd::TransportLost;
            }
        }
    };

    session.teardown().await;
    Ok(end)
}

fn recover_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

impl Session {
    /// Returns true when the session should end (shutdown).
    async fn handle_request(self: &Arc<Self>, request: RpcRequest) -> bool {
        let id = request.id;
        let params = request.params.unwrap_or(serde_json::Value::Null);
        match request.method.as_str() {
            "initialize" => self.on_initialize(id, params),
            "tools/list" => self.on_tools_list(id),
            "tools/call" => self.on_tools_call(id, params),
            // Channel and rollback operations can suspend on process spawn
            // or reaping; none of them may block the session reader.
            "channels/open" => {
                let session = self.clone();
                tokio::spawn(async move { session.on_channels_open(id, params).await });
            }
            "channels/close" => {
                let session = self.clone();
                tokio::spawn(async move { session.on_channels_close(id, params).await });
            }
            // Publish stays on the reader task: spawning would let two
            // publishes on one channel race each other, and FIFO within a
            // channel direction is a protocol guarantee.
            "channels/publish" => self.on_channels_publish(id, params).await,
            "state/checkpoint" => self.on_checkpoint(id, params),
            "state/rollback" => {
                let session = self.clone();
                tokio::spawn(async move { session.on_rollback(id, params).await });
            }
            "shutdown" => {
                self.outbox.response(RpcResponse::ok(id, serde_json::json!({})));
                return true;
            }
            other => {
                self.outbox.response(RpcResponse::err(
                    id,
                    RpcError::new(METHOD_NOT_FOUND, format!("unknown method {other}")),
                ));
            }
        }
        false
    }

    async fn handle_notification(self: &Arc<Self>, notification: RpcNotification) {
        let params = notification.params.unwrap_or(serde_json::Value::Null);
        match notification.method.as_str() {
            // Fire-and-forget publish: errors can only be logged.
            "channels/publish" => match serde_json::from_value::<ChannelsPublishParams>(params) {
                Ok(publish) => {
                    if let Err(e) =
                        self.state.channels.publish(&publish.channel_id, publish.body).await
                    {
                        warn!("[mux] publish notification failed: {e}");
                    }
                }
                Err(e) => warn!("[mux] malformed publish notification: {e}"),
            },
            other => debug!("[mux] ignoring notification {other}"),
        }
    }

    fn on_initialize(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        let negotiated = Negotiated::negotiate(params.feature_sets.as_deref());
        // Push events exist only for clients that spoke the extension.
        self.outbox.set_push_enabled(params.feature_sets.is_some());
        info!(
            "[mux] initialized: client {:?}, enabled {:?}",
            params.client_info.as_ref().map(|c| c.name.as_str()),
            negotiated.enabled_names()
        );
        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            server_info: ServerInfo { name: SERVER_NAME.into(), version: SERVER_VERSION.into() },
            feature_sets: features::declared(),
            enabled: negotiated.enabled_names(),
        };
        *self.negotiated.lock() = negotiated;
        self.outbox
            .response(RpcResponse::ok(id, serde_json::to_value(result).unwrap_or_default()));
    }

    fn on_tools_list(self: &Arc<Self>, id: u64) {
        let negotiated = self.negotiated.lock().clone();
        let tools: Vec<ToolDecl> = tools::registry()
            .into_iter()
            .filter(|entry| negotiated.is_enabled(entry.feature_set))
            .map(|entry| entry.decl)
            .collect();
        let result = ToolsListResult { tools };
        self.outbox
            .response(RpcResponse::ok(id, serde_json::to_value(result).unwrap_or_default()));
    }

    fn on_tools_call(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        let params: ToolCallParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        let negotiated = self.negotiated.lock().clone();
        if !negotiated.is_enabled(
            tools::find(&params.name).map(|e| e.feature_set).unwrap_or(features::LOBBY_CHAT),
        ) {
            self.outbox.response(RpcResponse::err(
                id,
                RpcError::new(METHOD_NOT_FOUND, format!("tool {} not negotiated", params.name)),
            ));
            return;
        }

        // Handlers run concurrently with other requests on this session.
        let session = self.clone();
        let deadline = Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_TOOL_TIMEOUT_MS));
        let channels_negotiated = negotiated.channels_enabled();
        let handle = tokio::spawn(async move {
            let name = params.name.clone();
            let outcome = tokio::time::timeout(
                deadline,
                tools::dispatch(&session.state, &name, &params.arguments, channels_negotiated),
            )
            .await;
            let result = match outcome {
                Ok(Ok(data)) => ToolCallResult::ok(data),
                Ok(Err(err)) => {
                    debug!("[tools] {name} failed: {err}");
                    ToolCallResult::err(err.to_body())
                }
                Err(_) => {
                    warn!("[tools] {name} hit its {deadline:?} deadline");
                    ToolCallResult::err(
                        GmError::Internal(format!("tool {name} deadline exceeded")).to_body(),
                    )
                }
            };
            session.outbox.response(RpcResponse::ok(
                id,
                serde_json::to_value(result).unwrap_or_default(),
            ));
            session.in_flight.lock().remove(&id);
        });
        self.in_flight.lock().insert(id, handle.abort_handle());
    }

    async fn on_channels_open(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        if !self.negotiated.lock().channels_enabled() {
            self.outbox
                .response(RpcResponse::err(id, RpcError::channels_required("channels/open")));
            return;
        }
        let params: ChannelsOpenParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        let spec = InstanceSpec {
            map: params.map,
            game: params.game.unwrap_or_else(|| crate::atoms::constants::DEFAULT_GAME.into()),
            opponent: crate::atoms::constants::DEFAULT_OPPONENT.into(),
            headless: true,
        };
        match self.state.supervisor.start(spec).await {
            Ok(channel_id) => self.outbox.response(RpcResponse::ok(
                id,
                serde_json::json!({ "channelId": channel_id }),
            )),
            Err(err) => self.outbox.response(RpcResponse::err(id, RpcError::from_gm(&err))),
        }
    }

    async fn on_channels_close(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        let params: ChannelsCloseParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        let result = tools::game::execute(
            &self.state,
            "channel_close",
            &serde_json::json!({ "channel_id": params.channel_id }),
        )
        .await;
        match result {
            Ok(data) => self.outbox.response(RpcResponse::ok(id, data)),
            Err(err) => self.outbox.response(RpcResponse::err(id, RpcError::from_gm(&err))),
        }
    }

    async fn on_channels_publish(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        let params: ChannelsPublishParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        match self.state.channels.publish(&params.channel_id, params.body).await {
            Ok(()) => self.outbox.response(RpcResponse::ok(id, serde_json::json!({}))),
            Err(err) => self.outbox.response(RpcResponse::err(id, RpcError::from_gm(&err))),
        }
    }

    fn on_checkpoint(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        let params: CheckpointParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        if !self.negotiated.lock().rollback_enabled(&params.feature_set) {
            self.outbox.response(RpcResponse::err(
                id,
                RpcError::from_gm(&GmError::Validation {
                    tool: "state/checkpoint".into(),
                    message: format!("{} is not rollback-enabled for this session", params.feature_set),
                }),
            ));
            return;
        }
        // The game feature set checkpoints one instance; its payload is the
        // launch spec needed to rebuild that instance.
        let Some(channel_id) = params.channel_id else {
            self.outbox.response(RpcResponse::err(
                id,
                RpcError::from_gm(&GmError::Validation {
                    tool: "state/checkpoint".into(),
                    message: "channelId is required for game checkpoints".into(),
                }),
            ));
            return;
        };
        let Some(spec) = self.state.supervisor.spec_of(&channel_id) else {
            self.outbox.response(RpcResponse::err(
                id,
                RpcError::from_gm(&GmError::ChannelClosed(channel_id)),
            ));
            return;
        };
        let node = self
            .checkpoints
            .lock()
            .record(&params.feature_set, Some(&channel_id));
        self.checkpoint_specs
            .lock()
            .insert(node.id.clone(), (channel_id, spec));
        let result = CheckpointResult { checkpoint_id: node.id, parent_id: node.parent };
        self.outbox
            .response(RpcResponse::ok(id, serde_json::to_value(result).unwrap_or_default()));
    }

    async fn on_rollback(self: &Arc<Self>, id: u64, params: serde_json::Value) {
        let params: RollbackParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.outbox
                    .response(RpcResponse::err(id, RpcError::new(INVALID_PARAMS, e.to_string())));
                return;
            }
        };
        let node = match self.checkpoints.lock().rollback_to(&params.checkpoint_id) {
            Ok(node) => node,
            Err(err) => {
                self.outbox.response(RpcResponse::err(id, RpcError::from_gm(&err)));
                return;
            }
        };
        let payload = self.checkpoint_specs.lock().get(&node.id).cloned();
        let Some((channel_id, spec)) = payload else {
            self.outbox.response(RpcResponse::err(
                id,
                RpcError::from_gm(&GmError::Internal(format!(
                    "checkpoint {} has no stored payload",
                    node.id
                ))),
            ));
            return;
        };
        // Tear down and restart the engine behind the channel; the channel
        // id is preserved so the host sees a continuous stream.
        match self.state.supervisor.restart(&channel_id, spec).await {
            Ok(()) => self.outbox.response(RpcResponse::ok(
                id,
                serde_json::json!({ "checkpointId": node.id, "channelId": channel_id }),
            )),
            Err(err) => self.outbox.response(RpcResponse::err(id, RpcError::from_gm(&err))),
        }
    }

    async fn teardown(self: &Arc<Self>) {
        // A socket disconnect cancels all outstanding handlers.
        let handles: Vec<_> = self.in_flight.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.abort();
        }
        if let Some(lobby) = self.state.lobby.lock().await.take() {
            lobby.disconnect().await;
        }
        for channel_id in self.state.supervisor.running_channels() {
            let _ = self.state.supervisor.stop(&channel_id);
        }
        // Give waiters a moment to reap before the process (or connection
        // handler) goes away; engines are killed either way.
        for _ in 0..100 {
            if self.state.supervisor.running_channels().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("[mux] session torn down");
    }
}
