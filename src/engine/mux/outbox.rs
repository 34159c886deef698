// GameManager — Session Outbox
//
// Exactly one task owns the upstream write half; everything else talks to it
// through this handle. Ordering guarantee: lines are written in the order
// they are enqueued, which is what lets tool handlers enqueue side-effect
// notifications before their response.

use super::protocol::{
    ChannelsChangedParams, ChannelsIncomingParams, RpcNotification, RpcResponse,
};
use crate::atoms::error::ErrorBody;
use crate::atoms::types::ChannelInfo;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
    /// Off until negotiation: legacy sessions suppress every push
    /// notification; responses still flow.
    push_enabled: Arc<AtomicBool>,
}

impl Outbox {
    /// Spawn the writer task over the transport write half. Dropping every
    /// clone of the returned handle ends the task.
    pub fn spawn<W>(mut writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    warn!("[mux] upstream write failed: {e}");
                    break;
                }
                if let Err(e) = writer.write_all(b"\n").await {
                    warn!("[mux] upstream write failed: {e}");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    warn!("[mux] upstream flush failed: {e}");
                    break;
                }
            }
            debug!("[mux] outbox writer exiting");
        });
        Outbox { tx, push_enabled: Arc::new(AtomicBool::new(false)) }
    }

    /// Flipped on once the client acknowledges a push-capable feature set.
    pub fn set_push_enabled(&self, enabled: bool) {
        self.push_enabled.store(enabled, Ordering::Relaxed);
    }

    fn send_line(&self, line: String) {
        // A closed receiver means the session is tearing down; nothing left
        // to surface the message to.
        let _ = self.tx.send(line);
    }

    pub fn response(&self, response: RpcResponse) {
        match serde_json::to_string(&response) {
            Ok(line) => self.send_line(line),
            Err(e) => warn!("[mux] unserializable response id={}: {e}", response.id),
        }
    }

    pub fn notify(&self, method: &str, params: serde_json::Value) {
        if !self.push_enabled.load(Ordering::Relaxed) {
            debug!("[mux] suppressing {method} for legacy session");
            return;
        }
        match serde_json::to_string(&RpcNotification::new(method, params)) {
            Ok(line) => self.send_line(line),
            Err(e) => warn!("[mux] unserializable notification {method}: {e}"),
        }
    }

    /// One inbound payload from a channel's owning resource.
    pub fn incoming(&self, channel_id: &str, body: String) {
        let params = ChannelsIncomingParams { channel_id: channel_id.to_string(), body };
        self.notify(
            "channels/incoming",
            serde_json::to_value(params).unwrap_or_default(),
        );
    }

    pub fn changed_added(&self, added: Vec<ChannelInfo>) {
        let params = ChannelsChangedParams { added, removed: vec![], error: None };
        self.notify(
            "channels/changed",
            serde_json::to_value(params).unwrap_or_default(),
        );
    }

    pub fn changed_removed(&self, channel_id: &str, error: Option<ErrorBody>) {
        let params = ChannelsChangedParams {
            added: vec![],
            removed: vec![channel_id.to_string()],
            error,
        };
        self.notify(
            "channels/changed",
            serde_json::to_value(params).unwrap_or_default(),
        );
    }

    #[cfg(test)]
    pub fn test_pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Outbox { tx, push_enabled: Arc::new(AtomicBool::new(true)) }, rx)
    }
}
