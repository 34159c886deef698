// GameManager — Channel Table
//
// The multiplexer's record of every live channel in the session. Invariant:
// for every open channel id there is exactly one owning resource, reachable
// through the registered publish sender; removal and the `channels/changed`
// notification happen atomically with respect to publishes.

use super::outbox::Outbox;
use crate::atoms::error::{GmError, GmResult};
use crate::atoms::types::{ChannelInfo, ChannelKind, ChannelLifecycle};
use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

struct ChannelEntry {
    kind: ChannelKind,
    state: ChannelLifecycle,
    /// Inbox of the owning resource; publishes are forwarded here.
    /// Absent while the channel is still `Opening`.
    publish: Option<mpsc::Sender<String>>,
}

pub struct ChannelTable {
    outbox: Outbox,
    inner: Mutex<HashMap<String, ChannelEntry>>,
}

impl ChannelTable {
    pub fn new(outbox: Outbox) -> Self {
        ChannelTable { outbox, inner: Mutex::new(HashMap::new()) }
    }

    /// Record a channel that is still binding its resource (a game instance
    /// waiting for the Bridge handshake). Emits the `channels/changed`
    /// addition immediately so it lands before the opening tool's response.
    pub fn open_pending(&self, channel_id: &str, kind: ChannelKind) -> GmResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.contains_key(channel_id) {
                return Err(GmError::Internal(format!(
                    "channel id {channel_id} already in table"
                )));
            }
            inner.insert(
                channel_id.to_string(),
                ChannelEntry { kind, state: ChannelLifecycle::Opening, publish: None },
            );
        }
        info!("[mux] channel {channel_id} opening");
        self.outbox.changed_added(vec![ChannelInfo {
            channel_id: channel_id.to_string(),
            kind,
            state: ChannelLifecycle::Opening,
        }]);
        Ok(())
    }

    /// Record a channel whose resource is ready now (a joined lobby room).
    pub fn open(
        &self,
        channel_id: &str,
        kind: ChannelKind,
        publish: mpsc::Sender<String>,
    ) -> GmResult<()> {
        {
            let mut inner = self.inner.lock();
            if inner.contains_key(channel_id) {
                return Err(GmError::Internal(format!(
                    "channel id {channel_id} already in table"
                )));
            }
            inner.insert(
                channel_id.to_string(),
                ChannelEntry { kind, state: ChannelLifecycle::Open, publish: Some(publish) },
            );
        }
        info!("[mux] channel {channel_id} open");
        self.outbox.changed_added(vec![ChannelInfo {
            channel_id: channel_id.to_string(),
            kind,
            state: ChannelLifecycle::Open,
        }]);
        Ok(())
    }

    /// Bind the owning resource of a pending channel and mark it open.
    pub fn bind(&self, channel_id: &str, publish: mpsc::Sender<String>) -> GmResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .get_mut(channel_id)
            .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
        entry.publish = Some(publish);
        entry.state = ChannelLifecycle::Open;
        info!("[mux] channel {channel_id} bound");
        Ok(())
    }

    /// Detach the owning resource and park the channel back in `Opening`.
    /// Used by rollback restarts, where the id must survive the resource.
    pub fn unbind(&self, channel_id: &str) -> GmResult<()> {
        let mut inner = self.inner.lock();
        let entry = inner
            .get_mut(channel_id)
            .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
        entry.publish = None;
        entry.state = ChannelLifecycle::Opening;
        Ok(())
    }

    /// Forward one published payload to the owning resource.
    pub async fn publish(&self, channel_id: &str, body: String) -> GmResult<()> {
        let sender = {
            let inner = self.inner.lock();
            let entry = inner
                .get(channel_id)
                .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
            if entry.state != ChannelLifecycle::Open {
                return Err(GmError::ChannelClosed(channel_id.to_string()));
            }
            entry
                .publish
                .clone()
                .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?
        };
        sender
            .send(body)
            .await
            .map_err(|_| GmError::ChannelClosed(channel_id.to_string()))
    }

    /// Remove a channel and emit the `channels/changed` removal. Abnormal
    /// closures carry the error payload on the removal notification only.
    pub fn close(&self, channel_id: &str, error: Option<&GmError>) -> GmResult<()> {
        let existed = self.inner.lock().remove(channel_id).is_some();
        if !existed {
            return Err(GmError::ChannelClosed(channel_id.to_string()));
        }
        info!("[mux] channel {channel_id} closed");
        self.outbox.changed_removed(channel_id, error.map(GmError::to_body));
        Ok(())
    }

    /// Close every channel of one kind (lobby disconnect, session teardown).
    pub fn close_all_of_kind(&self, kind: ChannelKind, error: Option<&GmError>) {
        let ids: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .iter()
                .filter(|(_, e)| e.kind == kind)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.close(&id, error);
        }
    }

    pub fn state_of(&self, channel_id: &str) -> Option<ChannelLifecycle> {
        self.inner.lock().get(channel_id).map(|e| e.state)
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.inner.lock().contains_key(channel_id)
    }

    pub fn list(&self) -> Vec<ChannelInfo> {
        let inner = self.inner.lock();
        let mut infos: Vec<ChannelInfo> = inner
            .iter()
            .map(|(id, e)| ChannelInfo {
                channel_id: id.clone(),
                kind: e.kind,
                state: e.state,
            })
            .collect();
        infos.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        infos
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (ChannelTable, mpsc::UnboundedReceiver<String>) {
        let (outbox, rx) = Outbox::test_pair();
        (ChannelTable::new(outbox), rx)
    }

    #[tokio::test]
    async fn open_emits_changed_added() {
        let (table, mut rx) = table();
        let (tx, _keep) = mpsc::channel(4);
        table.open("lobby:main", ChannelKind::LobbyChat, tx).unwrap();
        let line = rx.recv().await.unwrap();
        assert!(line.contains("channels/changed"));
        assert!(line.contains("lobby:main"));
    }

    #[tokio::test]
    async fn publish_routes_to_owner() {
        let (table, _rx) = table();
        let (tx, mut owner_rx) = mpsc::channel(4);
        table.open("game:local-1", ChannelKind::GameInstance, tx).unwrap();
        table.publish("game:local-1", "{\"type\":\"stop\"}".into()).await.unwrap();
        assert_eq!(owner_rx.recv().await.unwrap(), "{\"type\":\"stop\"}");
    }

    #[tokio::test]
    async fn publish_on_pending_channel_is_channel_closed() {
        let (table, _rx) = table();
        table.open_pending("game:local-1", ChannelKind::GameInstance).unwrap();
        let err = table.publish("game:local-1", "x".into()).await.unwrap_err();
        assert_eq!(err.kind(), "channel-closed");
    }

    #[tokio::test]
    async fn bind_makes_pending_channel_publishable() {
        let (table, _rx) = table();
        table.open_pending("game:local-1", ChannelKind::GameInstance).unwrap();
        let (tx, mut owner_rx) = mpsc::channel(4);
        table.bind("game:local-1", tx).unwrap();
        table.publish("game:local-1", "go".into()).await.unwrap();
        assert_eq!(owner_rx.recv().await.unwrap(), "go");
    }

    #[tokio::test]
    async fn close_emits_removal_with_error_payload() {
        let (table, mut rx) = table();
        table.open_pending("game:local-1", ChannelKind::GameInstance).unwrap();
        let _added = rx.recv().await.unwrap();
        table
            .close("game:local-1", Some(&GmError::Engine("exited with code 1".into())))
            .unwrap();
        let removal = rx.recv().await.unwrap();
        assert!(removal.contains("removed"));
        assert!(removal.contains("\"code\":\"engine\""));
        // Publishing after removal is channel-closed.
        let err = table.publish("game:local-1", "x".into()).await.unwrap_err();
        assert_eq!(err.kind(), "channel-closed");
    }

    #[tokio::test]
    async fn duplicate_open_is_internal_error() {
        let (table, _rx) = table();
        table.open_pending("game:local-1", ChannelKind::GameInstance).unwrap();
        let err = table.open_pending("game:local-1", ChannelKind::GameInstance).unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
