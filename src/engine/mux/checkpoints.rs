// GameManager — Per-Session Checkpoint Tree
//
// The multiplexer stores only checkpoint ids and parent links; the payload
// (engine savestate path, launch spec) is the owning component's business.
// Ids are stable identifiers, not counters: rolling back and checkpointing
// again never reuses or skips an id.

use crate::atoms::error::{GmError, GmResult};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CheckpointNode {
    pub id: String,
    pub parent: Option<String>,
    pub feature_set: String,
    pub channel_id: Option<String>,
}

/// One tree per session. `head` tracks the checkpoint the next node will
/// hang off; rollback moves the head without deleting descendants.
#[derive(Debug, Default)]
pub struct CheckpointTree {
    nodes: HashMap<String, CheckpointNode>,
    head: Option<String>,
}

impl CheckpointTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new checkpoint under the current head and advance the head.
    pub fn record(&mut self, feature_set: &str, channel_id: Option<&str>) -> CheckpointNode {
        let node = CheckpointNode {
            id: Uuid::new_v4().to_string(),
            parent: self.head.clone(),
            feature_set: feature_set.to_string(),
            channel_id: channel_id.map(str::to_string),
        };
        self.head = Some(node.id.clone());
        self.nodes.insert(node.id.clone(), node.clone());
        node
    }

    /// Move the head back to an existing checkpoint.
    pub fn rollback_to(&mut self, checkpoint_id: &str) -> GmResult<CheckpointNode> {
        let node = self
            .nodes
            .get(checkpoint_id)
            .cloned()
            .ok_or_else(|| {
                GmError::Validation {
                    tool: "state/rollback".into(),
                    message: format!("unknown checkpoint id {checkpoint_id}"),
                }
            })?;
        self.head = Some(node.id.clone());
        Ok(node)
    }

    pub fn get(&self, checkpoint_id: &str) -> Option<&CheckpointNode> {
        self.nodes.get(checkpoint_id)
    }

    /// Walk parent links from a node to the root, nearest first.
    pub fn ancestry(&self, checkpoint_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = self.nodes.get(checkpoint_id).and_then(|n| n.parent.clone());
        while let Some(id) = cursor {
            chain.push(id.clone());
            cursor = self.nodes.get(&id).and_then(|n| n.parent.clone());
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_chains_parents() {
        let mut tree = CheckpointTree::new();
        let a = tree.record("game.state", Some("game:local-1"));
        let b = tree.record("game.state", Some("game:local-1"));
        assert_eq!(b.parent.as_deref(), Some(a.id.as_str()));
        assert!(a.parent.is_none());
    }

    #[test]
    fn rollback_then_checkpoint_branches_from_rolled_back_node() {
        // checkpoint → rollback → checkpoint: the new node's parent chain
        // must include the first checkpoint.
        let mut tree = CheckpointTree::new();
        let a = tree.record("game.state", None);
        let _b = tree.record("game.state", None);
        tree.rollback_to(&a.id).unwrap();
        let c = tree.record("game.state", None);
        assert_eq!(c.parent.as_deref(), Some(a.id.as_str()));
        assert!(tree.ancestry(&c.id).contains(&a.id));
    }

    #[test]
    fn ids_are_stable_not_counters() {
        let mut tree = CheckpointTree::new();
        let a = tree.record("game.state", None);
        tree.rollback_to(&a.id).unwrap();
        let b = tree.record("game.state", None);
        // A fresh id, never a reused or skipped counter value.
        assert_ne!(a.id, b.id);
        assert!(tree.get(&a.id).is_some());
    }

    #[test]
    fn rollback_to_unknown_id_is_validation_error() {
        let mut tree = CheckpointTree::new();
        let err = tree.rollback_to("nope").unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
