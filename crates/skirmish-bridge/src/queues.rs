// The two queues at the heart of the sim-thread / IPC-thread split.
//
// Outbound: unbounded, but successive `update` events coalesce to the
// latest — a slow socket can never make the sim thread allocate one update
// per frame. Inbound: a bounded std sync_channel; a full queue rejects with
// backpressure at the IPC edge instead of stalling either thread.

use crate::commands::InCommand;
use crate::events::OutEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};

/// Inbound command queue capacity. When full, commands are rejected with
/// `command_error("backpressure")`.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

pub fn command_queue() -> (SyncSender<InCommand>, Receiver<InCommand>) {
    std::sync::mpsc::sync_channel(COMMAND_QUEUE_CAPACITY)
}

/// Result of offering a command to the bounded queue.
pub enum Offer {
    Accepted,
    /// Queue full; the command was dropped.
    Backpressure,
    /// Sim side is gone.
    Closed,
}

pub fn offer(sender: &SyncSender<InCommand>, command: InCommand) -> Offer {
    match sender.try_send(command) {
        Ok(()) => Offer::Accepted,
        Err(TrySendError::Full(_)) => Offer::Backpressure,
        Err(TrySendError::Disconnected(_)) => Offer::Closed,
    }
}

/// Outbound event queue shared between the sim thread (producer) and the
/// IPC thread (consumer).
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<OutEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: OutEvent) {
        let mut inner = self.inner.lock();
        if event.is_update() {
            if let Some(back) = inner.back_mut() {
                if back.is_update() {
                    *back = event;
                    return;
                }
            }
        }
        inner.push_back(event);
    }

    /// Take everything queued, in order.
    pub fn drain(&self) -> Vec<OutEvent> {
        self.inner.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_updates_coalesce_to_latest() {
        let queue = EventQueue::new();
        queue.push(OutEvent::Update { frame: 30 });
        queue.push(OutEvent::Update { frame: 60 });
        queue.push(OutEvent::Update { frame: 90 });
        assert_eq!(queue.drain(), vec![OutEvent::Update { frame: 90 }]);
    }

    #[test]
    fn non_updates_interleave_without_coalescing() {
        let queue = EventQueue::new();
        queue.push(OutEvent::Update { frame: 30 });
        queue.push(OutEvent::UnitIdle { frame: 31, unit_id: 5 });
        queue.push(OutEvent::Update { frame: 60 });
        let drained = queue.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0], OutEvent::Update { frame: 30 });
        assert_eq!(drained[2], OutEvent::Update { frame: 60 });
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let queue = EventQueue::new();
        for unit_id in 0..5 {
            queue.push(OutEvent::UnitIdle { frame: 1, unit_id });
        }
        let drained = queue.drain();
        let ids: Vec<i32> = drained
            .iter()
            .map(|e| match e {
                OutEvent::UnitIdle { unit_id, .. } => *unit_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn bounded_queue_reports_backpressure_when_full() {
        let (tx, _rx) = command_queue();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            assert!(matches!(offer(&tx, InCommand::Pause), Offer::Accepted));
        }
        assert!(matches!(offer(&tx, InCommand::Pause), Offer::Backpressure));
    }

    #[test]
    fn queue_drains_and_accepts_again() {
        let (tx, rx) = command_queue();
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            offer(&tx, InCommand::Pause);
        }
        assert!(matches!(offer(&tx, InCommand::Unpause), Offer::Backpressure));
        while rx.try_recv().is_ok() {}
        assert!(matches!(offer(&tx, InCommand::Unpause), Offer::Accepted));
    }
}
