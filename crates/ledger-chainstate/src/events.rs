//! The four events the chainstate publishes to subscribers (§6): a bounded
//! `mpsc` fan-out, matching the synchronous, in-process nature of §5 — no
//! subscriber can block the chainstate lock indefinitely because a full
//! channel just drops the event for that subscriber rather than stalling.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use ledger_consensus::Hash;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    NewTip { hash: Hash, height: u32 },
    BlockInvalid { hash: Hash, reason: String },
    TxAccepted { txid: Hash },
    TxRemoved { txid: Hash, reason: String },
}

/// A bounded channel doesn't exist directly in `std::sync::mpsc`; capacity
/// is enforced here by counting in-flight sends and dropping past it, which
/// is all a "subscriber" needs for a log/metrics sink.
pub struct EventBus {
    subscribers: Vec<SyncSender<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Vec::new() }
    }

    pub fn subscribe(&mut self) -> Receiver<Event> {
        let (tx, rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    pub fn publish(&mut self, event: Event) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_events_reach_subscribers() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe();
        bus.publish(Event::NewTip { hash: [1u8; 32], height: 1 });
        assert_eq!(rx.try_recv().unwrap(), Event::NewTip { hash: [1u8; 32], height: 1 });
    }

    #[test]
    fn dropped_subscriber_is_pruned_without_panicking() {
        let mut bus = EventBus::new();
        {
            let _rx = bus.subscribe();
        }
        bus.publish(Event::TxAccepted { txid: [2u8; 32] });
        assert!(bus.subscribers.is_empty());
    }
}
