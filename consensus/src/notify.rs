use cinder_consensus_core::events::ConsensusEvent;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

/// Fire-and-forget fan-out of consensus events. Events are published after
/// the writer lock releases, over unbounded channels, so a slow or dead
/// subscriber can never stall a state transition.
#[derive(Default)]
pub struct ConsensusNotifier {
    subscribers: Mutex<Vec<Sender<ConsensusEvent>>>,
}

impl ConsensusNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ConsensusEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Delivers the events to every live subscriber, silently dropping
    /// channels whose receiver has gone away
    pub fn notify(&self, events: impl IntoIterator<Item = ConsensusEvent>) {
        let mut subscribers = self.subscribers.lock();
        for event in events {
            subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_consensus_core::Hash;

    #[test]
    fn dead_subscribers_are_shed() {
        let notifier = ConsensusNotifier::new();
        let alive = notifier.subscribe();
        let dead = notifier.subscribe();
        drop(dead);

        notifier.notify([ConsensusEvent::BlockConnected { hash: Hash::from(1u64), height: 1 }]);
        assert_eq!(alive.len(), 1);
        assert_eq!(notifier.subscribers.lock().len(), 1);
    }
}
