//! Discovery port - card-present events delivered over a bounded channel

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;

/// Event emitted by the discovery collaborator
#[derive(Debug)]
pub enum DiscoveryEvent<H> {
    /// A card can be connected through `H`
    CardPresent(H),
    /// The collaborator gave up waiting for a card
    TimedOut,
    /// The radio or reader is not available
    Unavailable { reason: String },
}

pub type DiscoveryReceiver<H> = Receiver<DiscoveryEvent<H>>;

/// Producer side handed to the discovery collaborator
#[derive(Debug, Clone)]
pub struct DiscoverySender<H> {
    inner: Sender<DiscoveryEvent<H>>,
}

impl<H> DiscoverySender<H> {
    /// Queue an event without blocking
    ///
    /// Events queue while a sequence runs; a full queue rejects the event
    /// instead of interleaving it with the running session.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the queue is at capacity and
    /// `OrchestratorGone` when the receiving side was dropped
    pub fn try_submit(&self, event: DiscoveryEvent<H>) -> Result<(), SubmitError> {
        self.inner.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Disconnected(_) => SubmitError::OrchestratorGone,
        })
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Discovery queue is full; event rejected")]
    QueueFull,

    #[error("Orchestrator is no longer listening")]
    OrchestratorGone,
}

/// Create a bounded channel with the specified capacity for discovery events
pub fn discovery_channel<H>(capacity: usize) -> (DiscoverySender<H>, DiscoveryReceiver<H>) {
    let (inner, receiver) = bounded(capacity);
    (DiscoverySender { inner }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_queue_rejects() {
        let (sender, receiver) = discovery_channel::<u8>(1);
        assert_eq!(sender.try_submit(DiscoveryEvent::CardPresent(1)), Ok(()));
        assert_eq!(
            sender.try_submit(DiscoveryEvent::CardPresent(2)),
            Err(SubmitError::QueueFull)
        );
        assert!(matches!(receiver.try_recv(), Ok(DiscoveryEvent::CardPresent(1))));
    }

    #[test]
    fn test_dropped_receiver() {
        let (sender, receiver) = discovery_channel::<u8>(1);
        drop(receiver);
        assert_eq!(
            sender.try_submit(DiscoveryEvent::TimedOut),
            Err(SubmitError::OrchestratorGone)
        );
    }
}
