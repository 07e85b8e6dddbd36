//! Transport port - one physical connection to a card

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::LinkError;

/// Opens connections from handles delivered by the discovery collaborator
pub trait CardTransport {
    /// Opaque handle carried by a card-present event
    type Handle: Send;

    type Connection: Connection;

    /// Open a connection to the presented card
    ///
    /// The connection must observe `cancel`: once it is set, no further APDU
    /// reaches the card and a blocked exchange returns `LinkError::Cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::Unavailable` if the card is gone or the radio is off
    fn open(
        &mut self,
        handle: Self::Handle,
        cancel: CancelToken,
    ) -> Result<Self::Connection, LinkError>;
}

/// Request/response channel to a card
///
/// `&mut self` keeps at most one exchange in flight. Any error invalidates the
/// connection; callers must reopen instead of retrying.
pub trait Connection {
    /// Send one raw command APDU and return the raw response (data + SW1/SW2)
    ///
    /// # Errors
    ///
    /// Returns `Lost`, `Timeout` or `Cancelled` on link failure
    fn exchange(&mut self, apdu: &[u8]) -> Result<Vec<u8>, LinkError>;

    /// Release the connection; must be idempotent
    fn close(&mut self);
}

/// Shared cancellation flag for discovery and in-flight exchanges
///
/// Cancelling also disconnects the channel returned by [`CancelToken::signal`],
/// so blocked waiters wake at once.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<CancelState>);

#[derive(Debug)]
struct CancelState {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (trigger, signal) = bounded(0);
        Self(Arc::new(CancelState {
            cancelled: AtomicBool::new(false),
            trigger: Mutex::new(Some(trigger)),
            signal,
        }))
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Receiver that never yields a message and disconnects on cancel
    pub fn signal(&self) -> Receiver<()> {
        self.0.signal.clone()
    }

    /// Block for `timeout` or until cancelled; returns whether it was cancelled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.0.signal.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}
