//! Virtual PIV card and NFC link
//!
//! Stands in for a real card presented over NFC. The card keeps its state
//! across presentments, so a test can remove it mid-sequence, present it
//! again and observe what the previous session left behind. Link faults
//! and touch behaviour are scripted per card.

mod applet;


use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::model::{KeyOrigin, KeySpec, Slot};
use crate::ports::{CancelToken, CardTransport, Connection};
use crate::protocol::Command;

use applet::{PivApplet, TouchGate};
pub use applet::CardProfile;

/// One-shot link fault keyed on an instruction byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The field drops before the command reaches the card
    DropBefore(u8),
    /// The card executes the command, then the field drops before the response
    DropAfter(u8),
    /// The command never gets an answer
    TimeoutBefore(u8),
}

impl Fault {
    fn ins(self) -> u8 {
        match self {
            Fault::DropBefore(ins) | Fault::DropAfter(ins) | Fault::TimeoutBefore(ins) => ins,
        }
    }
}

/// How the holder reacts when the card asks for touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TouchResponse {
    #[default]
    Confirm,
    /// Never touch; the card gives up after `timeout`
    Ignore { timeout: Duration },
}

struct CardState {
    applet: PivApplet,
    present: bool,
    faults: Vec<Fault>,
    touch: TouchResponse,
    log: Vec<Command>,
    open_connections: usize,
}

/// A PIV card that can be presented to a [`VirtualCardTransport`] any number
/// of times; clones share the same card
#[derive(Clone)]
pub struct VirtualCard {
    state: Arc<Mutex<CardState>>,
}

impl VirtualCard {
    pub fn new(profile: CardProfile) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState {
                applet: PivApplet::new(profile),
                present: true,
                faults: Vec::new(),
                touch: TouchResponse::default(),
                log: Vec::new(),
                open_connections: 0,
            })),
        }
    }

    /// Preload a generated key, as if provisioned earlier
    pub fn with_key(self, slot: Slot, spec: KeySpec) -> Self {
        self.state
            .lock()
            .applet
            .install_key(slot, &spec, KeyOrigin::Generated);
        self
    }

    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    pub fn set_touch(&self, touch: TouchResponse) {
        self.state.lock().touch = touch;
    }

    /// Take the card out of the field; open connections fail on their next exchange
    pub fn remove(&self) {
        let mut state = self.state.lock();
        state.present = false;
        state.applet.power_cycle();
    }

    pub fn reinsert(&self) {
        self.state.lock().present = true;
    }

    /// Every command the card received, in order; a chain appears as its last block
    pub fn exchange_log(&self) -> Vec<Command> {
        self.state.lock().log.clone()
    }

    pub fn count_ins(&self, ins: u8) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|command| command.ins == ins)
            .count()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    pub fn public_key(&self, slot: Slot) -> Option<Vec<u8>> {
        self.state.lock().applet.slot(slot).map(|key| key.public_bytes())
    }

    pub fn pin_attempts_remaining(&self) -> u8 {
        self.state.lock().applet.pin_remaining()
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }
}

/// NFC reader stand-in: handles are the cards themselves
#[derive(Debug, Default)]
pub struct VirtualCardTransport;

impl VirtualCardTransport {
    pub fn new() -> Self {
        Self
    }
}

impl CardTransport for VirtualCardTransport {
    type Handle = VirtualCard;
    type Connection = VirtualConnection;

    fn open(
        &mut self,
        card: VirtualCard,
        cancel: CancelToken,
    ) -> Result<VirtualConnection, LinkError> {
        {
            let mut state = card.state.lock();
            if !state.present {
                return Err(LinkError::Unavailable {
                    reason: "no card in the field".to_string(),
                });
            }
            state.open_connections += 1;
        }
        debug!("virtual card connected");
        Ok(VirtualConnection {
            card,
            cancel,
            open: true,
        })
    }
}

pub struct VirtualConnection {
    card: VirtualCard,
    cancel: CancelToken,
    open: bool,
}

impl VirtualConnection {
    fn lost(&mut self, reason: &str) -> LinkError {
        self.close();
        LinkError::Lost {
            reason: reason.to_string(),
        }
    }

    /// Sleep for `duration` unless cancelled first
    fn wait(&self, duration: Duration) -> Result<(), LinkError> {
        if self.cancel.wait_timeout(duration) {
            return Err(LinkError::Cancelled);
        }
        Ok(())
    }
}

impl Connection for VirtualConnection {
    fn exchange(&mut self, apdu: &[u8]) -> Result<Vec<u8>, LinkError> {
        if !self.open {
            return Err(LinkError::Lost {
                reason: "connection closed".to_string(),
            });
        }
        if self.cancel.is_cancelled() {
            return Err(LinkError::Cancelled);
        }
        let command = Command::from_bytes(apdu).map_err(|err| LinkError::Lost {
            reason: format!("unparseable APDU: {}", err),
        })?;

        let (reply, fault, touch) = {
            let mut state = self.card.state.lock();
            if !state.present {
                drop(state);
                return Err(self.lost("card left the field"));
            }
            let position = state.faults.iter().position(|f| f.ins() == command.ins);
            let fault = position.map(|index| state.faults.remove(index));

            match fault {
                Some(Fault::DropBefore(ins)) => {
                    warn!(ins, "virtual link dropped before command");
                    state.applet.power_cycle();
                    drop(state);
                    return Err(self.lost("field lost"));
                }
                Some(Fault::TimeoutBefore(ins)) => {
                    warn!(ins, "virtual link timed out");
                    drop(state);
                    self.close();
                    return Err(LinkError::Timeout);
                }
                _ => {}
            }

            let touch = state.touch;
            let gate = match touch {
                TouchResponse::Confirm => TouchGate::Confirmed,
                TouchResponse::Ignore { .. } => TouchGate::Ignored,
            };
            if !command.is_chained() {
                state.log.push(command.clone());
            }
            let reply = state.applet.process(&command, gate);
            (reply, fault, touch)
        };

        if reply.awaited_touch {
            if let TouchResponse::Ignore { timeout } = touch {
                self.wait(timeout)?;
            }
        }

        if let Some(Fault::DropAfter(ins)) = fault {
            warn!(ins, "virtual link dropped after command");
            self.card.state.lock().applet.power_cycle();
            return Err(self.lost("field lost"));
        }
        Ok(reply.response.to_bytes())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let mut state = self.card.state.lock();
            state.open_connections = state.open_connections.saturating_sub(1);
            debug!("virtual card disconnected");
        }
    }
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        self.close();
    }
}
