//! Terminal outcomes surfaced to the result sink

use std::fmt;

use thiserror::Error;

use crate::error::SessionError;
use crate::model::{AttemptCounters, DeviceInfo, Signature, Slot, SlotMetadata};

/// One step of the provisioning sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Open,
    LoadCredentials,
    VerifyPin,
    AuthenticateManagement,
    QuerySlot(Slot),
    GenerateKey(Slot),
    ReadSlotMetadata(Slot),
    /// Fresh VERIFY for a slot whose PIN policy is `Always`
    VerifyPinForSigning,
    Sign(Slot),
    ReadCounters,
}

impl Step {
    /// Whether completing this step changed the card irreversibly
    pub fn is_irreversible(&self) -> bool {
        matches!(self, Step::GenerateKey(_))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Open => write!(f, "open session"),
            Step::LoadCredentials => write!(f, "load credentials"),
            Step::VerifyPin => write!(f, "verify PIN"),
            Step::AuthenticateManagement => write!(f, "authenticate management key"),
            Step::QuerySlot(slot) => write!(f, "query slot {}", slot),
            Step::GenerateKey(slot) => write!(f, "generate key in slot {}", slot),
            Step::ReadSlotMetadata(slot) => write!(f, "read metadata of slot {}", slot),
            Step::VerifyPinForSigning => write!(f, "verify PIN for signing"),
            Step::Sign(slot) => write!(f, "sign with slot {}", slot),
            Step::ReadCounters => write!(f, "read attempt counters"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    Reused,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub slot: Slot,
    pub action: SlotAction,
    pub metadata: SlotMetadata,
    /// The slot was left undefined by an interrupted generation and re-queried
    pub requeried_after_fault: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReport {
    pub slot: Slot,
    /// Carries the algorithm the card actually used
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub device: DeviceInfo,
    pub slots: Vec<SlotReport>,
    pub counters: AttemptCounters,
    pub signature: Option<SignatureReport>,
    pub steps: Vec<Step>,
}

impl SessionReport {
    pub fn slot(&self, slot: Slot) -> Option<&SlotReport> {
        self.slots.iter().find(|report| report.slot == slot)
    }

    pub fn generated_slots(&self) -> Vec<Slot> {
        generated(&self.steps)
    }
}

/// A sequence aborted at `failed_step`; nothing is rolled back
#[derive(Debug, Clone)]
pub struct SessionFailure {
    pub failed_step: Step,
    pub error: SessionError,
    pub completed: Vec<Step>,
    /// Slots whose key state is unknown and will be re-queried next session
    pub indeterminate_slots: Vec<Slot>,
}

impl SessionFailure {
    pub fn new(failed_step: Step, error: SessionError, completed: Vec<Step>) -> Self {
        Self {
            failed_step,
            error,
            completed,
            indeterminate_slots: Vec::new(),
        }
    }

    /// Slots whose keys were irreversibly replaced before the failure
    pub fn generated_slots(&self) -> Vec<Slot> {
        generated(&self.completed)
    }

    /// Slot left in an undefined state by this failure, if any
    pub fn interrupted_generation(&self) -> Option<Slot> {
        match self.failed_step {
            Step::GenerateKey(slot) if self.error.is_link_error() => Some(slot),
            _ => None,
        }
    }
}

fn generated(steps: &[Step]) -> Vec<Slot> {
    steps
        .iter()
        .filter_map(|step| match step {
            Step::GenerateKey(slot) => Some(*slot),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(SessionReport),
    Failed(SessionFailure),
}

impl SessionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&SessionReport> {
        match self {
            SessionOutcome::Completed(report) => Some(report),
            SessionOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            SessionOutcome::Completed(_) => None,
            SessionOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// Why the orchestrator stopped waiting for cards
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFailure {
    #[error("No card presented before the discovery timeout")]
    TimedOut,

    #[error("Card discovery unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Discovery cancelled")]
    Cancelled,
}
