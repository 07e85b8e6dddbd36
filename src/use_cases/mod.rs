//! Use cases (orchestration)
//!
//! The orchestrator turns card-present events into provisioning sequences
//! and hands each terminal outcome to the result sink.

mod card_session;
mod orchestrator;
mod provision;
mod report;

pub use card_session::CardSession;
pub use orchestrator::{Orchestrator, DEFAULT_DISCOVERY_TIMEOUT};
pub use provision::{run_sequence, Progress, SessionPlan, SignPlan};
pub use report::{
    DiscoveryFailure, SessionFailure, SessionOutcome, SessionReport, SignatureReport, SlotAction,
    SlotReport, Step,
};
