use crate::use_cases::{DiscoveryFailure, SessionOutcome};

/// Consumer of session results (UI or caller)
pub trait ResultSink {
    /// Called once per card presentment with its terminal outcome
    fn session_finished(&mut self, outcome: &SessionOutcome);

    /// Called when discovery ends without a card
    fn discovery_failed(&mut self, failure: &DiscoveryFailure);
}

/// Collects every outcome in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub outcomes: Vec<SessionOutcome>,
    pub discovery_failures: Vec<DiscoveryFailure>,
}

impl ResultSink for CollectingSink {
    fn session_finished(&mut self, outcome: &SessionOutcome) {
        self.outcomes.push(outcome.clone());
    }

    fn discovery_failed(&mut self, failure: &DiscoveryFailure) {
        self.discovery_failures.push(failure.clone());
    }
}
