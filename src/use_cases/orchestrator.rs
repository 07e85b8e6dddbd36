//! Session orchestrator
//!
//! Waits for card-present events and runs one provisioning sequence per
//! presentment. Sequences never interleave: events that arrive while a card
//! is being served stay queued in the discovery channel.

use std::collections::BTreeSet;
use std::time::Duration;

use crossbeam_channel::select;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::model::Slot;
use crate::piv::PivSession;
use crate::ports::{
    CancelToken, CardTransport, CredentialSource, DiscoveryEvent, DiscoveryReceiver, ResultSink,
};

use super::card_session::CardSession;
use super::provision::{run_sequence, Progress, SessionPlan};
use super::report::{DiscoveryFailure, SessionFailure, SessionOutcome, SessionReport, Step};

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Orchestrator<T, P, S>
where
    T: CardTransport,
    P: CredentialSource,
    S: ResultSink,
{
    transport: T,
    credentials: P,
    sink: S,
    plan: SessionPlan,
    discovery_timeout: Duration,
    cancel: CancelToken,
    /// Slots whose key state a failed generation left unknown
    pending_requery: BTreeSet<Slot>,
}

impl<T, P, S> Orchestrator<T, P, S>
where
    T: CardTransport,
    P: CredentialSource,
    S: ResultSink,
{
    pub fn new(transport: T, credentials: P, sink: S, plan: SessionPlan) -> Self {
        Self {
            transport,
            credentials,
            sink,
            plan,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            cancel: CancelToken::new(),
            pending_requery: BTreeSet::new(),
        }
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Token that aborts the discovery wait and any in-flight session
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn pending_requery(&self) -> &BTreeSet<Slot> {
        &self.pending_requery
    }

    /// Serve card-present events until the discovery side hangs up
    ///
    /// The discovery timeout restarts after every presentment.
    ///
    /// # Errors
    ///
    /// Returns the reason discovery ended without a card: no event within
    /// the timeout, the collaborator reported the radio unavailable, or the
    /// cancel token fired. The failure is also delivered to the sink.
    pub fn run(&mut self, events: &DiscoveryReceiver<T::Handle>) -> Result<(), DiscoveryFailure> {
        let cancelled = self.cancel.signal();
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.discovery_failed(DiscoveryFailure::Cancelled));
            }
            let event = select! {
                recv(events) -> event => event,
                recv(cancelled) -> _ => {
                    return Err(self.discovery_failed(DiscoveryFailure::Cancelled));
                }
                default(self.discovery_timeout) => {
                    return Err(self.discovery_failed(DiscoveryFailure::TimedOut));
                }
            };
            match event {
                Ok(DiscoveryEvent::CardPresent(handle)) => {
                    self.handle_presentment(handle);
                }
                Ok(DiscoveryEvent::TimedOut) => {
                    return Err(self.discovery_failed(DiscoveryFailure::TimedOut));
                }
                Ok(DiscoveryEvent::Unavailable { reason }) => {
                    return Err(self.discovery_failed(DiscoveryFailure::Unavailable { reason }));
                }
                Err(_) => {
                    debug!("discovery channel closed");
                    return Ok(());
                }
            }
        }
    }

    fn discovery_failed(&mut self, failure: DiscoveryFailure) -> DiscoveryFailure {
        warn!(%failure, "discovery ended");
        self.sink.discovery_failed(&failure);
        failure
    }

    /// Run the full sequence against one presented card
    ///
    /// The outcome is delivered to the sink and returned. The connection is
    /// closed and the credentials wiped before this returns.
    pub fn handle_presentment(&mut self, handle: T::Handle) -> SessionOutcome {
        info!("card presented");
        let outcome = match self.serve(handle) {
            Ok(report) => {
                for step in &report.steps {
                    if let Step::QuerySlot(slot) = step {
                        self.pending_requery.remove(slot);
                    }
                }
                SessionOutcome::Completed(report)
            }
            Err(mut failure) => {
                for step in &failure.completed {
                    if let Step::QuerySlot(slot) = step {
                        self.pending_requery.remove(slot);
                    }
                }
                if let Some(slot) = failure.interrupted_generation() {
                    warn!(%slot, "generation interrupted, slot state unknown");
                    self.pending_requery.insert(slot);
                }
                failure.indeterminate_slots = self.pending_requery.iter().copied().collect();
                warn!(step = %failure.failed_step, error = %failure.error, "session failed");
                SessionOutcome::Failed(failure)
            }
        };
        self.sink.session_finished(&outcome);
        outcome
    }

    fn serve(&mut self, handle: T::Handle) -> Result<SessionReport, SessionFailure> {
        let mut progress = Progress::new(self.cancel.clone());

        let cancel = self.cancel.clone();
        let transport = &mut self.transport;
        let piv = progress.run(Step::Open, || {
            let connection = transport.open(handle, cancel)?;
            PivSession::open(connection)
        })?;
        let mut card = CardSession::new(piv, Credentials::default());

        let device = card.piv().device();
        let credentials = match progress.run(Step::LoadCredentials, || {
            self.credentials.credentials_for(&device)
        }) {
            Ok(credentials) => credentials,
            Err(failure) => {
                card.record_error(&failure.error);
                return Err(failure);
            }
        };
        card.set_credentials(credentials);

        run_sequence(&mut card, &self.plan, &self.pending_requery, progress)
    }
}
