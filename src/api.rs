use crate::error::{AuthError, SessionResult};
use crate::ports::{CardTransport, CollectingSink};
use crate::use_cases::Orchestrator;

pub use crate::config::{ConfigError, SessionConfig};
pub use crate::model::*;
pub use crate::piv::{PivSession, SessionState, SigningRequest, MAX_SIGN_PAYLOAD};
pub use crate::credentials::Credentials;
pub use crate::use_cases::{
    SessionFailure, SessionOutcome, SessionPlan, SessionReport, SignPlan, SlotAction, Step,
};

/// Run one provisioning sequence against a card that is already present
///
/// `credentials` are moved into the card session and wiped when it ends.
pub fn provision_once<T: CardTransport>(
    transport: T,
    handle: T::Handle,
    credentials: Credentials,
    plan: SessionPlan,
) -> SessionOutcome {
    let mut credentials = Some(credentials);
    let source = move |_: &DeviceInfo| -> SessionResult<Credentials> {
        credentials.take().ok_or_else(|| {
            AuthError::MissingCredential {
                credential: "credentials",
            }
            .into()
        })
    };
    let mut orchestrator = Orchestrator::new(transport, source, CollectingSink::default(), plan);
    orchestrator.handle_presentment(handle)
}

/// Run the plan described by `config` once
pub fn provision_with_config<T: CardTransport>(
    transport: T,
    handle: T::Handle,
    credentials: Credentials,
    config: &SessionConfig,
) -> Result<SessionOutcome, ConfigError> {
    Ok(provision_once(transport, handle, credentials, config.plan()?))
}
