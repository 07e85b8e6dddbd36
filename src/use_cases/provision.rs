//! Provisioning sequence for one presented card
//!
//! verify PIN → authenticate management key → per slot: query, decide,
//! generate if empty → read metadata → optional sign → read counters.
//! The first failing step aborts the rest; nothing is rolled back.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::{LinkError, SessionResult};
use crate::logic::{decide, ProvisioningDecision};
use crate::model::{
    AttemptCounters, KeySpec, PinPolicy, SignatureAlgorithm, Slot, SlotMetadata,
};
use crate::piv::SigningRequest;
use crate::ports::{CancelToken, Connection};

use super::card_session::CardSession;
use super::report::{
    SessionFailure, SessionReport, SignatureReport, SlotAction, SlotReport, Step,
};

/// Optional signature produced at the end of the sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignPlan {
    pub slot: Slot,
    pub algorithm: SignatureAlgorithm,
    pub message: Vec<u8>,
}

/// Which slots to provision and what to sign in every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPlan {
    pub slots: Vec<(Slot, KeySpec)>,
    pub sign: Option<SignPlan>,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            slots: vec![
                (Slot::Authentication, KeySpec::default()),
                (Slot::Signature, KeySpec::default()),
            ],
            sign: None,
        }
    }
}

impl SessionPlan {
    pub fn with_sign(mut self, sign: SignPlan) -> Self {
        self.sign = Some(sign);
        self
    }

    /// Key type the caller expects in `slot`
    fn expected_spec(&self, slot: Slot) -> Option<KeySpec> {
        self.slots
            .iter()
            .find(|(planned, _)| *planned == slot)
            .map(|(_, spec)| *spec)
    }
}

/// Steps completed so far, checked against cancellation before each new one
pub struct Progress {
    completed: Vec<Step>,
    cancel: CancelToken,
}

impl Progress {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            completed: Vec::new(),
            cancel,
        }
    }

    pub fn completed(&self) -> &[Step] {
        &self.completed
    }

    /// Run `op` as `step`, recording it on success
    ///
    /// # Errors
    ///
    /// Returns a failure naming `step` when `op` fails or the sequence was
    /// cancelled before it started
    pub fn run<T>(
        &mut self,
        step: Step,
        op: impl FnOnce() -> SessionResult<T>,
    ) -> Result<T, SessionFailure> {
        if self.cancel.is_cancelled() {
            return Err(self.fail(step, LinkError::Cancelled.into()));
        }
        debug!(%step, "step started");
        match op() {
            Ok(value) => {
                self.completed.push(step);
                Ok(value)
            }
            Err(error) => Err(self.fail(step, error)),
        }
    }

    pub fn fail(&self, step: Step, error: crate::error::SessionError) -> SessionFailure {
        SessionFailure::new(step, error, self.completed.clone())
    }

    fn into_steps(self) -> Vec<Step> {
        self.completed
    }
}

/// Drive the provisioning sequence on an open card session
///
/// `pending_requery` lists slots a previous session left indeterminate; they
/// are queried like any other slot and flagged in the report.
///
/// # Errors
///
/// Returns the first failing step with the steps completed before it
pub fn run_sequence<C: Connection>(
    card: &mut CardSession<C>,
    plan: &SessionPlan,
    pending_requery: &BTreeSet<Slot>,
    progress: Progress,
) -> Result<SessionReport, SessionFailure> {
    let result = drive(card, plan, pending_requery, progress);
    if let Err(failure) = &result {
        card.record_error(&failure.error);
    }
    result
}

fn drive<C: Connection>(
    card: &mut CardSession<C>,
    plan: &SessionPlan,
    pending_requery: &BTreeSet<Slot>,
    mut progress: Progress,
) -> Result<SessionReport, SessionFailure> {
    let device = card.piv().device();
    let (piv, credentials) = card.parts();

    progress.run(Step::VerifyPin, || piv.verify_pin(credentials.pin()?))?;
    progress.run(Step::AuthenticateManagement, || {
        piv.authenticate_management(credentials.management_key()?)
    })?;

    let mut actions = Vec::with_capacity(plan.slots.len());
    for (slot, spec) in &plan.slots {
        let slot = *slot;
        if pending_requery.contains(&slot) {
            info!(%slot, "re-querying slot left undefined by an earlier session");
        }
        let present = progress.run(Step::QuerySlot(slot), || piv.has_key(slot))?;
        let action = match decide(present, spec) {
            ProvisioningDecision::Reuse => {
                debug!(%slot, "reusing existing key");
                SlotAction::Reused
            }
            ProvisioningDecision::Generate(spec) => {
                progress.run(Step::GenerateKey(slot), || piv.generate_key(slot, &spec))?;
                SlotAction::Generated
            }
        };
        actions.push((slot, action));
    }

    let mut slots = Vec::with_capacity(actions.len());
    for (slot, action) in actions {
        let metadata = progress.run(Step::ReadSlotMetadata(slot), || piv.slot_metadata(slot))?;
        slots.push(SlotReport {
            slot,
            action,
            metadata,
            requeried_after_fault: pending_requery.contains(&slot),
        });
    }

    let signature = match &plan.sign {
        Some(sign) => {
            let known: Option<SlotMetadata> = slots
                .iter()
                .find(|report| report.slot == sign.slot)
                .map(|report| report.metadata.clone());
            let metadata = match known {
                Some(metadata) => metadata,
                None => progress.run(Step::ReadSlotMetadata(sign.slot), || {
                    piv.slot_metadata(sign.slot)
                })?,
            };
            if metadata.pin_policy == PinPolicy::Always {
                progress.run(Step::VerifyPinForSigning, || {
                    piv.verify_pin(credentials.pin()?)
                })?;
            }

            let key_type = plan
                .expected_spec(sign.slot)
                .map(|spec| spec.key_type)
                .unwrap_or_else(|| sign.algorithm.key_type());
            let request = SigningRequest {
                slot: sign.slot,
                key_type,
                message: sign.message.clone(),
                algorithm: sign.algorithm,
            };
            let signature = progress.run(Step::Sign(sign.slot), || piv.sign(&request))?;
            Some(SignatureReport {
                slot: sign.slot,
                signature,
            })
        }
        None => None,
    };

    let counters = progress.run(Step::ReadCounters, || {
        Ok(AttemptCounters {
            pin: piv.pin_metadata()?,
            puk: piv.puk_metadata()?,
            management_key: piv.management_key_metadata()?,
        })
    })?;

    let report = SessionReport {
        device,
        slots,
        counters,
        signature,
        steps: progress.into_steps(),
    };
    info!(
        serial = device.serial,
        generated = report.generated_slots().len(),
        "provisioning sequence completed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{CardProfile, Fault, VirtualCard, VirtualCardTransport, VirtualConnection};
    use crate::credentials::Credentials;
    use crate::error::{AuthError, PolicyError, SessionError};
    use crate::model::{KeyType, ManagementKeyAlgorithm, TouchPolicy};
    use crate::piv::PivSession;
    use crate::ports::CardTransport;
    use crate::protocol;

    const ALGORITHM: ManagementKeyAlgorithm = ManagementKeyAlgorithm::Aes192;

    fn factory_card() -> VirtualCard {
        VirtualCard::new(CardProfile::factory(ALGORITHM).unwrap())
    }

    fn card_session(card: &VirtualCard) -> CardSession<VirtualConnection> {
        let connection = VirtualCardTransport::new()
            .open(card.clone(), CancelToken::new())
            .unwrap();
        let piv = PivSession::open(connection).unwrap();
        CardSession::new(piv, Credentials::factory_defaults(ALGORITHM).unwrap())
    }

    fn run(card: &VirtualCard, plan: &SessionPlan) -> Result<SessionReport, SessionFailure> {
        let mut session = card_session(card);
        run_sequence(
            &mut session,
            plan,
            &BTreeSet::new(),
            Progress::new(CancelToken::new()),
        )
    }

    #[test]
    fn test_empty_card_generates_every_slot() {
        let card = factory_card();
        let plan = SessionPlan {
            slots: vec![
                (Slot::Authentication, KeySpec::new(KeyType::EccP256, PinPolicy::Once, TouchPolicy::Never)),
                (Slot::Signature, KeySpec::new(KeyType::Ed25519, PinPolicy::Always, TouchPolicy::Never)),
            ],
            sign: None,
        };

        let report = run(&card, &plan).unwrap();
        assert_eq!(report.generated_slots(), vec![Slot::Authentication, Slot::Signature]);
        let auth = report.slot(Slot::Authentication).unwrap();
        assert_eq!(auth.action, SlotAction::Generated);
        assert_eq!(auth.metadata.key_type, KeyType::EccP256);
        let sig = report.slot(Slot::Signature).unwrap();
        assert_eq!(sig.metadata.key_type, KeyType::Ed25519);
        assert_eq!(sig.metadata.pin_policy, PinPolicy::Always);
        assert!(report.counters.pin.default_value);
        assert_eq!(report.counters.pin.attempts_remaining, 3);
        assert_eq!(report.counters.management_key.algorithm, ALGORITHM);
    }

    #[test]
    fn test_provisioned_card_is_reused() {
        let card = factory_card()
            .with_key(Slot::Authentication, KeySpec::default())
            .with_key(Slot::Signature, KeySpec::default());
        let before = [
            card.public_key(Slot::Authentication),
            card.public_key(Slot::Signature),
        ];

        let report = run(&card, &SessionPlan::default()).unwrap();
        assert!(report.generated_slots().is_empty());
        assert_eq!(card.count_ins(protocol::INS_GENERATE_ASYMMETRIC), 0);
        assert_eq!(
            [
                report.slot(Slot::Authentication).map(|r| r.metadata.public_key.as_bytes().to_vec()),
                report.slot(Slot::Signature).map(|r| r.metadata.public_key.as_bytes().to_vec()),
            ],
            before
        );
    }

    #[test]
    fn test_existing_key_with_other_type_is_not_regenerated() {
        let card = factory_card().with_key(
            Slot::Authentication,
            KeySpec::new(KeyType::EccP384, PinPolicy::Once, TouchPolicy::Never),
        );
        let plan = SessionPlan {
            slots: vec![(Slot::Authentication, KeySpec::default())],
            sign: None,
        };
        let report = run(&card, &plan).unwrap();
        let slot = report.slot(Slot::Authentication).unwrap();
        assert_eq!(slot.action, SlotAction::Reused);
        assert_eq!(slot.metadata.key_type, KeyType::EccP384);
    }

    #[test]
    fn test_sign_with_pin_always_reverifies() {
        let card = factory_card();
        let plan = SessionPlan::default().with_sign(SignPlan {
            slot: Slot::Signature,
            algorithm: SignatureAlgorithm::EcdsaP256Sha3_256,
            message: b"payload".to_vec(),
        });

        let report = run(&card, &plan).unwrap();
        assert!(report.steps.contains(&Step::VerifyPinForSigning));
        let signed = report.signature.as_ref().unwrap();
        assert_eq!(signed.signature.algorithm(), SignatureAlgorithm::EcdsaP256Sha3_256);
        report
            .slot(Slot::Signature)
            .unwrap()
            .metadata
            .public_key
            .verify(b"payload", &signed.signature)
            .unwrap();
    }

    #[test]
    fn test_sign_key_type_mismatch_sends_no_signing_apdu() {
        let card = factory_card().with_key(Slot::Signature, KeySpec::default());
        let plan = SessionPlan {
            slots: vec![(Slot::Signature, KeySpec::new(KeyType::Ed25519, PinPolicy::Default, TouchPolicy::Default))],
            sign: Some(SignPlan {
                slot: Slot::Signature,
                algorithm: SignatureAlgorithm::Ed25519,
                message: b"data".to_vec(),
            }),
        };
        let mut session = card_session(&card);
        card.clear_log();

        let failure = run_sequence(
            &mut session,
            &plan,
            &BTreeSet::new(),
            Progress::new(CancelToken::new()),
        )
        .unwrap_err();
        assert_eq!(failure.failed_step, Step::Sign(Slot::Signature));
        assert!(matches!(
            failure.error,
            SessionError::Policy(PolicyError::KeyTypeMismatch { actual: KeyType::EccP256, .. })
        ));
        let signing_apdus = card
            .exchange_log()
            .iter()
            .filter(|c| c.ins == protocol::INS_GENERAL_AUTHENTICATE && c.p2 == Slot::Signature.key_reference())
            .count();
        assert_eq!(signing_apdus, 0);
        assert!(session.last_error().is_some());
    }

    #[test]
    fn test_link_loss_during_generation_reports_progress() {
        let card = factory_card();
        card.inject(Fault::DropAfter(protocol::INS_GENERATE_ASYMMETRIC));
        let failure = run(&card, &SessionPlan::default()).unwrap_err();

        assert_eq!(failure.failed_step, Step::GenerateKey(Slot::Authentication));
        assert!(failure.error.is_link_error());
        assert_eq!(failure.interrupted_generation(), Some(Slot::Authentication));
        assert!(failure.generated_slots().is_empty());
        assert_eq!(
            failure.completed,
            vec![
                Step::VerifyPin,
                Step::AuthenticateManagement,
                Step::QuerySlot(Slot::Authentication),
            ]
        );
    }

    #[test]
    fn test_missing_credentials_fail_without_verify() {
        let card = factory_card();
        let mut session = card_session(&card);
        session.set_credentials(Credentials::default());
        let failure = run_sequence(
            &mut session,
            &SessionPlan::default(),
            &BTreeSet::new(),
            Progress::new(CancelToken::new()),
        )
        .unwrap_err();
        assert_eq!(failure.failed_step, Step::VerifyPin);
        assert!(matches!(
            failure.error,
            SessionError::Auth(AuthError::MissingCredential { credential: "PIN" })
        ));
        assert_eq!(card.count_ins(protocol::INS_VERIFY), 0);
    }

    #[test]
    fn test_cancelled_before_start_sends_nothing() {
        let card = factory_card();
        let mut session = card_session(&card);
        card.clear_log();
        let cancel = CancelToken::new();
        cancel.cancel();

        let failure = run_sequence(
            &mut session,
            &SessionPlan::default(),
            &BTreeSet::new(),
            Progress::new(cancel),
        )
        .unwrap_err();
        assert_eq!(failure.failed_step, Step::VerifyPin);
        assert!(matches!(failure.error, SessionError::Link(LinkError::Cancelled)));
        assert!(card.exchange_log().is_empty());
    }
}
