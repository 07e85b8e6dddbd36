//! PIV session state machine bound to one card connection

use std::collections::HashMap;

use rand::RngCore;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use super::mgmt_cipher::{process_block, Direction};
use super::parse;
use super::SessionState;
use crate::error::{
    AuthError, KeyManagementError, LinkError, PolicyError, ProtocolError, SessionError,
    SessionResult,
};
use crate::model::{
    DeviceInfo, FirmwareVersion, KeySpec, KeyType, ManagementKey, ManagementKeyMetadata, Pin,
    PinMetadata, PinPolicy, PukMetadata, PublicKeyMaterial, Signature, SignatureAlgorithm, Slot,
    SlotMetadata, TouchPolicy,
};
use crate::ports::Connection;
use crate::protocol::{self, tlv, Command, Response, StatusWord, TlvBuilder};

const TAG_DYNAMIC_AUTH: u16 = 0x7C;
const TAG_WITNESS: u16 = 0x80;
const TAG_CHALLENGE: u16 = 0x81;
const TAG_RESPONSE: u16 = 0x82;

const TAG_GENERATE_TEMPLATE: u16 = 0xAC;
const TAG_GENERATE_ALGORITHM: u16 = 0x80;
const TAG_GENERATE_PIN_POLICY: u16 = 0xAA;
const TAG_GENERATE_TOUCH_POLICY: u16 = 0xAB;

/// Largest signing payload the card accepts in one GENERAL AUTHENTICATE
///
/// ECDSA payloads are digests; Ed25519 signs the raw message, so this bounds
/// Ed25519 messages.
pub const MAX_SIGN_PAYLOAD: usize = 16 * 1024;

/// A request to sign `message` with the key in `slot`
///
/// `key_type` is what the caller believes the slot holds; the session refuses
/// to sign when the card reports otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub slot: Slot,
    pub key_type: KeyType,
    pub message: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
}

/// Stateful PIV session over one connection
///
/// Every operation is a strict request/response exchange. A link failure
/// releases the connection and moves the session to `Faulted`; nothing is
/// sent afterwards.
pub struct PivSession<C: Connection> {
    connection: Option<C>,
    state: SessionState,
    device: DeviceInfo,
    pin_locked: bool,
    /// Key type and policies learned from the card during this session
    known_slots: HashMap<Slot, KeySpec>,
}

impl<C: Connection> PivSession<C> {
    /// Select the PIV application and identify the card
    ///
    /// # Errors
    ///
    /// Returns a link error if the card disappears, or a protocol error if
    /// the card has no PIV application.
    pub fn open(connection: C) -> SessionResult<Self> {
        let mut session = Self {
            connection: Some(connection),
            state: SessionState::Unauthenticated,
            device: DeviceInfo {
                version: FirmwareVersion {
                    major: 0,
                    minor: 0,
                    patch: 0,
                },
                serial: 0,
            },
            pin_locked: false,
            known_slots: HashMap::new(),
        };
        if let Err(err) = session.identify() {
            session.close();
            return Err(err);
        }
        Ok(session)
    }

    fn identify(&mut self) -> SessionResult<()> {
        let select = Command::new(protocol::INS_SELECT, 0x04, 0x00)
            .with_data(protocol::PIV_AID.to_vec())
            .with_le(0);
        self.expect_success("select PIV", &select)?;

        let version = self.expect_success(
            "get version",
            &Command::new(protocol::INS_GET_VERSION, 0, 0).with_le(0),
        )?;
        let serial = self.expect_success(
            "get serial",
            &Command::new(protocol::INS_GET_SERIAL, 0, 0).with_le(0),
        )?;
        self.device = DeviceInfo {
            version: parse::version(&version.data)?,
            serial: parse::serial(&serial.data)?,
        };

        info!(
            serial = self.device.serial,
            version = %self.device.version,
            "PIV application selected"
        );
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> DeviceInfo {
        self.device
    }

    /// Whether a `PinLocked` result was observed in this session
    pub fn is_pin_locked(&self) -> bool {
        self.pin_locked
    }

    /// Verify the user PIN
    ///
    /// # Errors
    ///
    /// - `WrongPin` with the remaining attempts when the card rejects the PIN
    /// - `PinLocked` once no attempts remain; later calls fail the same way
    ///   without contacting the card
    pub fn verify_pin(&mut self, pin: &Pin) -> SessionResult<()> {
        if self.pin_locked {
            return Err(AuthError::PinLocked.into());
        }
        self.ensure_live("verify PIN")?;

        let mut command = Command::new(protocol::INS_VERIFY, 0x00, protocol::REF_PIN)
            .with_data(pin.to_padded().to_vec());
        let response = self.transmit(&command);
        command.data.zeroize();
        let response = response?;

        if response.sw.is_success() {
            self.set_state(self.state.with_pin_verified());
            info!("PIN verified");
            return Ok(());
        }

        self.set_state(self.state.without_pin());
        match response.sw.counter() {
            Some(0) => self.lock_pin(),
            Some(attempts_remaining) => {
                warn!(attempts_remaining, "PIN rejected");
                Err(AuthError::WrongPin { attempts_remaining }.into())
            }
            None if response.sw == StatusWord::AUTH_METHOD_BLOCKED => self.lock_pin(),
            None => Err(unexpected("verify PIN", response.sw)),
        }
    }

    fn lock_pin(&mut self) -> SessionResult<()> {
        warn!("PIN is locked");
        self.pin_locked = true;
        Err(AuthError::PinLocked.into())
    }

    /// Remaining PIN attempts, read without consuming one
    pub fn pin_attempts(&mut self) -> SessionResult<u8> {
        self.ensure_live("read PIN attempts")?;
        let command = Command::new(protocol::INS_VERIFY, 0x00, protocol::REF_PIN);
        let response = self.transmit(&command)?;
        match response.sw.counter() {
            Some(remaining) => Ok(remaining),
            None if response.sw == StatusWord::AUTH_METHOD_BLOCKED => Ok(0),
            // Already verified; the card does not report the counter then
            None if response.sw.is_success() => Ok(self.pin_metadata()?.attempts_remaining),
            None => Err(unexpected("read PIN attempts", response.sw)),
        }
    }

    /// Mutual challenge/response with the management key (reference 9B)
    ///
    /// # Errors
    ///
    /// - `WrongManagementKey` if either side fails to prove the key
    /// - `AuthenticationAborted` if the link drops mid-handshake; the session
    ///   is `Faulted` afterwards
    pub fn authenticate_management(&mut self, key: &ManagementKey) -> SessionResult<()> {
        self.ensure_live("authenticate management key")?;
        let algorithm = key.algorithm();
        let block_size = algorithm.block_size();
        let p1 = algorithm.algorithm_id();

        let request_witness = Command::new(
            protocol::INS_GENERAL_AUTHENTICATE,
            p1,
            protocol::REF_MANAGEMENT_KEY,
        )
        .with_data(TlvBuilder::new().push(TAG_WITNESS, &[]).wrap(TAG_DYNAMIC_AUTH)?)
        .with_le(0);
        let response = self.handshake_step(&request_witness)?;
        match response.sw {
            sw if sw.is_success() => {}
            // Algorithm does not match the key configured on the card
            StatusWord::WRONG_DATA | StatusWord::INCORRECT_P1_P2 => {
                return self.reject_management_key();
            }
            sw => return Err(unexpected("authenticate management key", sw)),
        }

        let witness = tlv::require(tlv::require(&response.data, TAG_DYNAMIC_AUTH)?, TAG_WITNESS)?;
        let decrypted_witness = process_block(key, witness, Direction::Decrypt).ok_or_else(|| {
            ProtocolError::MalformedResponse {
                operation: "management witness",
                reason: format!("expected {} bytes, got {}", block_size, witness.len()),
            }
        })?;

        let mut challenge = vec![0u8; block_size];
        rand::rng().fill_bytes(&mut challenge);

        let answer = Command::new(
            protocol::INS_GENERAL_AUTHENTICATE,
            p1,
            protocol::REF_MANAGEMENT_KEY,
        )
        .with_data(
            TlvBuilder::new()
                .push(TAG_WITNESS, &decrypted_witness)
                .push(TAG_CHALLENGE, &challenge)
                .wrap(TAG_DYNAMIC_AUTH)?,
        )
        .with_le(0);
        let response = self.handshake_step(&answer)?;
        match response.sw {
            sw if sw.is_success() => {}
            StatusWord::SECURITY_STATUS_NOT_SATISFIED => return self.reject_management_key(),
            sw => return Err(unexpected("authenticate management key", sw)),
        }

        let card_answer =
            tlv::require(tlv::require(&response.data, TAG_DYNAMIC_AUTH)?, TAG_RESPONSE)?;
        let expected = process_block(key, &challenge, Direction::Encrypt);
        if expected.as_deref() != Some(card_answer) {
            warn!("card failed to prove the management key");
            return self.reject_management_key();
        }

        self.set_state(self.state.with_management());
        info!(?algorithm, "management key authenticated");
        Ok(())
    }

    fn handshake_step(&mut self, command: &Command) -> SessionResult<Response> {
        match self.transmit(command) {
            Err(SessionError::Link(err)) => Err(AuthError::AuthenticationAborted {
                reason: err.to_string(),
            }
            .into()),
            other => other,
        }
    }

    fn reject_management_key(&mut self) -> SessionResult<()> {
        warn!("management key rejected");
        self.set_state(self.state.without_management());
        Err(AuthError::WrongManagementKey.into())
    }

    /// Whether `slot` currently holds a key
    ///
    /// An empty slot is an expected outcome and returns `false`; any other
    /// rejection is a protocol error.
    pub fn has_key(&mut self, slot: Slot) -> SessionResult<bool> {
        self.require_management("query slot")?;
        match self.read_slot_metadata(slot) {
            Ok(_) => Ok(true),
            Err(SessionError::KeyManagement(KeyManagementError::NoKeyInSlot { .. })) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Generate a key pair in `slot`, irreversibly replacing any existing key
    ///
    /// # Errors
    ///
    /// - `SlotGenerationRejected` when the card refuses the request
    /// - a link error when the connection drops; the slot state is then
    ///   unknown and must be queried again in a fresh session
    pub fn generate_key(
        &mut self,
        slot: Slot,
        spec: &KeySpec,
    ) -> SessionResult<PublicKeyMaterial> {
        self.require_ready("generate key")?;

        let mut template =
            TlvBuilder::new().push(TAG_GENERATE_ALGORITHM, &[spec.key_type.algorithm_id()]);
        if spec.pin_policy != PinPolicy::Default {
            template = template.push(TAG_GENERATE_PIN_POLICY, &[spec.pin_policy.to_byte()]);
        }
        if spec.touch_policy != TouchPolicy::Default {
            template = template.push(TAG_GENERATE_TOUCH_POLICY, &[spec.touch_policy.to_byte()]);
        }
        let command = Command::new(protocol::INS_GENERATE_ASYMMETRIC, 0x00, slot.key_reference())
            .with_data(template.wrap(TAG_GENERATE_TEMPLATE)?)
            .with_le(0);

        // The old key is gone or about to be; forget what we knew about it
        self.known_slots.remove(&slot);
        let response = self.transmit(&command)?;
        if !response.sw.is_success() {
            warn!(%slot, sw = %response.sw, "key generation rejected");
            return Err(KeyManagementError::SlotGenerationRejected {
                slot,
                reason: format!("status {}", response.sw),
            }
            .into());
        }

        let public_key = parse::generated_public_key(spec.key_type, &response.data)?;
        info!(%slot, key_type = %spec.key_type, "key generated");
        Ok(public_key)
    }

    /// Read the key type, policies and public key of `slot`
    ///
    /// # Errors
    ///
    /// Returns `NoKeyInSlot` if the slot is empty
    pub fn slot_metadata(&mut self, slot: Slot) -> SessionResult<SlotMetadata> {
        self.require_ready("read slot metadata")?;
        self.read_slot_metadata(slot)
    }

    fn read_slot_metadata(&mut self, slot: Slot) -> SessionResult<SlotMetadata> {
        let command =
            Command::new(protocol::INS_GET_METADATA, 0x00, slot.key_reference()).with_le(0);
        let response = self.transmit(&command)?;
        if response.sw == StatusWord::REFERENCED_DATA_NOT_FOUND {
            debug!(%slot, "slot is empty");
            self.known_slots.remove(&slot);
            return Err(KeyManagementError::NoKeyInSlot { slot }.into());
        }
        if !response.sw.is_success() {
            return Err(unexpected("read slot metadata", response.sw));
        }
        let metadata = parse::slot_metadata(&response.data)?;
        self.known_slots.insert(
            slot,
            KeySpec::new(metadata.key_type, metadata.pin_policy, metadata.touch_policy),
        );
        Ok(metadata)
    }

    /// Sign with the key in `request.slot`
    ///
    /// The algorithm and the slot's key type are checked before any signing
    /// APDU is sent. If the slot's key type was already learned in this
    /// session, a mismatch is detected without contacting the card.
    ///
    /// # Errors
    ///
    /// - `UnsupportedAlgorithm` when the algorithm does not fit `key_type`
    /// - `MessageTooLong` when the payload exceeds [`MAX_SIGN_PAYLOAD`]
    /// - `KeyTypeMismatch` when the slot holds a different key type
    /// - `TouchTimeout` when the slot requires touch and none came; the session
    ///   stays usable
    /// - `PinRequired` when the slot's PIN policy demands a fresh VERIFY
    pub fn sign(&mut self, request: &SigningRequest) -> SessionResult<Signature> {
        self.require_ready("sign")?;
        let slot = request.slot;
        let algorithm = request.algorithm;

        if algorithm.key_type() != request.key_type {
            return Err(PolicyError::UnsupportedAlgorithm {
                algorithm,
                key_type: request.key_type,
            }
            .into());
        }

        let payload = algorithm.prepare(&request.message);
        if payload.len() > MAX_SIGN_PAYLOAD {
            warn!(%slot, len = payload.len(), "signing payload too long");
            return Err(PolicyError::MessageTooLong {
                algorithm,
                len: payload.len(),
                max: MAX_SIGN_PAYLOAD,
            }
            .into());
        }

        let known = match self.known_slots.get(&slot).copied() {
            Some(spec) => spec,
            None => {
                let metadata = self.read_slot_metadata(slot)?;
                KeySpec::new(metadata.key_type, metadata.pin_policy, metadata.touch_policy)
            }
        };
        if known.key_type != request.key_type {
            return Err(PolicyError::KeyTypeMismatch {
                slot,
                requested: request.key_type,
                actual: known.key_type,
            }
            .into());
        }

        let command = Command::new(
            protocol::INS_GENERAL_AUTHENTICATE,
            request.key_type.algorithm_id(),
            slot.key_reference(),
        )
        .with_data(
            TlvBuilder::new()
                .push(TAG_RESPONSE, &[])
                .push(TAG_CHALLENGE, &payload)
                .wrap(TAG_DYNAMIC_AUTH)?,
        )
        .with_le(0);

        if known.touch_policy.requires_touch() {
            info!(%slot, "waiting for touch");
        }
        let response = self.transmit(&command)?;
        match response.sw {
            sw if sw.is_success() => {}
            StatusWord::SECURITY_STATUS_NOT_SATISFIED => {
                return Err(AuthError::PinRequired { slot }.into());
            }
            StatusWord::CONDITIONS_NOT_SATISFIED if known.touch_policy.requires_touch() => {
                warn!(%slot, "touch not confirmed");
                return Err(SessionError::TouchTimeout { slot });
            }
            sw => return Err(unexpected("sign", sw)),
        }

        let signature =
            tlv::require(tlv::require(&response.data, TAG_DYNAMIC_AUTH)?, TAG_RESPONSE)?;
        info!(%slot, %algorithm, "signed");
        Ok(Signature::new(signature.to_vec(), algorithm))
    }

    pub fn pin_metadata(&mut self) -> SessionResult<PinMetadata> {
        self.retry_metadata("read PIN metadata", protocol::REF_PIN)
    }

    pub fn puk_metadata(&mut self) -> SessionResult<PukMetadata> {
        self.retry_metadata("read PUK metadata", protocol::REF_PUK)
    }

    fn retry_metadata(
        &mut self,
        operation: &'static str,
        reference: u8,
    ) -> SessionResult<PinMetadata> {
        self.ensure_live(operation)?;
        let response = self.expect_success(
            operation,
            &Command::new(protocol::INS_GET_METADATA, 0x00, reference).with_le(0),
        )?;
        parse::retry_metadata(&response.data)
    }

    pub fn management_key_metadata(&mut self) -> SessionResult<ManagementKeyMetadata> {
        const OP: &str = "read management key metadata";
        self.ensure_live(OP)?;
        let response = self.expect_success(
            OP,
            &Command::new(protocol::INS_GET_METADATA, 0x00, protocol::REF_MANAGEMENT_KEY)
                .with_le(0),
        )?;
        parse::management_key_metadata(&response.data)
    }

    /// Release the connection; safe to call in any state
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        if self.state != SessionState::Closed {
            self.set_state(SessionState::Closed);
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if next != self.state {
            debug!(from = %self.state, to = %next, "session state");
            self.state = next;
        }
    }

    fn ensure_live(&self, operation: &'static str) -> SessionResult<()> {
        if self.state.is_live() {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn require_management(&self, operation: &'static str) -> SessionResult<()> {
        if self.state.management_authenticated() {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn require_ready(&self, operation: &'static str) -> SessionResult<()> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn expect_success(
        &mut self,
        operation: &'static str,
        command: &Command,
    ) -> SessionResult<Response> {
        let response = self.transmit(command)?;
        if response.sw.is_success() {
            Ok(response)
        } else {
            Err(unexpected(operation, response.sw))
        }
    }

    /// Exchange one command; a link failure faults the session
    fn transmit(&mut self, command: &Command) -> SessionResult<Response> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(LinkError::Lost {
                reason: "connection already released".to_string(),
            }
            .into());
        };
        let result = protocol::transceive(|apdu| connection.exchange(apdu), command);
        if let Err(SessionError::Link(err)) = &result {
            warn!(error = %err, "link failure, session faulted");
            if let Some(mut connection) = self.connection.take() {
                connection.close();
            }
            self.set_state(SessionState::Faulted);
        }
        result
    }
}

fn unexpected(operation: &'static str, sw: StatusWord) -> SessionError {
    ProtocolError::UnexpectedStatus { operation, sw }.into()
}
