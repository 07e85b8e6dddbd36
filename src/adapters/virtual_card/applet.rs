//! In-process PIV applet backing the virtual card

use std::collections::HashMap;

use ed25519_dalek::Signer;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use rand::RngCore;
use tracing::{debug, info, warn};

use crate::model::{
    unpad, FirmwareVersion, KeyOrigin, KeySpec, KeyType, ManagementKey, PinPolicy, Slot,
    TouchPolicy,
};
use crate::piv::parse::{
    TAG_ALGORITHM, TAG_DEFAULT_VALUE, TAG_ORIGIN, TAG_POINT, TAG_POLICY, TAG_PUBLIC_KEY,
    TAG_PUBLIC_KEY_TEMPLATE, TAG_RETRIES,
};
use crate::piv::{process_block, Direction};
use crate::protocol::{self, tlv, Command, Response, StatusWord, TlvBuilder, TlvError};

const TAG_DYNAMIC_AUTH: u16 = 0x7C;
const TAG_WITNESS: u16 = 0x80;
const TAG_CHALLENGE: u16 = 0x81;
const TAG_RESPONSE: u16 = 0x82;

/// Credentials and identity a virtual card is personalized with
#[derive(Debug, Clone)]
pub struct CardProfile {
    pin: Vec<u8>,
    management_key: ManagementKey,
    pin_retries: u8,
    puk_retries: u8,
    defaults_in_use: bool,
    version: FirmwareVersion,
    serial: u32,
}

impl CardProfile {
    pub fn new(pin: &[u8], management_key: ManagementKey) -> Self {
        Self {
            pin: pin.to_vec(),
            management_key,
            pin_retries: 3,
            puk_retries: 3,
            defaults_in_use: false,
            version: FirmwareVersion {
                major: 5,
                minor: 7,
                patch: 1,
            },
            serial: 28_461_337,
        }
    }

    /// A card as shipped, still using the factory credentials
    #[cfg(any(test, feature = "factory-defaults"))]
    pub fn factory(
        algorithm: crate::model::ManagementKeyAlgorithm,
    ) -> Result<Self, crate::model::ManagementKeyError> {
        let mut profile = Self::new(
            crate::model::Pin::FACTORY_DEFAULT,
            ManagementKey::factory_default(algorithm)?,
        );
        profile.defaults_in_use = true;
        Ok(profile)
    }

    pub fn with_pin_retries(mut self, retries: u8) -> Self {
        self.pin_retries = retries;
        self
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = serial;
        self
    }
}

pub(crate) enum CardKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl CardKey {
    fn generate(key_type: KeyType) -> Self {
        let mut rng = rand::rng();
        match key_type {
            KeyType::EccP256 => loop {
                let mut scalar = [0u8; 32];
                rng.fill_bytes(&mut scalar);
                if let Ok(key) = p256::ecdsa::SigningKey::from_slice(&scalar) {
                    break CardKey::P256(key);
                }
            },
            KeyType::EccP384 => loop {
                let mut scalar = [0u8; 48];
                rng.fill_bytes(&mut scalar);
                if let Ok(key) = p384::ecdsa::SigningKey::from_slice(&scalar) {
                    break CardKey::P384(key);
                }
            },
            KeyType::Ed25519 => {
                let mut seed = [0u8; 32];
                rng.fill_bytes(&mut seed);
                CardKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed))
            }
        }
    }

    fn public_bytes(&self) -> Vec<u8> {
        match self {
            CardKey::P256(key) => key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            CardKey::P384(key) => key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            CardKey::Ed25519(key) => key.verifying_key().as_bytes().to_vec(),
        }
    }

    fn sign(&self, payload: &[u8]) -> Option<Vec<u8>> {
        match self {
            CardKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key.sign_prehash(payload).ok()?;
                Some(sig.to_der().as_bytes().to_vec())
            }
            CardKey::P384(key) => {
                let sig: p384::ecdsa::Signature = key.sign_prehash(payload).ok()?;
                Some(sig.to_der().as_bytes().to_vec())
            }
            CardKey::Ed25519(key) => Some(key.sign(payload).to_bytes().to_vec()),
        }
    }
}

pub(crate) struct SlotKey {
    key: CardKey,
    key_type: KeyType,
    pin_policy: PinPolicy,
    touch_policy: TouchPolicy,
    origin: KeyOrigin,
}

impl SlotKey {
    pub(crate) fn public_bytes(&self) -> Vec<u8> {
        self.key.public_bytes()
    }
}

/// What the card does when a slot needs touch
pub(crate) enum TouchGate {
    Confirmed,
    Ignored,
}

/// Card response plus whether the card sat waiting for touch before giving it
pub(crate) struct Reply {
    pub response: Response,
    pub awaited_touch: bool,
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            awaited_touch: false,
        }
    }
}

fn status(sw: StatusWord) -> Reply {
    Response::status(sw).into()
}

fn respond(body: Result<Vec<u8>, TlvError>) -> Reply {
    match body {
        Ok(body) => Response::success(body).into(),
        Err(err) => {
            warn!(%err, "virtual card: response does not fit");
            status(StatusWord::WRONG_LENGTH)
        }
    }
}

/// Policies the card applies when a key is generated with `Default`
fn resolve(slot: Slot, spec: &KeySpec) -> (PinPolicy, TouchPolicy) {
    let pin_policy = match (spec.pin_policy, slot) {
        (PinPolicy::Default, Slot::Signature) => PinPolicy::Always,
        (PinPolicy::Default, Slot::CardAuthentication) => PinPolicy::Never,
        (PinPolicy::Default, _) => PinPolicy::Once,
        (explicit, _) => explicit,
    };
    let touch_policy = match spec.touch_policy {
        TouchPolicy::Default => TouchPolicy::Never,
        explicit => explicit,
    };
    (pin_policy, touch_policy)
}

pub(crate) struct PivApplet {
    profile: CardProfile,
    pin_remaining: u8,
    puk_remaining: u8,
    selected: bool,
    pin_verified: bool,
    /// VERIFY succeeded and no private-key operation has consumed it yet
    pin_fresh: bool,
    management_authenticated: bool,
    pending_witness: Option<Vec<u8>>,
    chain_buffer: Vec<u8>,
    slots: HashMap<Slot, SlotKey>,
}

impl PivApplet {
    pub(crate) fn new(profile: CardProfile) -> Self {
        Self {
            pin_remaining: profile.pin_retries,
            puk_remaining: profile.puk_retries,
            profile,
            selected: false,
            pin_verified: false,
            pin_fresh: false,
            management_authenticated: false,
            pending_witness: None,
            chain_buffer: Vec::new(),
            slots: HashMap::new(),
        }
    }

    pub(crate) fn install_key(&mut self, slot: Slot, spec: &KeySpec, origin: KeyOrigin) {
        let (pin_policy, touch_policy) = resolve(slot, spec);
        self.slots.insert(
            slot,
            SlotKey {
                key: CardKey::generate(spec.key_type),
                key_type: spec.key_type,
                pin_policy,
                touch_policy,
                origin,
            },
        );
    }

    pub(crate) fn slot(&self, slot: Slot) -> Option<&SlotKey> {
        self.slots.get(&slot)
    }

    pub(crate) fn pin_remaining(&self) -> u8 {
        self.pin_remaining
    }

    /// Field loss resets the volatile security state
    pub(crate) fn power_cycle(&mut self) {
        self.selected = false;
        self.pin_verified = false;
        self.pin_fresh = false;
        self.management_authenticated = false;
        self.pending_witness = None;
        self.chain_buffer.clear();
    }

    pub(crate) fn process(&mut self, command: &Command, touch: TouchGate) -> Reply {
        if command.is_chained() {
            self.chain_buffer.extend_from_slice(&command.data);
            return status(StatusWord::SUCCESS);
        }
        let mut command = command.clone();
        if !self.chain_buffer.is_empty() {
            let mut data = std::mem::take(&mut self.chain_buffer);
            data.extend_from_slice(&command.data);
            command.data = data;
        }

        if command.ins == protocol::INS_SELECT {
            return self.select(&command);
        }
        if !self.selected {
            return status(StatusWord::INS_NOT_SUPPORTED);
        }

        match command.ins {
            protocol::INS_VERIFY => self.verify(&command),
            protocol::INS_GENERAL_AUTHENTICATE if command.p2 == protocol::REF_MANAGEMENT_KEY => {
                self.authenticate_management(&command)
            }
            protocol::INS_GENERAL_AUTHENTICATE => self.sign(&command, touch),
            protocol::INS_GENERATE_ASYMMETRIC => self.generate(&command),
            protocol::INS_GET_METADATA => self.metadata(&command),
            protocol::INS_GET_VERSION => {
                let v = self.profile.version;
                Response::success(vec![v.major, v.minor, v.patch]).into()
            }
            protocol::INS_GET_SERIAL => {
                Response::success(self.profile.serial.to_be_bytes().to_vec()).into()
            }
            _ => status(StatusWord::INS_NOT_SUPPORTED),
        }
    }

    fn select(&mut self, command: &Command) -> Reply {
        if command.p1 != 0x04 || !command.data.starts_with(&protocol::PIV_AID) {
            return status(StatusWord::FILE_NOT_FOUND);
        }
        self.power_cycle();
        self.selected = true;
        respond(
            TlvBuilder::new()
                .push(0x4F, &[0x00, 0x00, 0x10, 0x00, 0x01, 0x00])
                .nest(0x79, TlvBuilder::new().push(0x4F, &protocol::PIV_AID))
                .wrap(0x61),
        )
    }

    fn verify(&mut self, command: &Command) -> Reply {
        if command.p1 != 0x00 || command.p2 != protocol::REF_PIN {
            return status(StatusWord::INCORRECT_P1_P2);
        }
        if command.data.is_empty() {
            return match (self.pin_verified, self.pin_remaining) {
                (true, _) => status(StatusWord::SUCCESS),
                (false, 0) => status(StatusWord::AUTH_METHOD_BLOCKED),
                (false, remaining) => status(StatusWord::counter_warning(remaining)),
            };
        }
        if command.data.len() != 8 {
            return status(StatusWord::WRONG_DATA);
        }
        if self.pin_remaining == 0 {
            return status(StatusWord::AUTH_METHOD_BLOCKED);
        }

        if unpad(&command.data) == self.profile.pin.as_slice() {
            self.pin_remaining = self.profile.pin_retries;
            self.pin_verified = true;
            self.pin_fresh = true;
            info!("virtual card: PIN verified");
            status(StatusWord::SUCCESS)
        } else {
            self.pin_remaining -= 1;
            self.pin_verified = false;
            self.pin_fresh = false;
            warn!(remaining = self.pin_remaining, "virtual card: wrong PIN");
            status(StatusWord::counter_warning(self.pin_remaining))
        }
    }

    fn authenticate_management(&mut self, command: &Command) -> Reply {
        let key = &self.profile.management_key;
        if command.p1 != key.algorithm().algorithm_id() {
            return status(StatusWord::INCORRECT_P1_P2);
        }
        let Ok(Some(template)) = tlv::find(&command.data, TAG_DYNAMIC_AUTH) else {
            return status(StatusWord::WRONG_DATA);
        };
        let witness = tlv::find(template, TAG_WITNESS).ok().flatten();
        let challenge = tlv::find(template, TAG_CHALLENGE).ok().flatten();

        match (witness, challenge) {
            (Some(witness), None) if witness.is_empty() => {
                let mut plain = vec![0u8; key.algorithm().block_size()];
                rand::rng().fill_bytes(&mut plain);
                let Some(encrypted) = process_block(key, &plain, Direction::Encrypt) else {
                    return status(StatusWord::CONDITIONS_NOT_SATISFIED);
                };
                self.pending_witness = Some(plain);
                respond(
                    TlvBuilder::new()
                        .push(TAG_WITNESS, &encrypted)
                        .wrap(TAG_DYNAMIC_AUTH),
                )
            }
            (Some(witness), Some(challenge)) => {
                let Some(expected) = self.pending_witness.take() else {
                    return status(StatusWord::CONDITIONS_NOT_SATISFIED);
                };
                if witness != expected.as_slice() {
                    warn!("virtual card: management key rejected");
                    self.management_authenticated = false;
                    return status(StatusWord::SECURITY_STATUS_NOT_SATISFIED);
                }
                let Some(answer) = process_block(key, challenge, Direction::Encrypt) else {
                    return status(StatusWord::WRONG_DATA);
                };
                self.management_authenticated = true;
                debug!("virtual card: management key authenticated");
                respond(
                    TlvBuilder::new()
                        .push(TAG_RESPONSE, &answer)
                        .wrap(TAG_DYNAMIC_AUTH),
                )
            }
            _ => status(StatusWord::WRONG_DATA),
        }
    }

    fn sign(&mut self, command: &Command, touch: TouchGate) -> Reply {
        let Ok(slot) = Slot::from_key_reference(command.p2) else {
            return status(StatusWord::INCORRECT_P1_P2);
        };
        let Some(entry) = self.slots.get(&slot) else {
            return status(StatusWord::REFERENCED_DATA_NOT_FOUND);
        };
        if command.p1 != entry.key_type.algorithm_id() {
            return status(StatusWord::WRONG_DATA);
        }

        let pin_ok = match entry.pin_policy {
            PinPolicy::Never => true,
            PinPolicy::Always => self.pin_verified && self.pin_fresh,
            PinPolicy::Once | PinPolicy::Default => self.pin_verified,
        };
        if !pin_ok {
            return status(StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        self.pin_fresh = false;

        let Ok(Some(template)) = tlv::find(&command.data, TAG_DYNAMIC_AUTH) else {
            return status(StatusWord::WRONG_DATA);
        };
        let (Ok(Some(marker)), Ok(Some(payload))) = (
            tlv::find(template, TAG_RESPONSE),
            tlv::find(template, TAG_CHALLENGE),
        ) else {
            return status(StatusWord::WRONG_DATA);
        };
        if !marker.is_empty() {
            return status(StatusWord::WRONG_DATA);
        }

        if entry.touch_policy.requires_touch() {
            if let TouchGate::Ignored = touch {
                warn!(%slot, "virtual card: touch timed out");
                return Reply {
                    response: Response::status(StatusWord::CONDITIONS_NOT_SATISFIED),
                    awaited_touch: true,
                };
            }
        }

        match entry.key.sign(payload) {
            Some(signature) => Reply {
                awaited_touch: entry.touch_policy.requires_touch(),
                ..respond(
                    TlvBuilder::new()
                        .push(TAG_RESPONSE, &signature)
                        .wrap(TAG_DYNAMIC_AUTH),
                )
            },
            None => status(StatusWord::WRONG_DATA),
        }
    }

    fn generate(&mut self, command: &Command) -> Reply {
        if !self.management_authenticated {
            return status(StatusWord::SECURITY_STATUS_NOT_SATISFIED);
        }
        let Ok(slot) = Slot::from_key_reference(command.p2) else {
            return status(StatusWord::INCORRECT_P1_P2);
        };
        let Ok(Some(template)) = tlv::find(&command.data, 0xAC) else {
            return status(StatusWord::WRONG_DATA);
        };
        let Ok(Some(&[algorithm])) = tlv::find(template, 0x80) else {
            return status(StatusWord::WRONG_DATA);
        };
        let Ok(key_type) = KeyType::from_algorithm_id(algorithm) else {
            return status(StatusWord::WRONG_DATA);
        };
        let pin_policy = match tlv::find(template, 0xAA) {
            Ok(Some(&[byte])) => PinPolicy::from_byte(byte).ok(),
            Ok(None) => Some(PinPolicy::Default),
            _ => None,
        };
        let touch_policy = match tlv::find(template, 0xAB) {
            Ok(Some(&[byte])) => TouchPolicy::from_byte(byte).ok(),
            Ok(None) => Some(TouchPolicy::Default),
            _ => None,
        };
        let (Some(pin_policy), Some(touch_policy)) = (pin_policy, touch_policy) else {
            return status(StatusWord::WRONG_DATA);
        };

        let spec = KeySpec::new(key_type, pin_policy, touch_policy);
        self.install_key(slot, &spec, KeyOrigin::Generated);
        let Some(entry) = self.slots.get(&slot) else {
            return status(StatusWord::CONDITIONS_NOT_SATISFIED);
        };
        info!(%slot, %key_type, "virtual card: key generated");
        respond(
            TlvBuilder::new()
                .push(TAG_POINT, &entry.public_bytes())
                .wrap(TAG_PUBLIC_KEY_TEMPLATE),
        )
    }

    fn metadata(&self, command: &Command) -> Reply {
        match command.p2 {
            protocol::REF_PIN => self.retry_metadata(self.profile.pin_retries, self.pin_remaining),
            protocol::REF_PUK => self.retry_metadata(self.profile.puk_retries, self.puk_remaining),
            protocol::REF_MANAGEMENT_KEY => {
                respond(
                    TlvBuilder::new()
                        .push(
                            TAG_ALGORITHM,
                            &[self.profile.management_key.algorithm().algorithm_id()],
                        )
                        .push(TAG_POLICY, &[0x00, TouchPolicy::Never.to_byte()])
                        .push(TAG_DEFAULT_VALUE, &[u8::from(self.profile.defaults_in_use)])
                        .build(),
                )
            }
            reference => {
                let Ok(slot) = Slot::from_key_reference(reference) else {
                    return status(StatusWord::REFERENCED_DATA_NOT_FOUND);
                };
                let Some(entry) = self.slots.get(&slot) else {
                    return status(StatusWord::REFERENCED_DATA_NOT_FOUND);
                };
                let origin = match entry.origin {
                    KeyOrigin::Generated => 0x01,
                    KeyOrigin::Imported => 0x02,
                };
                respond(
                    TlvBuilder::new()
                        .push(TAG_ALGORITHM, &[entry.key_type.algorithm_id()])
                        .push(
                            TAG_POLICY,
                            &[entry.pin_policy.to_byte(), entry.touch_policy.to_byte()],
                        )
                        .push(TAG_ORIGIN, &[origin])
                        .nest(
                            TAG_PUBLIC_KEY,
                            TlvBuilder::new().push(TAG_POINT, &entry.public_bytes()),
                        )
                        .build(),
                )
            }
        }
    }

    fn retry_metadata(&self, total: u8, remaining: u8) -> Reply {
        respond(
            TlvBuilder::new()
                .push(TAG_DEFAULT_VALUE, &[u8::from(self.profile.defaults_in_use)])
                .push(TAG_RETRIES, &[total, remaining])
                .build(),
        )
    }
}
