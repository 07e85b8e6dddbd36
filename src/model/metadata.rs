//! Point-in-time metadata snapshots read from the card
//!
//! None of these are assumed fresh after a mutating operation; the session
//! re-reads them on demand.

use std::fmt;

use crate::model::{KeyType, ManagementKeyAlgorithm, PinPolicy, PublicKeyMaterial, TouchPolicy};

/// How the key in a slot came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    Generated,
    Imported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMetadata {
    pub key_type: KeyType,
    pub pin_policy: PinPolicy,
    pub touch_policy: TouchPolicy,
    pub origin: KeyOrigin,
    pub public_key: PublicKeyMaterial,
}

/// Attempt counters and default-value flag of a PIN or PUK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryMetadata {
    pub default_value: bool,
    pub total_attempts: u8,
    pub attempts_remaining: u8,
}

pub type PinMetadata = RetryMetadata;
pub type PukMetadata = RetryMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagementKeyMetadata {
    pub algorithm: ManagementKeyAlgorithm,
    pub default_value: bool,
    pub touch_policy: TouchPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity of the card read right after selecting the PIV application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: FirmwareVersion,
    pub serial: u32,
}

/// PIN, PUK and management key counters surfaced in the session result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptCounters {
    pub pin: PinMetadata,
    pub puk: PukMetadata,
    pub management_key: ManagementKeyMetadata,
}
