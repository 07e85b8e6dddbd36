use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// PIV key slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Slot {
    Authentication,
    Signature,
    KeyManagement,
    CardAuthentication,
}

impl Slot {
    pub const ALL: [Slot; 4] = [
        Slot::Authentication,
        Slot::Signature,
        Slot::KeyManagement,
        Slot::CardAuthentication,
    ];

    pub fn default_signing() -> Self {
        Self::Signature
    }

    /// Key reference used as P2 in GENERATE, GENERAL AUTHENTICATE and GET METADATA
    pub const fn key_reference(self) -> u8 {
        match self {
            Slot::Authentication => 0x9A,
            Slot::Signature => 0x9C,
            Slot::KeyManagement => 0x9D,
            Slot::CardAuthentication => 0x9E,
        }
    }

    pub fn from_key_reference(reference: u8) -> Result<Self, SlotError> {
        match reference {
            0x9A => Ok(Slot::Authentication),
            0x9C => Ok(Slot::Signature),
            0x9D => Ok(Slot::KeyManagement),
            0x9E => Ok(Slot::CardAuthentication),
            _ => Err(SlotError::Unsupported {
                slot: format!("{:02X}", reference),
            }),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Slot::Authentication => "authentication",
            Slot::Signature => "signature",
            Slot::KeyManagement => "key-management",
            Slot::CardAuthentication => "card-authentication",
        };
        write!(f, "{} ({:02X})", name, self.key_reference())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("Slot not supported: {slot}")]
    Unsupported { slot: String },
}
