use serde::{Deserialize, Serialize};
use thiserror::Error;

/// When the card demands the PIN before using a slot's private key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinPolicy {
    /// Let the card apply its per-slot default
    #[default]
    Default,
    Never,
    Once,
    Always,
}

impl PinPolicy {
    pub const fn to_byte(self) -> u8 {
        match self {
            PinPolicy::Default => 0x00,
            PinPolicy::Never => 0x01,
            PinPolicy::Once => 0x02,
            PinPolicy::Always => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, PolicyParseError> {
        match byte {
            0x00 => Ok(PinPolicy::Default),
            0x01 => Ok(PinPolicy::Never),
            0x02 => Ok(PinPolicy::Once),
            0x03 => Ok(PinPolicy::Always),
            other => Err(PolicyParseError::UnsupportedPinPolicy { policy: other }),
        }
    }
}

/// Whether the card requires physical touch before a private-key operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TouchPolicy {
    #[default]
    Default,
    Never,
    Always,
    Cached,
}

impl TouchPolicy {
    pub const fn to_byte(self) -> u8 {
        match self {
            TouchPolicy::Default => 0x00,
            TouchPolicy::Never => 0x01,
            TouchPolicy::Always => 0x02,
            TouchPolicy::Cached => 0x03,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, PolicyParseError> {
        match byte {
            0x00 => Ok(TouchPolicy::Default),
            0x01 => Ok(TouchPolicy::Never),
            0x02 => Ok(TouchPolicy::Always),
            0x03 => Ok(TouchPolicy::Cached),
            other => Err(PolicyParseError::UnsupportedTouchPolicy { policy: other }),
        }
    }

    pub const fn requires_touch(self) -> bool {
        matches!(self, TouchPolicy::Always | TouchPolicy::Cached)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyParseError {
    #[error("PIN policy not supported: {policy:#04x}")]
    UnsupportedPinPolicy { policy: u8 },

    #[error("Touch policy not supported: {policy:#04x}")]
    UnsupportedTouchPolicy { policy: u8 },
}
