//! PIN and PUK credentials
//!
//! Both are 6 to 8 bytes and travel to the card padded with `0xFF` to
//! exactly 8 bytes. Values are wiped from memory when dropped.

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const PADDED_LENGTH: usize = 8;
const PADDING: u8 = 0xFF;

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pin(Vec<u8>);

impl Pin {
    #[cfg(any(test, feature = "factory-defaults"))]
    pub const FACTORY_DEFAULT: &'static [u8] = b"123456";

    pub const MIN_LENGTH: usize = 6;

    pub const MAX_LENGTH: usize = 8;

    pub fn new(pin: Vec<u8>) -> Result<Self, PinError> {
        validate(&pin)?;
        Ok(Self(pin))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(pin: &str) -> Result<Self, PinError> {
        Self::new(pin.as_bytes().to_vec())
    }

    #[cfg(any(test, feature = "factory-defaults"))]
    pub fn factory_default() -> Self {
        Self(Self::FACTORY_DEFAULT.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_padded(&self) -> Zeroizing<Vec<u8>> {
        pad(&self.0)
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin([REDACTED])")
    }
}

/// PIN Unlock Key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Puk(Vec<u8>);

impl Puk {
    #[cfg(any(test, feature = "factory-defaults"))]
    pub const FACTORY_DEFAULT: &'static [u8] = b"12345678";

    pub fn new(puk: Vec<u8>) -> Result<Self, PinError> {
        validate(&puk)?;
        Ok(Self(puk))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(puk: &str) -> Result<Self, PinError> {
        Self::new(puk.as_bytes().to_vec())
    }

    #[cfg(any(test, feature = "factory-defaults"))]
    pub fn factory_default() -> Self {
        Self(Self::FACTORY_DEFAULT.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Puk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Puk([REDACTED])")
    }
}

fn validate(value: &[u8]) -> Result<(), PinError> {
    if value.len() < Pin::MIN_LENGTH {
        return Err(PinError::TooShort);
    }
    if value.len() > Pin::MAX_LENGTH {
        return Err(PinError::TooLong);
    }
    if value.contains(&PADDING) {
        return Err(PinError::InvalidByte);
    }
    Ok(())
}

fn pad(value: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut padded = Zeroizing::new(vec![PADDING; PADDED_LENGTH]);
    padded[..value.len()].copy_from_slice(value);
    padded
}

/// Strips the `0xFF` padding from a VERIFY payload
pub(crate) fn unpad(value: &[u8]) -> &[u8] {
    let end = value
        .iter()
        .position(|&b| b == PADDING)
        .unwrap_or(value.len());
    &value[..end]
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinError {
    #[error("PIN must be at least {min} characters", min = Pin::MIN_LENGTH)]
    TooShort,

    #[error("PIN must be at most {max} characters", max = Pin::MAX_LENGTH)]
    TooLong,

    #[error("PIN must not contain the 0xFF padding byte")]
    InvalidByte,
}
