//! Management Key type for PIV administrative authentication
//!
//! The management key is a symmetric key authorizing key generation. Cards
//! ship with either a 3DES or an AES-192 key; AES-128 and AES-256 are also
//! accepted by current firmware. The algorithm travels with the key bytes so
//! the handshake can pick the right block cipher.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric algorithm of a PIV management key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagementKeyAlgorithm {
    #[serde(rename = "3des")]
    TripleDes,
    #[serde(rename = "aes128")]
    Aes128,
    #[serde(rename = "aes192")]
    Aes192,
    #[serde(rename = "aes256")]
    Aes256,
}

impl ManagementKeyAlgorithm {
    /// Algorithm identifier used as P1 of GENERAL AUTHENTICATE
    pub const fn algorithm_id(self) -> u8 {
        match self {
            Self::TripleDes => 0x03,
            Self::Aes128 => 0x08,
            Self::Aes192 => 0x0A,
            Self::Aes256 => 0x0C,
        }
    }

    pub fn from_algorithm_id(id: u8) -> Result<Self, ManagementKeyError> {
        match id {
            0x03 => Ok(Self::TripleDes),
            0x08 => Ok(Self::Aes128),
            0x0A => Ok(Self::Aes192),
            0x0C => Ok(Self::Aes256),
            other => Err(ManagementKeyError::UnsupportedAlgorithm { id: other }),
        }
    }

    pub const fn key_length(self) -> usize {
        match self {
            Self::TripleDes | Self::Aes192 => 24,
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }

    /// Cipher block size, which is also the witness/challenge size
    pub const fn block_size(self) -> usize {
        match self {
            Self::TripleDes => 8,
            Self::Aes128 | Self::Aes192 | Self::Aes256 => 16,
        }
    }
}

/// Management Key for PIV administrative authentication
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ManagementKey {
    #[zeroize(skip)]
    algorithm: ManagementKeyAlgorithm,
    key: Vec<u8>,
}

impl ManagementKey {
    #[cfg(any(test, feature = "factory-defaults"))]
    pub const FACTORY_DEFAULT: [u8; 24] = [
        1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8,
    ];

    /// Create a Management Key for the given algorithm
    ///
    /// # Errors
    ///
    /// Returns an error if the key length does not match the algorithm
    pub fn new(algorithm: ManagementKeyAlgorithm, key: &[u8]) -> Result<Self, ManagementKeyError> {
        if key.len() != algorithm.key_length() {
            return Err(ManagementKeyError::InvalidLength {
                expected: algorithm.key_length(),
                actual: key.len(),
            });
        }
        Ok(Self {
            algorithm,
            key: key.to_vec(),
        })
    }

    /// Parse a hex encoded key, e.g. from a command line argument
    pub fn from_hex(algorithm: ManagementKeyAlgorithm, key_hex: &str) -> Result<Self, ManagementKeyError> {
        let mut bytes = hex::decode(key_hex.trim()).map_err(|e| ManagementKeyError::InvalidHex {
            reason: e.to_string(),
        })?;
        let key = Self::new(algorithm, &bytes);
        bytes.zeroize();
        key
    }

    /// Factory default key, interpreted with the given algorithm
    ///
    /// Firmware before 5.7 uses 3DES, later firmware AES-192; the bytes are the same.
    /// No card ships with an AES-128 or AES-256 default.
    #[cfg(any(test, feature = "factory-defaults"))]
    pub fn factory_default(algorithm: ManagementKeyAlgorithm) -> Result<Self, ManagementKeyError> {
        match algorithm {
            ManagementKeyAlgorithm::TripleDes | ManagementKeyAlgorithm::Aes192 => {
                Self::new(algorithm, &Self::FACTORY_DEFAULT)
            }
            ManagementKeyAlgorithm::Aes128 | ManagementKeyAlgorithm::Aes256 => {
                Err(ManagementKeyError::NoFactoryDefault { algorithm })
            }
        }
    }

    pub fn algorithm(&self) -> ManagementKeyAlgorithm {
        self.algorithm
    }

    /// Get the Management Key as a byte slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for ManagementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagementKey({:?}, [REDACTED])", self.algorithm)
    }
}

/// Errors that can occur when creating a Management Key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagementKeyError {
    #[error("Management Key must be exactly {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Management Key is not valid hex: {reason}")]
    InvalidHex { reason: String },

    #[error("Management Key algorithm not supported: {id:#04x}")]
    UnsupportedAlgorithm { id: u8 },

    #[error("No factory default Management Key exists for {algorithm:?}")]
    NoFactoryDefault { algorithm: ManagementKeyAlgorithm },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mgmt_key_valid() {
        let key = ManagementKey::new(ManagementKeyAlgorithm::Aes192, &[0u8; 24]).unwrap();
        assert_eq!(key.as_bytes().len(), 24);
        assert_eq!(key.algorithm(), ManagementKeyAlgorithm::Aes192);
    }

    #[test]
    fn test_mgmt_key_invalid_length() {
        assert_eq!(
            ManagementKey::new(ManagementKeyAlgorithm::Aes128, &[0u8; 24]).unwrap_err(),
            ManagementKeyError::InvalidLength {
                expected: 16,
                actual: 24
            }
        );
    }

    #[test]
    fn test_mgmt_key_from_hex() {
        let key = ManagementKey::from_hex(
            ManagementKeyAlgorithm::TripleDes,
            "010203040506070801020304050607080102030405060708",
        )
        .unwrap();
        assert_eq!(key, ManagementKey::factory_default(ManagementKeyAlgorithm::TripleDes).unwrap());

        assert!(matches!(
            ManagementKey::from_hex(ManagementKeyAlgorithm::TripleDes, "zz"),
            Err(ManagementKeyError::InvalidHex { .. })
        ));
    }

    #[test]
    fn test_factory_default_only_for_shipped_algorithms() {
        for alg in [ManagementKeyAlgorithm::TripleDes, ManagementKeyAlgorithm::Aes192] {
            let key = ManagementKey::factory_default(alg).unwrap();
            assert_eq!(key.as_bytes().len(), alg.key_length());
        }
        for alg in [ManagementKeyAlgorithm::Aes128, ManagementKeyAlgorithm::Aes256] {
            assert_eq!(
                ManagementKey::factory_default(alg).unwrap_err(),
                ManagementKeyError::NoFactoryDefault { algorithm: alg }
            );
        }
    }

    #[test]
    fn test_algorithm_ids() {
        for alg in [
            ManagementKeyAlgorithm::TripleDes,
            ManagementKeyAlgorithm::Aes128,
            ManagementKeyAlgorithm::Aes192,
            ManagementKeyAlgorithm::Aes256,
        ] {
            assert_eq!(ManagementKeyAlgorithm::from_algorithm_id(alg.algorithm_id()), Ok(alg));
        }
        assert!(ManagementKeyAlgorithm::from_algorithm_id(0x07).is_err());
    }

    #[test]
    fn test_mgmt_key_debug_redacted() {
        let key = ManagementKey::factory_default(ManagementKeyAlgorithm::Aes192).unwrap();
        let debug_str = format!("{:?}", key);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("1, 2, 3"));
    }
}
