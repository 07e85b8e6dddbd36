//! Key types and signature algorithms supported by the PIV session

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384};
use sha3::{Sha3_256, Sha3_384};
use thiserror::Error;

/// Asymmetric key type stored in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "ecc-p256")]
    EccP256,
    #[serde(rename = "ecc-p384")]
    EccP384,
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl KeyType {
    /// PIV algorithm identifier
    pub const fn algorithm_id(self) -> u8 {
        match self {
            KeyType::EccP256 => 0x11,
            KeyType::EccP384 => 0x14,
            KeyType::Ed25519 => 0xE0,
        }
    }

    pub fn from_algorithm_id(id: u8) -> Result<Self, AlgorithmError> {
        match id {
            0x11 => Ok(KeyType::EccP256),
            0x14 => Ok(KeyType::EccP384),
            0xE0 => Ok(KeyType::Ed25519),
            other => Err(AlgorithmError::UnsupportedKeyType { id: other }),
        }
    }

    /// Length of the encoded public key as returned by the card
    pub const fn public_key_length(self) -> usize {
        match self {
            KeyType::EccP256 => 65,
            KeyType::EccP384 => 97,
            KeyType::Ed25519 => 32,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::EccP256 => "ECC P-256",
            KeyType::EccP384 => "ECC P-384",
            KeyType::Ed25519 => "Ed25519",
        };
        f.write_str(name)
    }
}

/// Curve and digest pairing used to produce a signature
///
/// The digest is computed on the host, the card signs the digest. Ed25519
/// signs the message itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa-p256-sha256")]
    EcdsaP256Sha256,
    #[serde(rename = "ecdsa-p256-sha3-256")]
    EcdsaP256Sha3_256,
    #[serde(rename = "ecdsa-p384-sha384")]
    EcdsaP384Sha384,
    #[serde(rename = "ecdsa-p384-sha3-384")]
    EcdsaP384Sha3_384,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 5] = [
        SignatureAlgorithm::Ed25519,
        SignatureAlgorithm::EcdsaP256Sha256,
        SignatureAlgorithm::EcdsaP256Sha3_256,
        SignatureAlgorithm::EcdsaP384Sha384,
        SignatureAlgorithm::EcdsaP384Sha3_384,
    ];

    /// Key type able to produce this signature
    pub const fn key_type(self) -> KeyType {
        match self {
            SignatureAlgorithm::Ed25519 => KeyType::Ed25519,
            SignatureAlgorithm::EcdsaP256Sha256 | SignatureAlgorithm::EcdsaP256Sha3_256 => {
                KeyType::EccP256
            }
            SignatureAlgorithm::EcdsaP384Sha384 | SignatureAlgorithm::EcdsaP384Sha3_384 => {
                KeyType::EccP384
            }
        }
    }

    /// Bytes sent to the card for signing
    pub fn prepare(self, message: &[u8]) -> Vec<u8> {
        match self {
            SignatureAlgorithm::Ed25519 => message.to_vec(),
            SignatureAlgorithm::EcdsaP256Sha256 => Sha256::digest(message).to_vec(),
            SignatureAlgorithm::EcdsaP256Sha3_256 => Sha3_256::digest(message).to_vec(),
            SignatureAlgorithm::EcdsaP384Sha384 => Sha384::digest(message).to_vec(),
            SignatureAlgorithm::EcdsaP384Sha3_384 => Sha3_384::digest(message).to_vec(),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureAlgorithm::Ed25519 => "Ed25519",
            SignatureAlgorithm::EcdsaP256Sha256 => "ECDSA P-256 / SHA-256",
            SignatureAlgorithm::EcdsaP256Sha3_256 => "ECDSA P-256 / SHA3-256",
            SignatureAlgorithm::EcdsaP384Sha384 => "ECDSA P-384 / SHA-384",
            SignatureAlgorithm::EcdsaP384Sha3_384 => "ECDSA P-384 / SHA3-384",
        };
        f.write_str(name)
    }
}

/// Errors that can occur when working with algorithms
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("Key type not supported: {id:#04x}")]
    UnsupportedKeyType { id: u8 },
}
