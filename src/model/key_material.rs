use std::fmt;

use ed25519_dalek::Verifier;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use thiserror::Error;

use crate::model::{KeyType, SignatureAlgorithm};

/// Public half of a slot key pair, exactly as reported by the card
///
/// ECC keys are SEC1 uncompressed points, Ed25519 keys are the raw 32 bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyMaterial {
    key_type: KeyType,
    bytes: Vec<u8>,
}

impl PublicKeyMaterial {
    /// Validate the encoding of a public key received from the card
    ///
    /// # Errors
    ///
    /// Returns an error if the length or point format does not match `key_type`
    pub fn from_card(key_type: KeyType, bytes: &[u8]) -> Result<Self, KeyMaterialError> {
        if bytes.len() != key_type.public_key_length() {
            return Err(KeyMaterialError::InvalidLength {
                key_type,
                expected: key_type.public_key_length(),
                actual: bytes.len(),
            });
        }
        if key_type != KeyType::Ed25519 && bytes[0] != 0x04 {
            return Err(KeyMaterialError::InvalidEncoding {
                reason: format!("expected uncompressed point, got prefix {:#04x}", bytes[0]),
            });
        }
        Ok(Self {
            key_type,
            bytes: bytes.to_vec(),
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_p256(&self) -> Result<p256::ecdsa::VerifyingKey, KeyMaterialError> {
        self.expect_type(KeyType::EccP256)?;
        p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.bytes).map_err(|e| {
            KeyMaterialError::InvalidEncoding {
                reason: e.to_string(),
            }
        })
    }

    pub fn to_p384(&self) -> Result<p384::ecdsa::VerifyingKey, KeyMaterialError> {
        self.expect_type(KeyType::EccP384)?;
        p384::ecdsa::VerifyingKey::from_sec1_bytes(&self.bytes).map_err(|e| {
            KeyMaterialError::InvalidEncoding {
                reason: e.to_string(),
            }
        })
    }

    pub fn to_ed25519(&self) -> Result<ed25519_dalek::VerifyingKey, KeyMaterialError> {
        self.expect_type(KeyType::Ed25519)?;
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&self.bytes);
        ed25519_dalek::VerifyingKey::from_bytes(&raw).map_err(|e| {
            KeyMaterialError::InvalidEncoding {
                reason: e.to_string(),
            }
        })
    }

    /// Verify a card signature over `message` with the algorithm it reports
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailed` if the signature does not match, or an
    /// encoding error if the key or signature cannot be decoded.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), KeyMaterialError> {
        let algorithm = signature.algorithm();
        self.expect_type(algorithm.key_type())?;
        let prepared = algorithm.prepare(message);
        let verified = match self.key_type {
            KeyType::Ed25519 => {
                let sig = ed25519_dalek::Signature::from_slice(signature.as_bytes())
                    .map_err(|e| invalid_signature(e.to_string()))?;
                self.to_ed25519()?.verify(&prepared, &sig).is_ok()
            }
            KeyType::EccP256 => {
                let sig = p256::ecdsa::Signature::from_der(signature.as_bytes())
                    .map_err(|e| invalid_signature(e.to_string()))?;
                self.to_p256()?.verify_prehash(&prepared, &sig).is_ok()
            }
            KeyType::EccP384 => {
                let sig = p384::ecdsa::Signature::from_der(signature.as_bytes())
                    .map_err(|e| invalid_signature(e.to_string()))?;
                self.to_p384()?.verify_prehash(&prepared, &sig).is_ok()
            }
        };
        if verified {
            Ok(())
        } else {
            Err(KeyMaterialError::VerificationFailed { algorithm })
        }
    }

    fn expect_type(&self, expected: KeyType) -> Result<(), KeyMaterialError> {
        if self.key_type != expected {
            return Err(KeyMaterialError::WrongKeyType {
                expected,
                actual: self.key_type,
            });
        }
        Ok(())
    }
}

fn invalid_signature(reason: String) -> KeyMaterialError {
    KeyMaterialError::InvalidSignature { reason }
}

impl fmt::Debug for PublicKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey({}, {})",
            self.key_type,
            hex::encode(&self.bytes[..self.bytes.len().min(8)])
        )
    }
}

/// Signature bytes together with the algorithm the card actually used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    bytes: Vec<u8>,
    algorithm: SignatureAlgorithm,
}

impl Signature {
    pub fn new(bytes: Vec<u8>, algorithm: SignatureAlgorithm) -> Self {
        Self { bytes, algorithm }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyMaterialError {
    #[error("{key_type} public key must be {expected} bytes, got {actual}")]
    InvalidLength {
        key_type: KeyType,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid public key encoding: {reason}")]
    InvalidEncoding { reason: String },

    #[error("Invalid signature encoding: {reason}")]
    InvalidSignature { reason: String },

    #[error("Expected a {expected} key, got {actual}")]
    WrongKeyType { expected: KeyType, actual: KeyType },

    #[error("Signature verification failed ({algorithm})")]
    VerificationFailed { algorithm: SignatureAlgorithm },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Signer;
    use p256::ecdsa::signature::hazmat::PrehashSigner;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    fn p256_pair() -> (p256::ecdsa::SigningKey, PublicKeyMaterial) {
        let sk = p256::ecdsa::SigningKey::from_slice(&[7u8; 32]).unwrap();
        let point = sk.verifying_key().to_encoded_point(false);
        let public = PublicKeyMaterial::from_card(KeyType::EccP256, point.as_bytes()).unwrap();
        (sk, public)
    }

    #[test]
    fn test_from_card_rejects_wrong_length() {
        let err = PublicKeyMaterial::from_card(KeyType::EccP256, &[0x04; 33]).unwrap_err();
        assert!(matches!(err, KeyMaterialError::InvalidLength { expected: 65, .. }));
    }

    #[test]
    fn test_from_card_rejects_compressed_point() {
        let mut bytes = vec![0x02; 65];
        bytes[1] = 0x01;
        let err = PublicKeyMaterial::from_card(KeyType::EccP256, &bytes).unwrap_err();
        assert!(matches!(err, KeyMaterialError::InvalidEncoding { .. }));
    }

    #[test]
    fn test_verify_ecdsa_p256_sha3() {
        let (sk, public) = p256_pair();
        let algorithm = SignatureAlgorithm::EcdsaP256Sha3_256;
        let digest = algorithm.prepare(b"message");
        let sig: p256::ecdsa::Signature = sk.sign_prehash(&digest).unwrap();
        let signature = Signature::new(sig.to_der().as_bytes().to_vec(), algorithm);

        assert!(public.verify(b"message", &signature).is_ok());
        assert_eq!(
            public.verify(b"other", &signature),
            Err(KeyMaterialError::VerificationFailed { algorithm })
        );
    }

    #[test]
    fn test_verify_detects_digest_mismatch() {
        let (sk, public) = p256_pair();
        let digest = SignatureAlgorithm::EcdsaP256Sha256.prepare(b"message");
        let sig: p256::ecdsa::Signature = sk.sign_prehash(&digest).unwrap();
        let mislabeled = Signature::new(
            sig.to_der().as_bytes().to_vec(),
            SignatureAlgorithm::EcdsaP256Sha3_256,
        );
        assert!(public.verify(b"message", &mislabeled).is_err());
    }

    #[test]
    fn test_verify_ed25519() {
        let sk = ed25519_dalek::SigningKey::from_bytes(&[9u8; 32]);
        let public =
            PublicKeyMaterial::from_card(KeyType::Ed25519, sk.verifying_key().as_bytes()).unwrap();
        let sig = sk.sign(b"message");
        let signature = Signature::new(sig.to_bytes().to_vec(), SignatureAlgorithm::Ed25519);
        assert!(public.verify(b"message", &signature).is_ok());
    }

    #[test]
    fn test_verify_rejects_algorithm_for_other_curve() {
        let (_, public) = p256_pair();
        let signature = Signature::new(vec![0u8; 8], SignatureAlgorithm::EcdsaP384Sha384);
        assert!(matches!(
            public.verify(b"message", &signature),
            Err(KeyMaterialError::WrongKeyType { .. })
        ));
    }

    #[test]
    fn test_debug_shows_prefix_only() {
        let (_, public) = p256_pair();
        let debug_str = format!("{:?}", public);
        assert!(debug_str.starts_with("PublicKey(ECC P-256, 04"));
    }
}
