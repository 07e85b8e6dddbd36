//! Session configuration loaded from TOML
//!
//! Only the plan lives here. Credentials are never read from the file.
//!
//! ```toml
//! discovery_timeout_secs = 30
//!
//! [[slots]]
//! slot = "signature"
//! key_type = "ed25519"
//! pin_policy = "always"
//!
//! [sign]
//! slot = "signature"
//! algorithm = "ed25519"
//! message_hex = "68656c6c6f"
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{KeySpec, SignatureAlgorithm, Slot};
use crate::use_cases::{SessionPlan, SignPlan};

fn default_discovery_timeout_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    4
}

fn default_slots() -> Vec<SlotConfig> {
    SessionPlan::default()
        .slots
        .into_iter()
        .map(|(slot, spec)| SlotConfig { slot, spec })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
    /// Card-present events that may wait while a session runs
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_slots")]
    pub slots: Vec<SlotConfig>,
    #[serde(default)]
    pub sign: Option<SignConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    pub slot: Slot,
    #[serde(flatten)]
    pub spec: KeySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignConfig {
    pub slot: Slot,
    pub algorithm: SignatureAlgorithm,
    pub message_hex: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: default_discovery_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            slots: default_slots(),
            sign: None,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed TOML or unknown names, and a validation
    /// error when the plan cannot run
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots.is_empty() {
            return Err(ConfigError::EmptySlots);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        let mut seen = BTreeSet::new();
        for entry in &self.slots {
            if !seen.insert(entry.slot) {
                return Err(ConfigError::DuplicateSlot { slot: entry.slot });
            }
        }
        if let Some(sign) = &self.sign {
            decode_message(&sign.message_hex)?;
        }
        Ok(())
    }

    pub fn plan(&self) -> Result<SessionPlan, ConfigError> {
        let sign = match &self.sign {
            Some(sign) => Some(SignPlan {
                slot: sign.slot,
                algorithm: sign.algorithm,
                message: decode_message(&sign.message_hex)?,
            }),
            None => None,
        };
        Ok(SessionPlan {
            slots: self.slots.iter().map(|entry| (entry.slot, entry.spec)).collect(),
            sign,
        })
    }
}

fn decode_message(message_hex: &str) -> Result<Vec<u8>, ConfigError> {
    hex::decode(message_hex.trim()).map_err(|e| ConfigError::InvalidMessageHex {
        reason: e.to_string(),
    })
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid message hex: {reason}")]
    InvalidMessageHex { reason: String },

    #[error("At least one slot must be configured")]
    EmptySlots,

    #[error("Slot {slot} is configured twice")]
    DuplicateSlot { slot: Slot },

    #[error("Queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KeyType, PinPolicy, TouchPolicy};

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.discovery_timeout(), Duration::from_secs(60));
        assert_eq!(config.plan().unwrap(), SessionPlan::default());
    }

    #[test]
    fn test_full_document() {
        let config = SessionConfig::from_toml_str(
            r#"
            discovery_timeout_secs = 5
            queue_capacity = 1

            [[slots]]
            slot = "key-management"
            key_type = "ecc-p384"
            touch_policy = "cached"

            [[slots]]
            slot = "signature"
            key_type = "ed25519"
            pin_policy = "always"

            [sign]
            slot = "signature"
            algorithm = "ed25519"
            message_hex = "68656c6c6f"
            "#,
        )
        .unwrap();

        let plan = config.plan().unwrap();
        assert_eq!(
            plan.slots,
            vec![
                (
                    Slot::KeyManagement,
                    KeySpec::new(KeyType::EccP384, PinPolicy::Default, TouchPolicy::Cached)
                ),
                (
                    Slot::Signature,
                    KeySpec::new(KeyType::Ed25519, PinPolicy::Always, TouchPolicy::Default)
                ),
            ]
        );
        let sign = plan.sign.unwrap();
        assert_eq!(sign.algorithm, SignatureAlgorithm::Ed25519);
        assert_eq!(sign.message, b"hello".to_vec());
        assert_eq!(config.discovery_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let result = SessionConfig::from_toml_str(
            r#"
            [[slots]]
            slot = "signature"
            key_type = "ed25519"

            [[slots]]
            slot = "signature"
            key_type = "ecc-p256"
            "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateSlot {
                slot: Slot::Signature
            })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            SessionConfig::from_toml_str("slots = []"),
            Err(ConfigError::EmptySlots)
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("queue_capacity = 0"),
            Err(ConfigError::ZeroQueueCapacity)
        ));
        assert!(matches!(
            SessionConfig::from_toml_str(
                "[sign]\nslot = \"signature\"\nalgorithm = \"ed25519\"\nmessage_hex = \"zz\""
            ),
            Err(ConfigError::InvalidMessageHex { .. })
        ));
        assert!(matches!(
            SessionConfig::from_toml_str(
                "[[slots]]\nslot = \"signature\"\nkey_type = \"rsa2048\""
            ),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = SessionConfig::load("/nonexistent/yksession.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
