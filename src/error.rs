//! Error types for the yksession library
//!
//! This module defines the error hierarchy for all session operations.
//! Errors are organized by what the caller can do about them: link errors
//! end the session, authentication errors carry remaining attempts, and
//! `TouchTimeout` can be retried within the same session.

use thiserror::Error;

use crate::model::{KeyType, Slot, SignatureAlgorithm};
use crate::protocol::{StatusWord, TlvError};

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Top-level error type for all session operations
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Transport errors, always fatal to the current session
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Rejected credentials
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Unexpected card responses
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Requested operation conflicts with the slot's key
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Key management error: {0}")]
    KeyManagement(#[from] KeyManagementError),

    /// User did not confirm presence before the card gave up
    #[error("Touch not confirmed in time for slot {slot}")]
    TouchTimeout { slot: Slot },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Domain validation errors
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError),
}

impl SessionError {
    pub fn is_link_error(&self) -> bool {
        matches!(self, SessionError::Link(_))
    }

    /// Whether the same session may retry the failed step
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::TouchTimeout { .. } => true,
            SessionError::Auth(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Transport-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Card link unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Card link lost: {reason}")]
    Lost { reason: String },

    #[error("Card did not respond in time")]
    Timeout,

    #[error("Exchange cancelled by session teardown")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Wrong PIN: {attempts_remaining} attempts remaining")]
    WrongPin { attempts_remaining: u8 },

    #[error("PIN is locked - PUK reset required")]
    PinLocked,

    #[error("Wrong PUK: {attempts_remaining} attempts remaining")]
    WrongPuk { attempts_remaining: u8 },

    #[error("PUK is locked")]
    PukLocked,

    #[error("Wrong management key")]
    WrongManagementKey,

    #[error("Management key handshake aborted: {reason}")]
    AuthenticationAborted { reason: String },

    #[error("PIN verification required to use slot {slot}")]
    PinRequired { slot: Slot },

    #[error("No {credential} supplied for this session")]
    MissingCredential { credential: &'static str },
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::WrongPin { .. } | AuthError::WrongPuk { .. } | AuthError::PinRequired { .. }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{operation} failed with status {sw}")]
    UnexpectedStatus {
        operation: &'static str,
        sw: StatusWord,
    },

    #[error("Malformed {operation} response: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("TLV error: {0}")]
    Tlv(#[from] TlvError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Slot {slot} holds a {actual} key, not {requested}")]
    KeyTypeMismatch {
        slot: Slot,
        requested: KeyType,
        actual: KeyType,
    },

    #[error("{algorithm} cannot be used with a {key_type} key")]
    UnsupportedAlgorithm {
        algorithm: SignatureAlgorithm,
        key_type: KeyType,
    },

    #[error("{algorithm} payload of {len} bytes exceeds the card limit of {max} bytes")]
    MessageTooLong {
        algorithm: SignatureAlgorithm,
        len: usize,
        max: usize,
    },
}

/// Key management errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyManagementError {
    /// Expected outcome of querying an empty slot
    #[error("No key found in slot: {slot}")]
    NoKeyInSlot { slot: Slot },

    #[error("Card rejected key generation in slot {slot}: {reason}")]
    SlotGenerationRejected { slot: Slot, reason: String },
}

/// Domain validation errors
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    #[error("PIN validation error: {0}")]
    Pin(#[from] crate::model::PinError),

    #[error("Slot error: {0}")]
    Slot(#[from] crate::model::SlotError),

    #[error("Algorithm error: {0}")]
    Algorithm(#[from] crate::model::AlgorithmError),

    #[error("Policy error: {0}")]
    Policy(#[from] crate::model::PolicyParseError),

    #[error("Management Key error: {0}")]
    ManagementKey(#[from] crate::model::ManagementKeyError),

    #[error("Key material error: {0}")]
    KeyMaterial(#[from] crate::model::KeyMaterialError),
}

impl From<crate::model::PinError> for SessionError {
    fn from(err: crate::model::PinError) -> Self {
        SessionError::Domain(DomainError::Pin(err))
    }
}

impl From<crate::model::ManagementKeyError> for SessionError {
    fn from(err: crate::model::ManagementKeyError) -> Self {
        SessionError::Domain(DomainError::ManagementKey(err))
    }
}

impl From<crate::model::KeyMaterialError> for SessionError {
    fn from(err: crate::model::KeyMaterialError) -> Self {
        SessionError::Domain(DomainError::KeyMaterial(err))
    }
}

impl From<TlvError> for SessionError {
    fn from(err: TlvError) -> Self {
        SessionError::Protocol(ProtocolError::Tlv(err))
    }
}
