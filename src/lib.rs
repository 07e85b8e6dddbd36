//! PIV smart-card session over a contactless link
//!
//! A card presented to the reader is selected, unlocked with the holder's
//! PIN and management key, has its slot keys provisioned (reused when
//! present, generated when empty), and optionally signs a message. Every
//! presentment ends in a typed outcome delivered to a result sink.

pub mod adapters;
pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
mod logic;
pub mod model;
pub mod piv;
pub mod ports;
pub mod protocol;
pub mod use_cases;

// Re-export commonly used types
pub use error::{SessionError, SessionResult};

// Re-export public API
pub use api::{provision_once, provision_with_config};
