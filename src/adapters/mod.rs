//! Adapters - concrete implementations of ports (traits)

pub mod virtual_card;

// Re-export for convenience
pub use virtual_card::{
    CardProfile, Fault, TouchResponse, VirtualCard, VirtualCardTransport, VirtualConnection,
};
