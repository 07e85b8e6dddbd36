//! Ports (traits) for the collaborators around the PIV session
//!
//! The core depends on these abstractions, not on a concrete NFC stack or
//! UI. Transport and discovery are supplied by the host; the result sink
//! receives the terminal outcome of every presentment.

mod credential_source;
mod discovery;
mod result_sink;
mod transport;

#[cfg(test)]
pub(crate) mod contract_tests;

pub use credential_source::CredentialSource;
pub use discovery::{
    discovery_channel, DiscoveryEvent, DiscoveryReceiver, DiscoverySender, SubmitError,
};
pub use result_sink::{CollectingSink, ResultSink};
pub use transport::{CancelToken, CardTransport, Connection};
