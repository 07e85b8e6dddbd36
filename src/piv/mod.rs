//! PIV application session over ISO-7816 APDUs

mod mgmt_cipher;
pub(crate) mod parse;
mod session;
mod state;

pub use session::{PivSession, SigningRequest, MAX_SIGN_PAYLOAD};
pub use state::SessionState;

pub(crate) use mgmt_cipher::{process_block, Direction};
