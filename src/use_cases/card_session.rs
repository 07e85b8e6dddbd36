//! One physical card presentment
//!
//! Owns the PIV session (and through it the connection) together with the
//! credentials for this presentment. Dropping it closes the connection and
//! wipes the credentials, whether the sequence succeeded, failed or was
//! cancelled.

use tracing::debug;

use crate::credentials::Credentials;
use crate::error::SessionError;
use crate::piv::PivSession;
use crate::ports::Connection;

pub struct CardSession<C: Connection> {
    piv: PivSession<C>,
    credentials: Credentials,
    last_error: Option<SessionError>,
}

impl<C: Connection> CardSession<C> {
    pub fn new(piv: PivSession<C>, credentials: Credentials) -> Self {
        Self {
            piv,
            credentials,
            last_error: None,
        }
    }

    pub fn piv(&mut self) -> &mut PivSession<C> {
        &mut self.piv
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Replace the held credentials, wiping the previous ones
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials.clear();
        self.credentials = credentials;
    }

    /// Session and credentials borrowed together for a single step
    pub fn parts(&mut self) -> (&mut PivSession<C>, &Credentials) {
        (&mut self.piv, &self.credentials)
    }

    pub fn record_error(&mut self, error: &SessionError) {
        self.last_error = Some(error.clone());
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Close the connection and wipe credentials; idempotent
    pub fn close(&mut self) {
        self.piv.close();
        self.credentials.clear();
    }
}

impl<C: Connection> Drop for CardSession<C> {
    fn drop(&mut self) {
        self.close();
        debug!("card session released");
    }
}
