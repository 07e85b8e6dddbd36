use crate::credentials::Credentials;
use crate::error::SessionResult;
use crate::model::DeviceInfo;

/// Supplies credentials for one card presentment
///
/// Called after the card is identified. The returned values are owned by the
/// card session and cleared when it ends.
pub trait CredentialSource {
    /// # Errors
    ///
    /// Returns an error if no credentials can be produced for `device`
    fn credentials_for(&mut self, device: &DeviceInfo) -> SessionResult<Credentials>;
}

impl<F> CredentialSource for F
where
    F: FnMut(&DeviceInfo) -> SessionResult<Credentials>,
{
    fn credentials_for(&mut self, device: &DeviceInfo) -> SessionResult<Credentials> {
        self(device)
    }
}
