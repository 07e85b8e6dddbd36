//! In-memory credential store for one card session
//!
//! Values are supplied by the caller for each presentment, never persisted,
//! and wiped when the session ends.

use zeroize::Zeroize;

use crate::error::{AuthError, SessionResult};
use crate::model::{ManagementKey, Pin, Puk};

#[derive(Debug, Default)]
pub struct Credentials {
    pin: Option<Pin>,
    management_key: Option<ManagementKey>,
    puk: Option<Puk>,
}

impl Credentials {
    pub fn new(pin: Pin, management_key: ManagementKey) -> Self {
        Self {
            pin: Some(pin),
            management_key: Some(management_key),
            puk: None,
        }
    }

    pub fn with_puk(mut self, puk: Puk) -> Self {
        self.puk = Some(puk);
        self
    }

    /// Card defaults, for development against factory-fresh cards only
    #[cfg(any(test, feature = "factory-defaults"))]
    pub fn factory_defaults(
        algorithm: crate::model::ManagementKeyAlgorithm,
    ) -> Result<Self, crate::model::ManagementKeyError> {
        Ok(
            Self::new(Pin::factory_default(), ManagementKey::factory_default(algorithm)?)
                .with_puk(Puk::factory_default()),
        )
    }

    pub fn pin(&self) -> SessionResult<&Pin> {
        self.pin.as_ref().ok_or_else(|| missing("PIN"))
    }

    pub fn management_key(&self) -> SessionResult<&ManagementKey> {
        self.management_key
            .as_ref()
            .ok_or_else(|| missing("management key"))
    }

    pub fn puk(&self) -> SessionResult<&Puk> {
        self.puk.as_ref().ok_or_else(|| missing("PUK"))
    }

    /// Wipe and discard every held value
    pub fn clear(&mut self) {
        if let Some(mut pin) = self.pin.take() {
            pin.zeroize();
        }
        if let Some(mut key) = self.management_key.take() {
            key.zeroize();
        }
        if let Some(mut puk) = self.puk.take() {
            puk.zeroize();
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.pin.is_none() && self.management_key.is_none() && self.puk.is_none()
    }
}

fn missing(credential: &'static str) -> crate::error::SessionError {
    AuthError::MissingCredential { credential }.into()
}
