use std::fmt;

/// Authentication state of a PIV session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    PinVerified,
    ManagementAuthenticated,
    /// PIN verified and management key authenticated
    Ready,
    Closed,
    /// The link failed; the connection has been released
    Faulted,
}

impl SessionState {
    pub fn is_live(self) -> bool {
        !matches!(self, SessionState::Closed | SessionState::Faulted)
    }

    pub fn pin_verified(self) -> bool {
        matches!(self, SessionState::PinVerified | SessionState::Ready)
    }

    pub fn management_authenticated(self) -> bool {
        matches!(
            self,
            SessionState::ManagementAuthenticated | SessionState::Ready
        )
    }

    pub(crate) fn with_pin_verified(self) -> Self {
        match self {
            SessionState::Unauthenticated | SessionState::PinVerified => SessionState::PinVerified,
            SessionState::ManagementAuthenticated | SessionState::Ready => SessionState::Ready,
            terminal => terminal,
        }
    }

    /// A rejected VERIFY clears the card's PIN status
    pub(crate) fn without_pin(self) -> Self {
        match self {
            SessionState::PinVerified => SessionState::Unauthenticated,
            SessionState::Ready => SessionState::ManagementAuthenticated,
            other => other,
        }
    }

    pub(crate) fn with_management(self) -> Self {
        match self {
            SessionState::Unauthenticated | SessionState::ManagementAuthenticated => {
                SessionState::ManagementAuthenticated
            }
            SessionState::PinVerified | SessionState::Ready => SessionState::Ready,
            terminal => terminal,
        }
    }

    /// A failed handshake leaves the card unauthenticated for the management key
    pub(crate) fn without_management(self) -> Self {
        match self {
            SessionState::ManagementAuthenticated => SessionState::Unauthenticated,
            SessionState::Ready => SessionState::PinVerified,
            other => other,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::PinVerified => "PIN-verified",
            SessionState::ManagementAuthenticated => "management-authenticated",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}
