use crate::handshake::Identity;
use crate::protocol::ProtocolError;

/// Lifecycle of one socket: `Unauthenticated -> Authenticated -> Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    Unauthenticated,
    Authenticated(Identity),
    Closed,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unauthenticated,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn authenticate(&mut self, identity: Identity) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Unauthenticated => {
                self.state = SessionState::Authenticated(identity);
                Ok(())
            }
            SessionState::Authenticated(_) => Err(ProtocolError::AlreadyAuthenticated),
            SessionState::Closed => Err(ProtocolError::SessionClosed),
        }
    }

    /// Terminal; there is no way back out of `Closed`.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
