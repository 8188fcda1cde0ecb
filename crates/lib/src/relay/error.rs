//! Failure kinds of a relay cycle.

/// Why a query or click cycle did not produce a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Nothing arrived from the remote agent within the initial timeout.
    #[error("Timeout: No response from bot.")]
    NoResponse,
    #[error("button not found: {0}")]
    ButtonNotFound(String),
    #[error("message {0} has no buttons")]
    NoButtonsAvailable(i64),
    #[error("message {0} not found")]
    MessageNotFound(i64),
    /// The channel failed; carries the underlying message.
    #[error("{0}")]
    Transport(String),
}

impl RelayError {
    /// Not-found class: the caller referenced a message or button that is not there.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RelayError::ButtonNotFound(_)
                | RelayError::NoButtonsAvailable(_)
                | RelayError::MessageNotFound(_)
        )
    }
}

impl From<String> for RelayError {
    fn from(e: String) -> Self {
        RelayError::Transport(e)
    }
}
