//! Error taxonomy for the orchestration layer.
//!
//! `send_message` never surfaces these to conversational traffic; it converts
//! every failure into a system-tagged [`Message`](crate::types::Message).
//! Control operations (`initialize_channels`, `switch_channel`) return them
//! to the caller.

use thiserror::Error;

use crate::types::ChannelKind;

#[derive(Debug, Error)]
pub enum SwitchboardError {
    /// One or more channels failed to initialize. Fatal: the manager exposes
    /// no partial-ready state.
    #[error("channel initialization failed: {0}")]
    Initialization(String),

    /// A switch target is not registered or not active.
    #[error("channel {0} is not registered or not active")]
    ChannelUnavailable(ChannelKind),

    /// The fallback search during message dispatch found no healthy channel.
    #[error("no healthy channel available (active {active}, {tried} candidates tried)")]
    NoHealthyChannel { active: ChannelKind, tried: usize },

    /// The context failed validation before a transfer.
    #[error("invalid conversation context: {0}")]
    ContextValidation(String),

    /// A channel-specific transfer step failed.
    #[error("context transfer to {to} failed: {reason}")]
    TransferExecution { to: ChannelKind, reason: String },

    /// A switch was rejected because another transition is in flight.
    #[error("cannot switch to {0}: another channel transition is in flight")]
    TransitionInProgress(ChannelKind),

    /// A collaborator (transport, HTTP endpoint) failed.
    #[error("backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SwitchboardError::ChannelUnavailable(ChannelKind::Human);
        assert_eq!(err.to_string(), "channel human is not registered or not active");

        let err = SwitchboardError::NoHealthyChannel {
            active: ChannelKind::Batched,
            tried: 3,
        };
        assert!(err.to_string().contains("batched"));
        assert!(err.to_string().contains("3 candidates"));
    }

    #[test]
    fn test_backend_from_anyhow() {
        let inner = anyhow::anyhow!("connection refused");
        let err: SwitchboardError = inner.into();
        assert!(matches!(err, SwitchboardError::Backend(_)));
        assert!(err.to_string().contains("connection refused"));
    }
}
