use crate::state::ConnectionState;
use std::time::Duration;
use thiserror::Error;

/// Error type shared across the bridge crates.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("pipe endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("{op} rejected in state {state}")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },

    #[error("companion process error: {0}")]
    Process(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("shutdown wait elapsed before the runner stopped")]
    StopTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn endpoint(msg: impl Into<String>) -> Self {
        BridgeError::EndpointUnavailable(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        BridgeError::Transport(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        BridgeError::Process(msg.into())
    }

    /// Errors that a caller may reasonably retry at a higher level.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::EndpointUnavailable(_) | BridgeError::SendTimeout(_)
        )
    }

    /// Errors that force the owning service toward `Errored`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Transport(_)
                | BridgeError::Handshake(_)
                | BridgeError::ChannelClosed
                | BridgeError::MalformedFrame(_)
                | BridgeError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_fatal() {
        assert!(BridgeError::transport("broken pipe").is_fatal());
        assert!(BridgeError::ChannelClosed.is_fatal());
        assert!(BridgeError::Handshake("no response".into()).is_fatal());
        assert!(!BridgeError::SendTimeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn state_misuse_is_neither_fatal_nor_retryable() {
        let err = BridgeError::InvalidState {
            op: "send",
            state: ConnectionState::Stopped,
        };
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_names_the_operation() {
        let err = BridgeError::InvalidState {
            op: "send",
            state: ConnectionState::Errored,
        };
        let text = format!("{err}");
        assert!(text.contains("send"));
        assert!(text.contains("errored"));
    }
}
