//! Error Types for Session Core

use thiserror::Error;

use crate::session::SessionStatus;

/// Main result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Status change not allowed by the session state machine
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    /// SDP offer could not be parsed
    #[error("Malformed offer: {0}")]
    MalformedOffer(String),

    /// Offer has no codec this node can answer with
    #[error("No common codec in offer")]
    NoCommonCodec,

    /// Network/transport error
    #[error("Network error: {0}")]
    Network(String),

    /// Media pipeline error
    #[error("Media error: {0}")]
    Media(#[from] sipmesh_media_core::Error),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Network(err.to_string())
    }
}

// Convenience constructors
impl SessionError {
    pub fn not_found(id: impl ToString) -> Self {
        SessionError::SessionNotFound(id.to_string())
    }

    pub fn malformed_offer(msg: impl Into<String>) -> Self {
        SessionError::MalformedOffer(msg.into())
    }

    /// Failures caused by the peer's offer rather than by this node
    pub fn is_offer_error(&self) -> bool {
        matches!(self, SessionError::MalformedOffer(_))
    }
}
