use thiserror::Error;

/// Call engine errors
#[derive(Error, Debug)]
pub enum CallEngineError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The signaling socket could not be bound; the node cannot start
    #[error("Failed to bind signaling socket {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Signaling datagram could not be read, parsed or sent
    #[error("Transport error: {0}")]
    Transport(String),

    /// Session-related errors
    #[error("Session error: {0}")]
    Session(#[from] sipmesh_session_core::SessionError),

    /// Media-related errors
    #[error("Media error: {0}")]
    Media(#[from] sipmesh_media_core::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CallEngineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether the node must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Config(_))
    }
}

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;
