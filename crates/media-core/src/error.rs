use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for media operations
#[derive(Debug, Error)]
pub enum Error {
    /// Codec name is not known to this node
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Codec is declared but its conversion is not available
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Payload could not be interpreted
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Sample value cannot be encoded
    #[error("Invalid sample at index {index}: {value}")]
    InvalidSample { index: usize, value: f32 },

    /// Packet is not a telephone-event packet
    #[error("Not a DTMF event packet: payload type {actual}, expected {expected}")]
    NotDtmfPacket { expected: u8, actual: u8 },

    /// RTP framing error
    #[error("RTP error: {0}")]
    Rtp(String),

    /// Conference room already exists
    #[error("Room {0} already exists")]
    RoomExists(String),

    /// Conference room does not exist
    #[error("Room {0} does not exist")]
    RoomNotFound(String),

    /// Participant already joined the room
    #[error("Participant {participant} already in room {room}")]
    ParticipantExists { room: String, participant: String },

    /// Participant is not in the room
    #[error("Participant {participant} not in room {room}")]
    ParticipantNotFound { room: String, participant: String },

    /// Mixer rejected the operation
    #[error("Mixer error: {0}")]
    Mixer(String),
}

impl Error {
    /// Create a new NotImplemented error
    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        Self::NotImplemented(msg.into())
    }

    /// Create a new InvalidPayload error
    pub fn invalid_payload<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// Create a new Rtp error
    pub fn rtp<S: Into<String>>(msg: S) -> Self {
        Self::Rtp(msg.into())
    }

    /// Create a new Mixer error
    pub fn mixer<S: Into<String>>(msg: S) -> Self {
        Self::Mixer(msg.into())
    }

    /// Whether the failure means "drop this packet" rather than a caller bug
    pub fn is_codec_failure(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCodec(_)
                | Error::NotImplemented(_)
                | Error::InvalidPayload(_)
                | Error::InvalidSample { .. }
        )
    }
}
