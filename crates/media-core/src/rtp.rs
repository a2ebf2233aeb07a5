//! RTP boundary objects
//!
//! The packet model is `rvoip-rtp-core`'s. Transport adapters go through
//! [`parse_datagram`] and [`to_datagram`] so framing failures surface as this
//! crate's [`Error::Rtp`].

use bytes::Bytes;

use crate::error::{Error, Result};

pub use rvoip_rtp_core::{RtpHeader, RtpPacket};

impl From<rvoip_rtp_core::Error> for Error {
    fn from(err: rvoip_rtp_core::Error) -> Self {
        Error::rtp(err.to_string())
    }
}

/// Parse a received datagram.
///
/// Padding is stripped from the payload, so the padding flag is cleared too:
/// re-serializing the packet must not append padding a second time.
pub fn parse_datagram(data: &[u8]) -> Result<RtpPacket> {
    let mut packet = RtpPacket::parse(data)?;
    packet.header.padding = false;
    Ok(packet)
}

/// Serialize a packet for sending
pub fn to_datagram(packet: &RtpPacket) -> Result<Bytes> {
    Ok(packet.serialize()?)
}

/// Same header, new payload. Used for transcoded and mixed output.
pub fn with_payload(packet: &RtpPacket, payload: impl Into<Bytes>) -> RtpPacket {
    RtpPacket::new(packet.header.clone(), payload.into())
}
