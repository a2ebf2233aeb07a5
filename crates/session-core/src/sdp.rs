//! SDP offer handling on top of sip-core
//!
//! Offers are parsed by `rvoip-sip-core`'s [`SdpSession`]. This module only
//! adds the lookups offer/answer for a single audio stream needs, and renders
//! the fixed-format PCMU answer.

use std::fmt::Write;
use std::net::IpAddr;
use std::str::FromStr;

use rvoip_sip_core::types::sdp::{MediaDescription, ParsedAttribute, RtpMapAttribute, SdpSession};
use tracing::debug;

use crate::errors::{Result, SessionError};

/// Parse an SDP offer. Anything sip-core rejects is a malformed offer.
pub fn parse_offer(text: &str) -> Result<SdpSession> {
    SdpSession::from_str(text).map_err(|e| {
        debug!("Rejecting SDP offer: {}", e);
        SessionError::malformed_offer(e.to_string())
    })
}

/// `a=rtpmap` attributes of a media section, in offer order
pub fn rtpmaps(media: &MediaDescription) -> impl Iterator<Item = &RtpMapAttribute> {
    media.generic_attributes.iter().filter_map(|attr| match attr {
        ParsedAttribute::RtpMap(rtpmap) => Some(rtpmap),
        _ => None,
    })
}

/// Connection address for a media section, falling back to the session level
pub fn connection_for(session: &SdpSession, media: &MediaDescription) -> Option<IpAddr> {
    media
        .connection_info
        .as_ref()
        .or(session.connection_info.as_ref())
        .and_then(|conn| {
            // Multicast addresses may carry /ttl
            let address = conn.connection_address.split('/').next()?;
            address.parse().ok()
        })
}

/// Render the fixed-format PCMU answer
pub fn render_answer(offer: &SdpSession, address: IpAddr, port: u16) -> String {
    let session_id = offer.origin.sess_id.parse::<u64>().unwrap_or(0);
    let ip_version = if address.is_ipv4() { "IP4" } else { "IP6" };

    let mut answer = String::new();
    // Writing to a String cannot fail
    let _ = write!(
        answer,
        "v=0\r\n\
         o=- {sid} {version} IN {ipv} {addr}\r\n\
         s=sipmesh\r\n\
         c=IN {ipv} {addr}\r\n\
         t=0 0\r\n\
         m=audio {port} RTP/AVP 0\r\n\
         a=rtpmap:0 PCMU/8000\r\n\
         a=ptime:20\r\n\
         a=maxptime:150\r\n\
         a=sendrecv\r\n",
        sid = session_id,
        version = session_id.wrapping_add(2),
        ipv = ip_version,
        addr = address,
        port = port,
    );
    answer
}
