//! Signaling transport
//!
//! The node consumes requests and emits responses through a
//! [`SignalingTransport`]. [`UdpSignaling`] is a small UDP adapter: datagrams
//! are parsed by `rvoip-sip-core` and answered with a status line that echoes
//! the dialog-identifying headers. There are no transactions or
//! retransmissions.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use rvoip_sip_core::Message;
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::error::{CallEngineError, Result};
use crate::sip::{SipMethod, SipRequest, SipResponse};

const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Headers copied from the request into its response
const ECHOED_HEADERS: [(&str, &str); 5] = [
    ("via", "Via"),
    ("from", "From"),
    ("to", "To"),
    ("call-id", "Call-ID"),
    ("cseq", "CSeq"),
];

/// Source of requests and sink of responses
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Next request and the address it came from
    async fn recv(&self) -> Result<(SipRequest, SocketAddr)>;

    /// Send the response to `request` back to `to`
    async fn send(&self, request: &SipRequest, response: &SipResponse, to: SocketAddr) -> Result<()>;
}

/// UDP signaling socket
pub struct UdpSignaling {
    socket: UdpSocket,
}

impl UdpSignaling {
    /// Bind the listening socket. Failure here is fatal for the node.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| CallEngineError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!("SIP signaling listening on {}", addr);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl SignalingTransport for UdpSignaling {
    async fn recv(&self) -> Result<(SipRequest, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match parse_request(&buf[..len]) {
                Ok(request) => return Ok((request, from)),
                Err(e) => warn!("Ignoring datagram from {}: {}", from, e),
            }
        }
    }

    async fn send(&self, request: &SipRequest, response: &SipResponse, to: SocketAddr) -> Result<()> {
        let text = render_response(request, response);
        self.socket.send_to(text.as_bytes(), to).await?;
        Ok(())
    }
}

/// Parse a request datagram with sip-core and keep the parts the controller
/// acts on. Headers are keyed by their lower-case canonical name; repeated
/// headers are joined with `", "`.
pub fn parse_request(data: &[u8]) -> Result<SipRequest> {
    let request = match rvoip_sip_core::parse_message(data) {
        Ok(Message::Request(request)) => request,
        Ok(Message::Response(_)) => return Err(CallEngineError::transport("datagram is a response, not a request")),
        Err(e) => return Err(CallEngineError::transport(format!("unparseable SIP message: {}", e))),
    };

    let call_id = request
        .call_id()
        .map(|call_id| call_id.to_string())
        .ok_or_else(|| CallEngineError::transport("missing Call-ID"))?;

    let mut headers: HashMap<String, String> = HashMap::new();
    for header in request.all_headers() {
        let name = header.name().to_string();
        let rendered = header.to_string();
        let value = rendered
            .strip_prefix(name.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(&rendered)
            .trim();
        headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let method = request
        .method()
        .to_string()
        .parse::<SipMethod>()
        .unwrap_or_else(|never| match never {});
    Ok(SipRequest {
        method,
        call_id,
        headers,
        body: String::from_utf8_lossy(request.body()).into_owned(),
    })
}

/// Render a response to `request`
pub fn render_response(request: &SipRequest, response: &SipResponse) -> String {
    let mut text = format!("SIP/2.0 {} {}\r\n", response.status.as_u16(), response.reason);
    for (key, name) in ECHOED_HEADERS {
        if let Some(value) = request.header(key) {
            text.push_str(&format!("{}: {}\r\n", name, value));
        }
    }

    match &response.body {
        Some(body) => {
            text.push_str("Content-Type: application/sdp\r\n");
            text.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
            text.push_str(body);
        }
        None => text.push_str("Content-Length: 0\r\n\r\n"),
    }
    text
}
