//! Media negotiation
//!
//! A [`MediaEngine`] accepts an SDP offer and produces an answer, or fails
//! with a negotiation error. Each session owns its engine exclusively.
//! [`UdpMediaEngine`] answers PCMU offers with a plain UDP RTP socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use rvoip_sip_core::types::sdp::{RtpMapAttribute, SdpSession};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use sipmesh_media_core::{rtp, CodecType, RtpPacket};

use crate::errors::{Result, SessionError};
use crate::sdp;

const RECV_BUFFER_SIZE: usize = 1500;

/// Offer/answer capability of a session's media stack
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Accept a remote offer and return the local answer
    async fn set_offer(&mut self, offer: &str) -> Result<String>;

    /// Release sockets and background tasks
    async fn close(&mut self);
}

/// Creates the negotiation handle for each new session, given its Call-ID
pub type MediaEngineFactory = Arc<dyn Fn(&str) -> Box<dyn MediaEngine> + Send + Sync>;

/// An RTP packet received on a session's media socket
#[derive(Debug, Clone)]
pub struct InboundRtp {
    pub call_id: String,
    /// Codec negotiated for the stream
    pub codec: CodecType,
    pub packet: RtpPacket,
}

/// Codec and remote address chosen from an offer
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedMedia {
    pub codec: RtpMapAttribute,
    /// `None` when the offer's connection address is missing or unparseable
    pub remote: Option<SocketAddr>,
}

/// Pick the first PCMU `rtpmap` of an audio section
pub fn select_pcmu(offer: &SdpSession) -> Result<SelectedMedia> {
    offer
        .media_descriptions
        .iter()
        .filter(|media| media.media == "audio")
        .find_map(|media| {
            let codec = sdp::rtpmaps(media).find(|map| map.encoding_name.eq_ignore_ascii_case("pcmu"))?;
            Some(SelectedMedia {
                codec: codec.clone(),
                remote: sdp::connection_for(offer, media).map(|ip| SocketAddr::new(ip, media.port)),
            })
        })
        .ok_or(SessionError::NoCommonCodec)
}

/// Where a UDP engine forwards the packets it reads
#[derive(Debug, Clone)]
struct RtpSink {
    call_id: String,
    tx: mpsc::Sender<InboundRtp>,
}

/// UDP-based media engine
pub struct UdpMediaEngine {
    bind_ip: IpAddr,
    sink: Option<RtpSink>,
    local_addr: Option<SocketAddr>,
    selected: Option<SelectedMedia>,
    reader: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl UdpMediaEngine {
    /// Engine binding its RTP sockets on `bind_ip`
    pub fn new(bind_ip: IpAddr) -> Self {
        Self {
            bind_ip,
            sink: None,
            local_addr: None,
            selected: None,
            reader: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Forward received RTP packets to `tx`, tagged with `call_id`
    pub fn with_sink(mut self, call_id: impl Into<String>, tx: mpsc::Sender<InboundRtp>) -> Self {
        self.sink = Some(RtpSink {
            call_id: call_id.into(),
            tx,
        });
        self
    }

    /// Factory producing engines bound on `bind_ip` that discard inbound RTP
    pub fn factory(bind_ip: IpAddr) -> MediaEngineFactory {
        Arc::new(move |_call_id: &str| Box::new(UdpMediaEngine::new(bind_ip)) as Box<dyn MediaEngine>)
    }

    /// Factory producing engines bound on `bind_ip` that forward inbound RTP to `tx`
    pub fn factory_with_sink(bind_ip: IpAddr, tx: mpsc::Sender<InboundRtp>) -> MediaEngineFactory {
        Arc::new(move |call_id: &str| {
            Box::new(UdpMediaEngine::new(bind_ip).with_sink(call_id, tx.clone())) as Box<dyn MediaEngine>
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn selected(&self) -> Option<&SelectedMedia> {
        self.selected.as_ref()
    }

    fn stop_reader(&mut self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.cancel = CancellationToken::new();
        self.local_addr = None;
    }
}

impl Default for UdpMediaEngine {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[async_trait]
impl MediaEngine for UdpMediaEngine {
    async fn set_offer(&mut self, offer: &str) -> Result<String> {
        let offer = sdp::parse_offer(offer)?;
        let selected = select_pcmu(&offer)?;
        debug!(
            "Selected {}/{} (pt {}) remote {:?}",
            selected.codec.encoding_name, selected.codec.clock_rate, selected.codec.payload_type, selected.remote
        );

        // A re-offer replaces the previous stream
        self.stop_reader();

        let socket = UdpSocket::bind(SocketAddr::new(self.bind_ip, 0)).await?;
        let local_addr = socket.local_addr()?;
        info!("RTP socket bound on {}", local_addr);

        self.reader = Some(tokio::spawn(read_loop(
            socket,
            self.sink.clone(),
            CodecType::Pcmu,
            self.cancel.clone(),
        )));
        self.local_addr = Some(local_addr);
        self.selected = Some(selected);

        Ok(sdp::render_answer(&offer, local_addr.ip(), local_addr.port()))
    }

    async fn close(&mut self) {
        if self.reader.is_some() {
            debug!("Closing RTP socket {:?}", self.local_addr);
        }
        self.stop_reader();
        self.selected = None;
    }
}

impl Drop for UdpMediaEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(socket: UdpSocket, sink: Option<RtpSink>, codec: CodecType, cancel: CancellationToken) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    warn!("RTP receive failed: {}", e);
                    break;
                }
            },
        };

        trace!("Read {} bytes from {}", len, from);
        let Some(sink) = sink.as_ref() else { continue };
        match rtp::parse_datagram(&buf[..len]) {
            Ok(packet) => {
                let inbound = InboundRtp {
                    call_id: sink.call_id.clone(),
                    codec,
                    packet,
                };
                if sink.tx.try_send(inbound).is_err() {
                    trace!("RTP sink full or closed, dropping packet from {}", from);
                }
            }
            Err(e) => debug!("Ignoring non-RTP datagram from {}: {}", from, e),
        }
    }
    debug!("RTP read loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn offer(formats: &str, codecs: &str) -> String {
        format!(
            "v=0\r\no=- 7 7 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 5004 RTP/AVP {}\r\n{}",
            formats, codecs
        )
    }

    #[test]
    fn test_select_prefers_first_pcmu_case_insensitively() {
        let sd = sdp::parse_offer(&offer("8 0", "a=rtpmap:8 PCMA/8000\r\na=rtpmap:0 pcmu/8000\r\n")).unwrap();
        let selected = select_pcmu(&sd).unwrap();
        assert_eq!(selected.codec.payload_type, 0);
        assert_eq!(selected.remote, Some("127.0.0.1:5004".parse().unwrap()));
    }

    #[test]
    fn test_no_pcmu_is_no_common_codec() {
        let sd = sdp::parse_offer(&offer("8", "a=rtpmap:8 PCMA/8000\r\n")).unwrap();
        assert!(matches!(select_pcmu(&sd), Err(SessionError::NoCommonCodec)));
    }

    #[test]
    fn test_video_sections_are_ignored() {
        let text = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\n\
                    m=video 5006 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        let sd = sdp::parse_offer(text).unwrap();
        assert!(matches!(select_pcmu(&sd), Err(SessionError::NoCommonCodec)));
    }

    #[tokio::test]
    async fn test_udp_engine_answers_and_forwards_rtp() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = UdpMediaEngine::new(IpAddr::V4(Ipv4Addr::LOCALHOST)).with_sink("call-7", tx);

        let answer = engine.set_offer(&offer("0", "a=rtpmap:0 PCMU/8000\r\n")).await.unwrap();
        let local = engine.local_addr().unwrap();
        assert!(answer.contains(&format!("m=audio {} RTP/AVP 0", local.port())));

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = RtpPacket::new_with_payload(0, 3, 480, 9, Bytes::from_static(&[0xFF; 160]));
        peer.send_to(&rtp::to_datagram(&packet).unwrap(), local).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.call_id, "call-7");
        assert_eq!(received.codec, CodecType::Pcmu);
        assert_eq!(received.packet.header, packet.header);
        assert_eq!(received.packet.payload, packet.payload);

        engine.close().await;
        assert!(engine.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_udp_engine_rejects_bad_offers() {
        let mut engine = UdpMediaEngine::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(engine.set_offer("garbage").await.unwrap_err().is_offer_error());
        assert!(matches!(
            engine.set_offer(&offer("111", "a=rtpmap:111 opus/48000/2\r\n")).await,
            Err(SessionError::NoCommonCodec)
        ));
        assert!(engine.local_addr().is_none());
    }
}
