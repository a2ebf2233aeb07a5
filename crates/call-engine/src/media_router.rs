//! Inbound RTP routing
//!
//! Telephone-event packets go to the DTMF detector. Voice packets of a call
//! with a conference room are transcoded to the conference codec when needed
//! and mixed into that room; a call's room has the call's Call-ID as its id.

use std::sync::Arc;

use tracing::{trace, warn};

use sipmesh_media_core::{CodecType, ConferenceRegistry, DtmfDetector, DtmfEvent, RtpPacket, TranscodingService};
use sipmesh_session_core::InboundRtp;

use crate::error::Result;

/// Result of routing one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOutcome {
    /// Telephone-event packet; `Some` when it completed a key press
    Dtmf(Option<DtmfEvent>),
    /// Voice packet mixed and queued for this many participants
    Mixed { delivered: usize },
    /// Voice packet of a call that is not in a conference
    NoConference,
}

/// Connects the detector, the transcoder and the conference registry
pub struct MediaRouter {
    conference_codec: CodecType,
    transcoder: Arc<TranscodingService>,
    dtmf: Arc<DtmfDetector>,
    conferences: Arc<ConferenceRegistry>,
}

impl MediaRouter {
    pub fn new(
        conference_codec: CodecType,
        transcoder: Arc<TranscodingService>,
        dtmf: Arc<DtmfDetector>,
        conferences: Arc<ConferenceRegistry>,
    ) -> Self {
        Self {
            conference_codec,
            transcoder,
            dtmf,
            conferences,
        }
    }

    /// Route a packet received from `participant_id` in `room_id`, encoded
    /// with `codec`. Codec failures drop the packet and are returned.
    pub fn route_packet(
        &self,
        room_id: &str,
        participant_id: &str,
        packet: &RtpPacket,
        codec: CodecType,
    ) -> Result<MediaOutcome> {
        if packet.header.payload_type == self.dtmf.payload_type() {
            let event = self.dtmf.handle_session_dtmf(packet, Some(participant_id))?;
            return Ok(MediaOutcome::Dtmf(event));
        }

        if !self.conferences.contains_room(room_id) {
            trace!("No conference {} for packet from {}", room_id, participant_id);
            return Ok(MediaOutcome::NoConference);
        }

        let delivered = if codec == self.conference_codec {
            self.conferences.process_rtp_packet(room_id, participant_id, packet)?
        } else {
            trace!("Transcoding {} -> {} for {} in {}", codec, self.conference_codec, participant_id, room_id);
            let converted = self
                .transcoder
                .transcode(packet, codec, self.conference_codec)
                .map_err(|e| {
                    warn!("Dropping packet from {} in {}: {}", participant_id, room_id, e);
                    e
                })?;
            self.conferences.process_rtp_packet(room_id, participant_id, &converted)?
        };

        Ok(MediaOutcome::Mixed { delivered })
    }

    /// Route a packet read from a call's media socket
    pub fn route_inbound(&self, inbound: &InboundRtp) -> Result<MediaOutcome> {
        self.route_packet(&inbound.call_id, &inbound.call_id, &inbound.packet, inbound.codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sipmesh_media_core::DtmfTone;

    fn router() -> MediaRouter {
        MediaRouter::new(
            CodecType::Pcmu,
            Arc::new(TranscodingService::new()),
            Arc::new(DtmfDetector::default()),
            Arc::new(ConferenceRegistry::default()),
        )
    }

    #[tokio::test]
    async fn test_dtmf_packets_bypass_conference() {
        let router = router();
        let packet = RtpPacket::new_with_payload(101, 1, 0, 1, Bytes::from_static(&[10, 0x80, 0, 160]));
        match router.route_packet("room", "a", &packet, CodecType::Pcmu).unwrap() {
            MediaOutcome::Dtmf(Some(event)) => {
                assert_eq!(event.tone, DtmfTone::Star);
                assert_eq!(event.session_id.as_deref(), Some("a"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_voice_without_conference_is_not_mixed() {
        let router = router();
        let inbound = InboundRtp {
            call_id: "call-1".to_string(),
            codec: CodecType::Pcmu,
            packet: RtpPacket::new_with_payload(0, 1, 0, 1, Bytes::from_static(&[0xFF; 160])),
        };
        assert_eq!(router.route_inbound(&inbound).unwrap(), MediaOutcome::NoConference);
    }

    #[test]
    fn test_inbound_call_joins_its_room() {
        let router = router();
        router.conferences.create_room("call-1").unwrap();
        let _caller = router.conferences.join_room("call-1", "call-1").unwrap();
        let mut listener = router.conferences.join_room("call-1", "bridge").unwrap();

        let inbound = InboundRtp {
            call_id: "call-1".to_string(),
            codec: CodecType::Pcmu,
            packet: RtpPacket::new_with_payload(0, 5, 800, 1, Bytes::from_static(&[0xFF; 160])),
        };
        assert_eq!(router.route_inbound(&inbound).unwrap(), MediaOutcome::Mixed { delivered: 1 });
        assert_eq!(listener.try_recv().unwrap().header.sequence_number, 5);
    }

    #[test]
    fn test_voice_packets_are_mixed() {
        let router = router();
        router.conferences.create_room("room").unwrap();
        let _a = router.conferences.join_room("room", "a").unwrap();
        let mut b = router.conferences.join_room("room", "b").unwrap();

        let packet = RtpPacket::new_with_payload(0, 1, 0, 1, Bytes::from_static(&[0xFF; 160]));
        let outcome = router.route_packet("room", "a", &packet, CodecType::Pcmu).unwrap();
        assert_eq!(outcome, MediaOutcome::Mixed { delivered: 1 });
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_unimplemented_source_codec_is_dropped() {
        let router = router();
        router.conferences.create_room("room").unwrap();
        let _a = router.conferences.join_room("room", "a").unwrap();
        let mut b = router.conferences.join_room("room", "b").unwrap();

        let packet = RtpPacket::new_with_payload(111, 1, 0, 1, Bytes::from_static(&[1, 2, 3]));
        assert!(router.route_packet("room", "a", &packet, CodecType::Opus).is_err());
        assert!(b.try_recv().is_err());
    }
}
