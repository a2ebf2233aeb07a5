//! Codec transcoding service
//!
//! Each packet is decoded to normalised samples, passed through a mixer
//! dedicated to its `(source, target)` codec pair and re-encoded. Mixers are
//! created lazily, once per pair, and reused for every later packet.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::codec::CodecType;
use crate::error::Result;
use crate::mixer::{AudioMixer, Mixer, MixerConfig};
use crate::rtp::{self, RtpPacket};

const TRANSCODE_SOURCE: &str = "source";

/// Cache key for transcoding mixers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecKey {
    pub source: CodecType,
    pub target: CodecType,
}

impl CodecKey {
    pub fn new(source: CodecType, target: CodecType) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for CodecKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

type SharedMixer = Arc<Mutex<AudioMixer>>;

/// Converts RTP payloads between codecs
#[derive(Default)]
pub struct TranscodingService {
    mixers: RwLock<HashMap<CodecKey, SharedMixer>>,
}

impl TranscodingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcode a packet named by codec strings (`"PCMU"`, `"audio/opus"`, ...)
    pub fn transcode_packet(
        &self,
        packet: &RtpPacket,
        source_codec: &str,
        target_codec: &str,
    ) -> Result<RtpPacket> {
        let source = source_codec.parse::<CodecType>()?;
        let target = target_codec.parse::<CodecType>()?;
        self.transcode(packet, source, target)
    }

    /// Transcode a packet between two known codecs.
    ///
    /// The returned packet keeps the original header; only the payload changes.
    pub fn transcode(&self, packet: &RtpPacket, source: CodecType, target: CodecType) -> Result<RtpPacket> {
        let key = CodecKey::new(source, target);
        trace!("Transcoding {} bytes {}", packet.payload.len(), key);

        let samples = source.decode(&packet.payload)?;

        let mixed = {
            let mixer = self.mixer_for(key)?;
            let mut mixer = mixer.lock();
            mixer.add_samples(TRANSCODE_SOURCE, &samples)?;
            mixer.mix()
        };

        let payload = target.encode(&mixed)?;
        Ok(rtp::with_payload(packet, payload))
    }

    /// Number of codec pairs with a cached mixer
    pub fn mixer_count(&self) -> usize {
        self.mixers.read().len()
    }

    fn mixer_for(&self, key: CodecKey) -> Result<SharedMixer> {
        if let Some(mixer) = self.mixers.read().get(&key) {
            return Ok(mixer.clone());
        }

        let mut mixers = self.mixers.write();
        // Another flow may have created it between the two locks
        if let Some(mixer) = mixers.get(&key) {
            return Ok(mixer.clone());
        }

        let mut mixer = AudioMixer::new(MixerConfig::pass_through());
        mixer.add_source(TRANSCODE_SOURCE)?;
        let mixer = Arc::new(Mutex::new(mixer));
        mixers.insert(key, mixer.clone());
        debug!("Created transcoding mixer for {}", key);
        Ok(mixer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::error::Error;
    use crate::rtp::RtpHeader;

    fn pcmu_packet(payload: &[u8]) -> RtpPacket {
        RtpPacket::new(RtpHeader::new(0, 42, 8000, 0xDEADBEEF), Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_pcmu_to_pcmu_is_lossless_for_coded_values() {
        let service = TranscodingService::new();
        let payload: Vec<u8> = (0..=255u8).filter(|b| *b != 0x7F).collect();
        let packet = pcmu_packet(&payload);

        let out = service.transcode_packet(&packet, "PCMU", "pcmu").unwrap();
        assert_eq!(out.header, packet.header);
        assert_eq!(&out.payload[..], &payload[..]);
    }

    #[test]
    fn test_mixer_created_once_per_pair() {
        let service = TranscodingService::new();
        let packet = pcmu_packet(&[0xFF; 160]);

        service.transcode_packet(&packet, "PCMU", "PCMU").unwrap();
        service.transcode_packet(&packet, "audio/PCMU", "PCMU").unwrap();
        assert_eq!(service.mixer_count(), 1);
    }

    #[test]
    fn test_unsupported_codec_is_named_error() {
        let service = TranscodingService::new();
        let packet = pcmu_packet(&[0xFF; 4]);
        let err = service.transcode_packet(&packet, "PCMU", "G722").unwrap_err();
        assert!(matches!(err, Error::UnsupportedCodec(_)));
        assert_eq!(service.mixer_count(), 0);
    }

    #[test]
    fn test_unimplemented_target_never_returns_audio() {
        let service = TranscodingService::new();
        let packet = pcmu_packet(&[0xFF; 4]);
        let err = service.transcode_packet(&packet, "PCMU", "opus").unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
        assert!(err.is_codec_failure());

        let err = service.transcode_packet(&packet, "PCMA", "PCMU").unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }
}
