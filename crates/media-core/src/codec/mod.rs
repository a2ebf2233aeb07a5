//! Codec identification and sample conversion
//!
//! Payloads are converted to and from a canonical buffer of `f32` samples
//! normalised to `[-1.0, 1.0]`. Only μ-law (PCMU) has a sample conversion;
//! A-law and Opus are recognised names that fail with
//! [`Error::NotImplemented`] instead of producing wrong audio.

pub mod g711;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Codecs known to the media pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecType {
    /// G.711 μ-law
    Pcmu,
    /// G.711 A-law
    Pcma,
    /// Opus
    Opus,
}

impl CodecType {
    /// Encoding name as it appears in `a=rtpmap`
    pub fn name(&self) -> &'static str {
        match self {
            CodecType::Pcmu => "PCMU",
            CodecType::Pcma => "PCMA",
            CodecType::Opus => "opus",
        }
    }

    /// Static (or conventional dynamic) RTP payload type
    pub fn payload_type(&self) -> u8 {
        match self {
            CodecType::Pcmu => 0,
            CodecType::Pcma => 8,
            CodecType::Opus => 111,
        }
    }

    /// RTP clock rate in Hz
    pub fn clock_rate(&self) -> u32 {
        match self {
            CodecType::Pcmu | CodecType::Pcma => 8000,
            CodecType::Opus => 48000,
        }
    }

    /// Look up a codec by its static payload type
    pub fn from_payload_type(pt: u8) -> Option<Self> {
        match pt {
            0 => Some(CodecType::Pcmu),
            8 => Some(CodecType::Pcma),
            111 => Some(CodecType::Opus),
            _ => None,
        }
    }

    /// Decode an encoded payload into normalised samples
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<f32>> {
        match self {
            CodecType::Pcmu => Ok(g711::decode_ulaw_frame(payload)),
            CodecType::Pcma => Err(Error::not_implemented("PCMA to samples conversion")),
            CodecType::Opus => Err(Error::not_implemented("Opus to samples conversion")),
        }
    }

    /// Encode normalised samples into a payload
    pub fn encode(&self, samples: &[f32]) -> Result<Vec<u8>> {
        match self {
            CodecType::Pcmu => g711::encode_ulaw_frame(samples),
            CodecType::Pcma => Err(Error::not_implemented("samples to PCMA conversion")),
            CodecType::Opus => Err(Error::not_implemented("samples to Opus conversion")),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CodecType {
    type Err = Error;

    /// Accepts encoding names and MIME types, case-insensitively
    /// (`"PCMU"`, `"pcmu"`, `"audio/PCMU"`, `"opus"`).
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        let name = match name.split_once('/') {
            Some((kind, rest)) if kind.eq_ignore_ascii_case("audio") => rest,
            _ => name,
        };
        if name.eq_ignore_ascii_case("pcmu") {
            Ok(CodecType::Pcmu)
        } else if name.eq_ignore_ascii_case("pcma") {
            Ok(CodecType::Pcma)
        } else if name.eq_ignore_ascii_case("opus") {
            Ok(CodecType::Opus)
        } else {
            Err(Error::UnsupportedCodec(s.to_string()))
        }
    }
}
