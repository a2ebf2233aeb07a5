//! G.711 μ-law codec
//!
//! μ-law (PCMU) companding as defined by ITU-T G.711: a 16-bit linear sample
//! is biased, split into a sign bit, a 3-bit segment (exponent) and a 4-bit
//! quantisation step (mantissa), and the resulting byte is inverted for
//! transmission. One byte per sample, no framing.

use crate::error::{Error, Result};

/// Bias added to the magnitude before segment search
pub const ULAW_BIAS: i32 = 0x84;

/// Largest magnitude that survives biasing without overflowing 15 bits
pub const ULAW_CLIP: i32 = 32635;

const SIGN_BIT: u8 = 0x80;
const SEGMENT_MASK: u8 = 0x70;
const SEGMENT_SHIFT: u8 = 4;
const QUANT_MASK: u8 = 0x0F;

/// Scale between `i16` samples and normalised `f32` samples
const PCM_SCALE: f32 = 32768.0;

/// Encode a 16-bit linear PCM sample to 8-bit μ-law
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        SIGN_BIT
    } else {
        0
    };

    if magnitude > ULAW_CLIP {
        magnitude = ULAW_CLIP;
    }
    magnitude += ULAW_BIAS;

    // Segment is the position of the highest set bit above bit 7
    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) as u8) & QUANT_MASK;
    !(sign | (exponent << SEGMENT_SHIFT) | mantissa)
}

/// Decode an 8-bit μ-law sample to 16-bit linear PCM
pub fn ulaw_to_linear(encoded: u8) -> i16 {
    let value = !encoded;
    let exponent = (value & SEGMENT_MASK) >> SEGMENT_SHIFT;
    let mantissa = (value & QUANT_MASK) as i32;

    let magnitude = (((mantissa << 3) + ULAW_BIAS) << exponent) - ULAW_BIAS;
    if value & SIGN_BIT != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Convert a normalised sample to `i16`, clamping out-of-range values
fn to_pcm(sample: f32) -> i16 {
    (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Decode a PCMU payload into normalised samples, one per byte
pub fn decode_ulaw_frame(payload: &[u8]) -> Vec<f32> {
    payload
        .iter()
        .map(|&byte| ulaw_to_linear(byte) as f32 / PCM_SCALE)
        .collect()
}

/// Encode normalised samples into a PCMU payload, one byte per sample.
///
/// Non-finite samples are rejected rather than encoded as noise.
pub fn encode_ulaw_frame(samples: &[f32]) -> Result<Vec<u8>> {
    samples
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            if value.is_finite() {
                Ok(linear_to_ulaw(to_pcm(value)))
            } else {
                Err(Error::InvalidSample { index, value })
            }
        })
        .collect()
}
