//! 16-bit PCM conversion and the base64 transport encoding used by the
//! live session.
//!
//! Wire format in both directions: signed 16-bit little-endian, mono.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{BridgeError, Result};

/// Scale between float samples in [-1, 1] and i16 samples.
pub const PCM_SCALE: f32 = 32768.0;

/// Mime type for raw PCM at a given sample rate, e.g. `audio/pcm;rate=16000`.
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert one float sample to i16, saturating outside [-1, 1).
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    (sample * PCM_SCALE).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[inline]
pub fn i16_to_float(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// One captured chunk, ready to be sent on the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// base64 of the little-endian i16 samples
    pub data: String,
    pub mime_type: String,
    pub sample_count: usize,
}

/// Pack float samples as little-endian i16 bytes.
pub fn pack_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        buf.put_i16_le(float_to_i16(s));
    }
    buf.freeze()
}

/// Encode a captured chunk into a transport frame.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> EncodedFrame {
    let raw = pack_pcm16(samples);
    EncodedFrame {
        data: STANDARD.encode(&raw),
        mime_type: pcm_mime(sample_rate),
        sample_count: samples.len(),
    }
}

/// Unpack little-endian i16 bytes into float samples.
///
/// The byte length must be even.
pub fn unpack_pcm16(raw: Bytes) -> Result<Vec<f32>> {
    if raw.len() % 2 != 0 {
        return Err(BridgeError::Decode(format!(
            "odd PCM16 byte length: {}",
            raw.len()
        )));
    }
    let mut raw = raw;
    let mut samples = Vec::with_capacity(raw.len() / 2);
    while raw.remaining() >= 2 {
        samples.push(i16_to_float(raw.get_i16_le()));
    }
    Ok(samples)
}

/// Decode a base64 output segment into float samples.
pub fn decode_segment(data: &str) -> Result<Vec<f32>> {
    let raw = STANDARD
        .decode(data.trim())
        .map_err(|e| BridgeError::Decode(format!("invalid base64: {}", e)))?;
    unpack_pcm16(Bytes::from(raw))
}
