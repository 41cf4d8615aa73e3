//! # PCM Sample Conversion
//!
//! Converts between floating-point samples (as delivered by the browser's audio
//! graph) and signed 16-bit PCM (as expected by the realtime speech service).
//!
//! ## Conversion Rules:
//! - **Clamp**: samples are clamped to `[-1.0, 1.0]` before scaling
//! - **Scale**: the clamped value is multiplied by 32767, not 32768, so both
//!   boundaries map symmetrically to ±32767 and -32768 is never produced
//! - **Round**: half away from zero (`f32::round`)
//! - **NaN**: always encodes to 0
//!
//! ## Wire Format:
//! - **Input chunks**: 32-bit IEEE float, little-endian
//! - **Encoded frames**: 16-bit signed integer, little-endian

use byteorder::{ByteOrder, LittleEndian};

/// Scale factor between a unit-range float sample and 16-bit PCM.
pub const PCM_SCALE: f32 = 32767.0;

/// Bytes per encoded 16-bit sample.
pub const BYTES_PER_PCM_SAMPLE: usize = 2;

/// Bytes per incoming 32-bit float sample.
pub const BYTES_PER_FLOAT_SAMPLE: usize = 4;

/// Encode one floating-point sample as signed 16-bit PCM.
///
/// ## Examples:
/// - `encode_sample(1.0) == 32767`
/// - `encode_sample(-1.0) == -32767`
/// - `encode_sample(0.5) == 16384` (16383.5 rounds away from zero)
/// - `encode_sample(f32::NAN) == 0`
pub fn encode_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }

    (sample.clamp(-1.0, 1.0) * PCM_SCALE).round() as i16
}

/// Decode a 16-bit PCM sample back to the `[-1.0, 1.0]` float range.
///
/// Inverse of [`encode_sample`] within `1 / 32767`.
pub fn decode_sample(value: i16) -> f32 {
    value as f32 / PCM_SCALE
}

/// Parse a binary chunk of little-endian `f32` samples.
///
/// ## Returns:
/// - **Ok(Vec<f32>)**: the decoded samples (empty for an empty payload)
/// - **Err(String)**: the payload length is not a whole number of samples
pub fn samples_from_le_bytes(data: &[u8]) -> Result<Vec<f32>, String> {
    if data.len() % BYTES_PER_FLOAT_SAMPLE != 0 {
        return Err(format!(
            "Audio chunk length {} is not a multiple of {} bytes (32-bit float samples)",
            data.len(),
            BYTES_PER_FLOAT_SAMPLE
        ));
    }

    let mut samples = vec![0.0f32; data.len() / BYTES_PER_FLOAT_SAMPLE];
    LittleEndian::read_f32_into(data, &mut samples);
    Ok(samples)
}

/// One completed frame of 16-bit PCM audio.
///
/// Frames are produced only by the accumulator once its buffer fills up and
/// are handed to the consumer by value. `sequence` starts at 0 for the first
/// frame of a capture session and increases by one per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    sequence: u64,
    samples: Vec<i16>,
}

impl EncodedFrame {
    pub(crate) fn new(sequence: u64, samples: Vec<i16>) -> Self {
        Self { sequence, samples }
    }

    /// Position of this frame within its capture session.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The encoded samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in the frame.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Serialize to raw little-endian PCM bytes for the transport.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.samples.len() * BYTES_PER_PCM_SAMPLE];
        LittleEndian::write_i16_into(&self.samples, &mut bytes);
        bytes
    }
}
