//! Segment decoding
//!
//! Segments arrive as base64 interleaved little-endian PCM16. They are
//! decoded into planar stereo `f32` at the segment's own rate; the
//! renderer resamples on playback when that differs from the engine rate.

use driftproto::AudioSegment;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Payload(String),

    #[error("payload of {bytes} bytes is not a whole number of {channels}-channel PCM16 frames")]
    Truncated { bytes: usize, channels: u16 },

    #[error("segment contains no audio")]
    Empty,
}

/// Decoded stereo PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl PcmBuffer {
    /// Build from planar channels; the longer channel is truncated.
    pub fn from_planar(sample_rate: u32, mut left: Vec<f32>, mut right: Vec<f32>) -> Self {
        let frames = left.len().min(right.len());
        left.truncate(frames);
        right.truncate(frames);
        Self {
            sample_rate: sample_rate.max(1),
            left,
            right,
        }
    }

    /// A buffer of silence, handy for scheduling tests.
    pub fn silence(sample_rate: u32, frames: usize) -> Self {
        Self::from_planar(sample_rate, vec![0.0; frames], vec![0.0; frames])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    /// Duration in seconds at the buffer's own rate.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }
}

/// Decode one segment to stereo PCM.
///
/// Mono segments are duplicated to both channels; channels beyond the
/// first two are discarded.
pub fn decode_segment(segment: &AudioSegment) -> Result<PcmBuffer, DecodeError> {
    let format = segment.format();
    let bytes = segment
        .payload()
        .map_err(|e| DecodeError::Payload(e.to_string()))?;

    let channels = format.channels.max(1) as usize;
    let frame_bytes = channels * 2;
    if bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::Truncated {
            bytes: bytes.len(),
            channels: format.channels,
        });
    }

    let frames = bytes.len() / frame_bytes;
    if frames == 0 {
        return Err(DecodeError::Empty);
    }

    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in bytes.chunks_exact(frame_bytes) {
        let l = pcm16_to_f32(frame[0], frame[1]);
        let r = if channels > 1 {
            pcm16_to_f32(frame[2], frame[3])
        } else {
            l
        };
        left.push(l);
        right.push(r);
    }

    Ok(PcmBuffer::from_planar(format.sample_rate, left, right))
}

#[inline]
fn pcm16_to_f32(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 32768.0
}
