//! Recording of the master bus
//!
//! The render thread copies the post-volume mix into the tap ring while
//! recording is on. The engine actor drains the ring on a timer and, when
//! recording stops, encodes everything captured as a 16-bit stereo WAV.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;
use tracing::{debug, info};

use crate::master::TapReader;

/// How often the actor empties the tap ring while recording.
pub const DRAIN_INTERVAL_MS: u64 = 250;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("failed to encode WAV: {0}")]
    Wav(#[from] hound::Error),
}

/// A finished take.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub wav: Vec<u8>,
    pub prompts: Vec<String>,
    pub frames: usize,
}

pub struct Recorder {
    sample_rate: u32,
    tap: TapReader,
    /// Interleaved stereo; `Some` while recording.
    samples: Option<Vec<f32>>,
    prompts: Vec<String>,
}

impl Recorder {
    pub fn new(sample_rate: u32, tap: TapReader) -> Self {
        Self {
            sample_rate,
            tap,
            samples: None,
            prompts: Vec::new(),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.samples.is_some()
    }

    /// Frames captured so far in the current take.
    pub fn frames(&self) -> usize {
        self.samples.as_ref().map_or(0, |s| s.len() / 2)
    }

    /// Begin a take. Returns false if one is already running.
    pub fn start(&mut self, prompts: Vec<String>) -> bool {
        if self.is_recording() {
            return false;
        }
        // Leftovers from a previous take's last block.
        let stale = self.discard();
        if stale > 0 {
            debug!(stale, "discarded stale tap samples");
        }
        self.samples = Some(Vec::with_capacity(self.sample_rate as usize * 2 * 10));
        self.prompts = prompts;
        info!(prompts = self.prompts.len(), "recording started");
        true
    }

    /// Move whatever the render thread has produced into the take.
    pub fn drain(&mut self) -> usize {
        let Some(samples) = self.samples.as_mut() else {
            return 0;
        };
        let available = self.tap.slots();
        if available == 0 {
            return 0;
        }
        match self.tap.read_chunk(available) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                samples.extend_from_slice(first);
                samples.extend_from_slice(second);
                chunk.commit_all();
                available
            }
            Err(_) => 0,
        }
    }

    /// End the take and encode it. `Ok(None)` if nothing was recording.
    pub fn stop(&mut self) -> Result<Option<Recording>, RecorderError> {
        if !self.is_recording() {
            return Ok(None);
        }
        self.drain();
        let samples = self.samples.take().unwrap_or_default();
        let prompts = std::mem::take(&mut self.prompts);

        let wav = encode_wav(&samples, self.sample_rate)?;
        let frames = samples.len() / 2;
        info!(
            frames,
            secs = frames as f64 / self.sample_rate as f64,
            bytes = wav.len(),
            "recording finished"
        );
        Ok(Some(Recording {
            wav,
            prompts,
            frames,
        }))
    }

    fn discard(&mut self) -> usize {
        let available = self.tap.slots();
        match self.tap.read_chunk(available) {
            Ok(chunk) => {
                chunk.commit_all();
                available
            }
            Err(_) => 0,
        }
    }
}

/// Interleaved stereo `f32` to 16-bit PCM WAV bytes.
pub fn encode_wav(interleaved: &[f32], sample_rate: u32) -> Result<Vec<u8>, RecorderError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for frame in interleaved.chunks_exact(2) {
        for &s in frame {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    #[test]
    fn test_take_encodes_captured_frames() {
        let (mut tx, rx) = RingBuffer::new(64);
        let mut recorder = Recorder::new(8_000, rx);

        // not recording: stale samples are discarded at start
        tx.push(0.9).unwrap();
        assert!(recorder.start(vec!["warm pads".to_string()]));
        assert!(!recorder.start(Vec::new()));

        for s in [0.5, -0.5, 0.25, -0.25] {
            tx.push(s).unwrap();
        }
        assert_eq!(recorder.drain(), 4);
        tx.push(1.0).unwrap();
        tx.push(-1.0).unwrap();

        let take = recorder.stop().unwrap().unwrap();
        assert_eq!(take.frames, 3);
        assert_eq!(take.prompts, vec!["warm pads".to_string()]);
        assert!(!recorder.is_recording());

        let reader = hound::WavReader::new(Cursor::new(take.wav)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8_000);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0], (0.5 * i16::MAX as f32) as i16);
        assert_eq!(samples[5], -i16::MAX);
    }

    #[test]
    fn test_stop_without_take_is_none() {
        let (_tx, rx) = RingBuffer::<f32>::new(8);
        let mut recorder = Recorder::new(8_000, rx);
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(recorder.drain(), 0);
    }
}
