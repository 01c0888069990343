//! Audio engine clock
//!
//! Time on the engine is the number of frames the renderer has produced,
//! not wall time. The render thread is the only writer; control code reads
//! it to decide where in the future to schedule sources and automation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Frames rendered per processing block.
pub const RENDER_QUANTUM: usize = 128;

/// Shared frame counter, readable from any thread.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Engine time in seconds.
    pub fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// First frame at or after `secs`. Negative times map to frame 0.
    pub fn secs_to_frame(&self, secs: f64) -> u64 {
        secs_to_frame(secs, self.sample_rate)
    }

    /// Called by the renderer after each block.
    pub(crate) fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Release);
    }
}

pub(crate) fn secs_to_frame(secs: f64, sample_rate: u32) -> u64 {
    if !secs.is_finite() || secs <= 0.0 {
        return 0;
    }
    (secs * sample_rate as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_tracks_rendered_frames() {
        let clock = FrameClock::new(48_000);
        assert_eq!(clock.now(), 0.0);

        clock.advance(24_000);
        assert_eq!(clock.frames(), 24_000);
        assert!((clock.now() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_clones_share_the_counter() {
        let clock = FrameClock::new(48_000);
        let reader = clock.clone();
        clock.advance(RENDER_QUANTUM as u64);
        assert_eq!(reader.frames(), 128);
    }

    #[test]
    fn test_secs_to_frame_rounds_and_floors_at_zero() {
        let clock = FrameClock::new(48_000);
        assert_eq!(clock.secs_to_frame(0.1), 4_800);
        assert_eq!(clock.secs_to_frame(-3.0), 0);
        assert_eq!(clock.secs_to_frame(f64::NAN), 0);
    }
}
