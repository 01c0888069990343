//! Synthesized impulse responses
//!
//! Both convolution paths use decaying white noise instead of recorded
//! rooms: `sample[i] = uniform(-1, 1) * (1 - i/N)^decay`, drawn
//! independently for each channel so the tail decorrelates left and right.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shape of a synthesized impulse response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseSpec {
    pub duration_secs: f64,
    /// Exponent of the envelope; larger is a faster fade.
    pub decay: f64,
}

impl ImpulseSpec {
    /// Long, diffuse tail for the reverb send.
    pub const REVERB: ImpulseSpec = ImpulseSpec {
        duration_secs: 3.0,
        decay: 2.0,
    };

    /// Short coloration for the rotating wet path.
    pub const SPATIAL: ImpulseSpec = ImpulseSpec {
        duration_secs: 0.5,
        decay: 6.0,
    };

    pub fn new(duration_secs: f64, decay: f64) -> Self {
        Self {
            duration_secs,
            decay,
        }
    }

    /// Length in frames, never zero.
    pub fn frames(&self, sample_rate: u32) -> usize {
        ((self.duration_secs.max(0.0) * sample_rate as f64).round() as usize).max(1)
    }
}

/// Stereo impulse response.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub sample_rate: u32,
    pub channels: [Vec<f32>; 2],
}

impl ImpulseResponse {
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }
}

/// Generate a stereo impulse response from `rng`.
pub fn generate_impulse<R: Rng>(
    sample_rate: u32,
    spec: ImpulseSpec,
    rng: &mut R,
) -> ImpulseResponse {
    let n = spec.frames(sample_rate);
    let channels = [channel(n, spec.decay, rng), channel(n, spec.decay, rng)];
    ImpulseResponse {
        sample_rate,
        channels,
    }
}

/// Generate a reproducible impulse response.
pub fn generate_seeded(sample_rate: u32, spec: ImpulseSpec, seed: u64) -> ImpulseResponse {
    let mut rng = StdRng::seed_from_u64(seed);
    generate_impulse(sample_rate, spec, &mut rng)
}

fn channel<R: Rng>(n: usize, decay: f64, rng: &mut R) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let envelope = (1.0 - i as f64 / n as f64).powf(decay);
            (rng.gen_range(-1.0f64..1.0) * envelope) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_matches_duration() {
        let ir = generate_seeded(48_000, ImpulseSpec::REVERB, 1);
        assert_eq!(ir.frames(), 144_000);
        assert_eq!(ir.channels[1].len(), 144_000);

        let ir = generate_seeded(48_000, ImpulseSpec::SPATIAL, 1);
        assert_eq!(ir.frames(), 24_000);
    }

    #[test]
    fn test_samples_stay_under_envelope() {
        let spec = ImpulseSpec::new(0.1, 3.0);
        let ir = generate_seeded(10_000, spec, 7);
        let n = ir.frames();
        for ch in &ir.channels {
            for (i, s) in ch.iter().enumerate() {
                let envelope = (1.0 - i as f64 / n as f64).powf(3.0) as f32;
                assert!(s.abs() <= envelope + 1e-6);
            }
        }
    }

    #[test]
    fn test_channels_are_independent() {
        let ir = generate_seeded(8_000, ImpulseSpec::SPATIAL, 3);
        assert_ne!(ir.channels[0], ir.channels[1]);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = generate_seeded(8_000, ImpulseSpec::SPATIAL, 42);
        let b = generate_seeded(8_000, ImpulseSpec::SPATIAL, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn test_zero_duration_still_has_a_frame() {
        let ir = generate_seeded(48_000, ImpulseSpec::new(0.0, 2.0), 0);
        assert_eq!(ir.frames(), 1);
    }
}
