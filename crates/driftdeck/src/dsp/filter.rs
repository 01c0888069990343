//! Lowpass filter and the mapping from normalized controls to Hz / Q

use std::f32::consts::PI;

/// Lowest cutoff the normalized control reaches.
pub const MIN_CUTOFF_HZ: f32 = 40.0;

/// Q range reached by the normalized resonance control.
pub const MIN_Q: f32 = 0.1;
pub const MAX_Q: f32 = 20.0;

/// Normalized cutoff to Hz: `40 * (nyquist / 40)^value`.
pub fn cutoff_hz(value: f32, sample_rate: u32) -> f32 {
    let nyquist = sample_rate as f32 / 2.0;
    let value = value.clamp(0.0, 1.0);
    MIN_CUTOFF_HZ * (nyquist / MIN_CUTOFF_HZ).powf(value)
}

/// Normalized resonance to Q, linear over `0.1..=20`.
pub fn resonance_q(value: f32) -> f32 {
    MIN_Q + value.clamp(0.0, 1.0) * (MAX_Q - MIN_Q)
}

/// Two-pole (12dB/octave) state-variable lowpass, stereo.
///
/// A cutoff at Nyquist passes the signal through untouched.
#[derive(Debug, Clone)]
pub struct SvfLowpass {
    ic1eq: [f32; 2],
    ic2eq: [f32; 2],
    a1: f32,
    a2: f32,
    a3: f32,
    open: bool,
    sample_rate: u32,
}

impl SvfLowpass {
    pub fn new(sample_rate: u32) -> Self {
        let mut f = Self {
            ic1eq: [0.0; 2],
            ic2eq: [0.0; 2],
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            open: true,
            sample_rate: sample_rate.max(1),
        };
        f.set_params(sample_rate as f32 / 2.0, 0.707);
        f
    }

    pub fn set_params(&mut self, cutoff: f32, q: f32) {
        let nyquist = self.sample_rate as f32 / 2.0;
        self.open = cutoff >= nyquist * 0.999;
        if self.open {
            return;
        }

        // tan() blows up at Nyquist; 0.49 * sr keeps the coefficients finite.
        let cutoff = cutoff.clamp(10.0, self.sample_rate as f32 * 0.49);
        let q = q.clamp(MIN_Q, MAX_Q);

        let g = (PI * cutoff / self.sample_rate as f32).tan();
        let k = 1.0 / q;
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.open {
            return (left, right);
        }
        (self.tick(0, left), self.tick(1, right))
    }

    #[inline]
    fn tick(&mut self, ch: usize, input: f32) -> f32 {
        let v3 = input - self.ic2eq[ch];
        let v1 = self.a1 * self.ic1eq[ch] + self.a2 * v3;
        let v2 = self.ic2eq[ch] + self.a2 * self.ic1eq[ch] + self.a3 * v3;
        self.ic1eq[ch] = 2.0 * v1 - self.ic1eq[ch];
        self.ic2eq[ch] = 2.0 * v2 - self.ic2eq[ch];
        v2
    }

    pub fn reset(&mut self) {
        self.ic1eq = [0.0; 2];
        self.ic2eq = [0.0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_endpoints() {
        assert!((cutoff_hz(0.0, 48_000) - 40.0).abs() < 1e-3);
        assert!((cutoff_hz(1.0, 48_000) - 24_000.0).abs() < 0.5);
    }

    #[test]
    fn test_cutoff_is_log_linear() {
        // Halfway is the geometric mean of the endpoints.
        let mid = cutoff_hz(0.5, 48_000);
        let expected = (40.0f32 * 24_000.0).sqrt();
        assert!((mid - expected).abs() / expected < 1e-4);

        // Equal steps in the control give equal frequency ratios.
        let r1 = cutoff_hz(0.3, 48_000) / cutoff_hz(0.2, 48_000);
        let r2 = cutoff_hz(0.8, 48_000) / cutoff_hz(0.7, 48_000);
        assert!((r1 - r2).abs() < 1e-3);
    }

    #[test]
    fn test_cutoff_clamps_input() {
        assert_eq!(cutoff_hz(-1.0, 48_000), cutoff_hz(0.0, 48_000));
        assert_eq!(cutoff_hz(3.0, 48_000), cutoff_hz(1.0, 48_000));
    }

    #[test]
    fn test_resonance_range() {
        assert!((resonance_q(0.0) - 0.1).abs() < 1e-6);
        assert!((resonance_q(1.0) - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_open_filter_passes_through() {
        let mut f = SvfLowpass::new(48_000);
        f.set_params(24_000.0, 5.0);
        assert_eq!(f.process(0.3, -0.4), (0.3, -0.4));
    }

    #[test]
    fn test_lowpass_attenuates_high_frequencies() {
        let sr = 48_000;
        let mut f = SvfLowpass::new(sr);
        f.set_params(200.0, 0.707);

        // 10 kHz sine, measure steady-state peak
        let mut peak = 0.0f32;
        for i in 0..4_800 {
            let x = (2.0 * PI * 10_000.0 * i as f32 / sr as f32).sin();
            let (y, _) = f.process(x, x);
            if i > 2_400 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.01, "peak {}", peak);
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut f = SvfLowpass::new(48_000);
        f.set_params(1_000.0, 0.707);
        let mut y = 0.0;
        for _ in 0..48_000 {
            y = f.process(1.0, 1.0).0;
        }
        assert!((y - 1.0).abs() < 1e-3);
    }
}
