//! Stereo delay line with feedback

/// Longest delay the line can hold, in seconds.
pub const MAX_DELAY_SECONDS: f32 = 1.0;

/// Feedback ceiling; anything higher risks runaway gain.
pub const MAX_FEEDBACK: f32 = 0.95;

/// Fixed-capacity delay line with fractional read position.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    max_delay: f32,
}

impl DelayLine {
    pub fn new(sample_rate: u32) -> Self {
        let max_delay = (sample_rate as f32 * MAX_DELAY_SECONDS).ceil();
        let len = max_delay as usize + 2;
        Self {
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            write_pos: 0,
            max_delay,
        }
    }

    /// Maximum delay in samples.
    pub fn max_delay_samples(&self) -> f32 {
        self.max_delay
    }

    /// Linearly interpolated read `delay` samples behind the write head.
    #[inline]
    fn read(&self, delay: f32) -> (f32, f32) {
        let len = self.buffer_l.len();
        let delay = delay.clamp(1.0, self.max_delay);
        let whole = delay.floor();
        let frac = delay - whole;

        let i0 = (self.write_pos + len - whole as usize) % len;
        let i1 = (i0 + len - 1) % len;

        let l = self.buffer_l[i0] + (self.buffer_l[i1] - self.buffer_l[i0]) * frac;
        let r = self.buffer_r[i0] + (self.buffer_r[i1] - self.buffer_r[i0]) * frac;
        (l, r)
    }

    #[inline]
    fn write(&mut self, left: f32, right: f32) {
        self.buffer_l[self.write_pos] = left;
        self.buffer_r[self.write_pos] = right;
        self.write_pos = (self.write_pos + 1) % self.buffer_l.len();
    }

    /// Push one frame through the line; returns the delayed output.
    ///
    /// The output is fed back into the line scaled by `feedback`, which is
    /// clamped to `0..=0.95`. Delays shorter than one sample read one sample.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32, delay_samples: f32, feedback: f32) -> (f32, f32) {
        let feedback = feedback.clamp(0.0, MAX_FEEDBACK);
        let (dl, dr) = self.read(delay_samples);
        self.write(left + dl * feedback, right + dr * feedback);
        (dl, dr)
    }

    pub fn reset(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_comes_back_after_delay() {
        let mut line = DelayLine::new(1_000);
        let mut out = Vec::new();
        for i in 0..20 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            out.push(line.process(x, -x, 10.0, 0.0));
        }
        assert_eq!(out[10], (1.0, -1.0));
        assert_eq!(out[9], (0.0, 0.0));
        assert_eq!(out[11], (0.0, 0.0));
    }

    #[test]
    fn test_feedback_repeats_decay() {
        let mut line = DelayLine::new(1_000);
        let mut taps = Vec::new();
        for i in 0..40 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            let (l, _) = line.process(x, x, 10.0, 0.5);
            if l != 0.0 {
                taps.push(l);
            }
        }
        assert_eq!(taps, vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_feedback_is_capped() {
        let mut line = DelayLine::new(100);
        let mut last = 0.0;
        for i in 0..10_000 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            let (l, _) = line.process(x, x, 5.0, 4.0);
            if l != 0.0 {
                last = l;
            }
        }
        assert!(last < 1.0);
    }

    #[test]
    fn test_fractional_delay_interpolates() {
        let mut line = DelayLine::new(1_000);
        let mut out = Vec::new();
        for i in 0..10 {
            let x = if i == 0 { 1.0 } else { 0.0 };
            out.push(line.process(x, x, 2.5, 0.0).0);
        }
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_delay_is_capped_at_line_length() {
        let line = DelayLine::new(48_000);
        assert_eq!(line.max_delay_samples(), 48_000.0);
    }
}
