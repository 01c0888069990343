//! Partitioned FFT convolution
//!
//! Uniformly partitioned overlap-save: the impulse response is cut into
//! blocks of `block` frames, each transformed once at construction. Every
//! `block` input frames the newest input window is transformed, multiplied
//! against all partitions through a frequency-domain delay line, and
//! transformed back. Output lags input by exactly one block.
//!
//! All buffers are allocated in [`Convolver::new`]; `process` never
//! allocates.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::impulse::ImpulseResponse;

const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44_100.0;
const MIN_POWER: f32 = 0.000125;

/// Loudness-matching scale for an impulse response: quiet and loud
/// responses come out at a similar perceived level.
pub fn normalization_scale(ir: &ImpulseResponse) -> f32 {
    let len = ir.frames();
    if len == 0 {
        return 1.0;
    }
    let sum: f64 = ir
        .channels
        .iter()
        .flat_map(|ch| ch.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();
    let mut power = (sum / (ir.channels.len() * len) as f64).sqrt() as f32;
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    let mut scale = GAIN_CALIBRATION / power;
    if ir.sample_rate > 0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / ir.sample_rate as f32;
    }
    scale
}

struct ChannelState {
    /// Sliding window: previous block then current block.
    input: Vec<f32>,
    /// Ring of input spectra, `partitions * bins` long.
    fdl: Vec<Complex<f32>>,
    /// Transformed partitions of this channel's response.
    ir: Vec<Complex<f32>>,
    /// Output of the last completed block.
    output: Vec<f32>,
}

/// Stereo convolver; left input uses the response's first channel, right
/// input its second.
pub struct Convolver {
    block: usize,
    bins: usize,
    partitions: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    ifft: Arc<dyn ComplexToReal<f32>>,
    channels: [ChannelState; 2],
    time_buf: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    acc: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    ifft_scratch: Vec<Complex<f32>>,
    fdl_head: usize,
    pos: usize,
    silent_frames: usize,
    tail_frames: usize,
    failed_blocks: u64,
}

impl Convolver {
    /// Build a convolver for `ir` with the given partition size.
    ///
    /// With `normalize` the response is scaled by [`normalization_scale`].
    pub fn new(ir: &ImpulseResponse, block: usize, normalize: bool) -> Self {
        let block = block.max(1);
        let size = block * 2;
        let bins = block + 1;
        let partitions = ir.frames().div_ceil(block).max(1);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);

        let mut time_buf = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();
        let mut fft_scratch = fft.make_scratch_vec();
        let ifft_scratch = ifft.make_scratch_vec();

        // Fold the inverse transform's 1/N into the response.
        let gain = if normalize { normalization_scale(ir) } else { 1.0 } / size as f32;

        let mut make_channel = |response: &[f32]| {
            let mut spectra = vec![Complex::new(0.0, 0.0); partitions * bins];
            for p in 0..partitions {
                time_buf.fill(0.0);
                let start = p * block;
                let end = (start + block).min(response.len());
                if start < end {
                    time_buf[..end - start].copy_from_slice(&response[start..end]);
                }
                if fft
                    .process_with_scratch(&mut time_buf, &mut spectrum, &mut fft_scratch)
                    .is_ok()
                {
                    for (dst, src) in spectra[p * bins..(p + 1) * bins].iter_mut().zip(&spectrum) {
                        *dst = *src * gain;
                    }
                }
            }
            ChannelState {
                input: vec![0.0; size],
                fdl: vec![Complex::new(0.0, 0.0); partitions * bins],
                ir: spectra,
                output: vec![0.0; block],
            }
        };

        let channels = [make_channel(&ir.channels[0]), make_channel(&ir.channels[1])];

        Self {
            block,
            bins,
            partitions,
            fft,
            ifft,
            channels,
            time_buf,
            spectrum,
            acc: vec![Complex::new(0.0, 0.0); bins],
            fft_scratch,
            ifft_scratch,
            fdl_head: 0,
            pos: 0,
            silent_frames: usize::MAX,
            tail_frames: (partitions + 2) * block,
            failed_blocks: 0,
        }
    }

    /// Output delay in frames.
    pub fn latency(&self) -> usize {
        self.block
    }

    /// True once the input has been silent long enough that the tail has
    /// fully decayed; blocks are then skipped without any FFT work.
    pub fn is_idle(&self) -> bool {
        self.silent_frames >= self.tail_frames
    }

    pub fn failed_blocks(&self) -> u64 {
        self.failed_blocks
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let pos = self.pos;
        let out = (self.channels[0].output[pos], self.channels[1].output[pos]);

        self.channels[0].input[self.block + pos] = left;
        self.channels[1].input[self.block + pos] = right;

        if left != 0.0 || right != 0.0 {
            self.silent_frames = 0;
        } else {
            self.silent_frames = self.silent_frames.saturating_add(1);
        }

        self.pos += 1;
        if self.pos == self.block {
            self.pos = 0;
            self.process_block();
        }
        out
    }

    /// Clear all history.
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.input.fill(0.0);
            ch.fdl.fill(Complex::new(0.0, 0.0));
            ch.output.fill(0.0);
        }
        self.pos = 0;
        self.fdl_head = 0;
        self.silent_frames = usize::MAX;
    }

    fn process_block(&mut self) {
        let block = self.block;
        let bins = self.bins;

        if self.is_idle() {
            for ch in &mut self.channels {
                ch.output.fill(0.0);
                ch.input.copy_within(block.., 0);
            }
            return;
        }

        self.fdl_head = (self.fdl_head + 1) % self.partitions;
        let head = self.fdl_head;

        for ch in &mut self.channels {
            self.time_buf.copy_from_slice(&ch.input);
            ch.input.copy_within(block.., 0);

            if self
                .fft
                .process_with_scratch(&mut self.time_buf, &mut self.spectrum, &mut self.fft_scratch)
                .is_err()
            {
                self.failed_blocks += 1;
                ch.output.fill(0.0);
                continue;
            }
            ch.fdl[head * bins..(head + 1) * bins].copy_from_slice(&self.spectrum);

            self.acc.fill(Complex::new(0.0, 0.0));
            for p in 0..self.partitions {
                let slot = (head + self.partitions - p) % self.partitions;
                let x = &ch.fdl[slot * bins..(slot + 1) * bins];
                let h = &ch.ir[p * bins..(p + 1) * bins];
                for ((acc, x), h) in self.acc.iter_mut().zip(x).zip(h) {
                    *acc += x * h;
                }
            }
            self.acc[0].im = 0.0;
            self.acc[bins - 1].im = 0.0;

            if self
                .ifft
                .process_with_scratch(&mut self.acc, &mut self.time_buf, &mut self.ifft_scratch)
                .is_err()
            {
                self.failed_blocks += 1;
                ch.output.fill(0.0);
                continue;
            }
            ch.output.copy_from_slice(&self.time_buf[block..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ir(left: Vec<f32>, right: Vec<f32>) -> ImpulseResponse {
        ImpulseResponse {
            sample_rate: 48_000,
            channels: [left, right],
        }
    }

    fn run(conv: &mut Convolver, input: &[f32]) -> Vec<(f32, f32)> {
        input.iter().map(|&x| conv.process(x, x)).collect()
    }

    #[test]
    fn test_impulse_reproduces_response_after_one_block() {
        let response = vec![1.0, 0.5, 0.25];
        let mut conv = Convolver::new(&ir(response.clone(), response), 4, false);
        assert_eq!(conv.latency(), 4);

        let mut input = vec![0.0; 16];
        input[0] = 1.0;
        let out = run(&mut conv, &input);

        let left: Vec<f32> = out.iter().map(|o| o.0).collect();
        let expected = [0.0, 0.0, 0.0, 0.0, 1.0, 0.5, 0.25, 0.0];
        for (got, want) in left.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "{:?}", left);
        }
    }

    #[test]
    fn test_matches_direct_convolution_across_partitions() {
        let response: Vec<f32> = (0..11).map(|i| 1.0 / (i as f32 + 1.0)).collect();
        let input: Vec<f32> = (0..40).map(|i| ((i * 7 % 5) as f32 - 2.0) * 0.25).collect();
        let mut conv = Convolver::new(&ir(response.clone(), vec![0.0; 11]), 4, false);
        let out = run(&mut conv, &input);

        for n in 4..input.len() {
            let t = n - 4;
            let direct: f32 = (0..=t)
                .filter(|k| t - k < response.len())
                .map(|k| input[k] * response[t - k])
                .sum();
            assert!((out[n].0 - direct).abs() < 1e-4, "frame {}", n);
            assert!(out[n].1.abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalization_scale_for_flat_response() {
        // Constant 0.5 response: power 0.5, scale = 0.00125 / 0.5 * 44100/48000
        let response = ir(vec![0.5; 100], vec![0.5; 100]);
        let expected = 0.00125 / 0.5 * (44_100.0 / 48_000.0);
        assert!((normalization_scale(&response) - expected).abs() < 1e-7);
    }

    #[test]
    fn test_silent_response_uses_floor() {
        let response = ir(vec![0.0; 10], vec![0.0; 10]);
        let expected = 0.00125 / 0.000125 * (44_100.0 / 48_000.0);
        assert!((normalization_scale(&response) - expected).abs() < 1e-4);
    }

    #[test]
    fn test_goes_idle_after_tail() {
        let response = vec![1.0; 8];
        let mut conv = Convolver::new(&ir(response.clone(), response), 4, false);
        assert!(conv.is_idle());

        conv.process(1.0, 1.0);
        assert!(!conv.is_idle());

        // 2 partitions: idle after (2 + 2) * 4 silent frames.
        let out = run(&mut conv, &[0.0; 16]);
        assert!(conv.is_idle());
        assert!(out.iter().any(|o| o.0 != 0.0));

        let out = run(&mut conv, &[0.0; 8]);
        assert!(out.iter().all(|o| o.0 == 0.0 && o.1 == 0.0));
    }
}
