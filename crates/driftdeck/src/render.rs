//! The render loop
//!
//! One [`Renderer`] owns every render-side half: the source mixer, the
//! effects graph and the master bus. Output backends call
//! [`Renderer::render`] with whatever buffer size the device asks for;
//! internally everything runs in fixed [`RENDER_QUANTUM`] blocks and the
//! engine clock advances once per block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use portable_atomic::AtomicF32;

use crate::clock::{FrameClock, RENDER_QUANTUM};
use crate::graph::GraphRenderer;
use crate::master::MasterBus;
use crate::scheduler::SourceMixer;

/// Counters the render thread publishes for the control side.
#[derive(Debug, Default)]
pub struct RenderStats {
    /// Largest absolute sample since the last [`RenderStats::take_peak`].
    peak: AtomicF32,
    quanta: AtomicU64,
    tap_overruns: AtomicU64,
}

impl RenderStats {
    pub fn peak(&self) -> f32 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Read and reset the peak meter.
    pub fn take_peak(&self) -> f32 {
        self.peak.swap(0.0, Ordering::Relaxed)
    }

    pub fn quanta(&self) -> u64 {
        self.quanta.load(Ordering::Relaxed)
    }

    pub fn tap_overruns(&self) -> u64 {
        self.tap_overruns.load(Ordering::Relaxed)
    }
}

pub struct Renderer {
    clock: FrameClock,
    sources: SourceMixer,
    graph: GraphRenderer,
    master: MasterBus,
    left: [f32; RENDER_QUANTUM],
    right: [f32; RENDER_QUANTUM],
    /// Frames of the last quantum not yet handed to the device.
    cursor: usize,
    stats: Arc<RenderStats>,
}

impl Renderer {
    pub(crate) fn new(
        clock: FrameClock,
        sources: SourceMixer,
        graph: GraphRenderer,
        master: MasterBus,
    ) -> Self {
        Self {
            clock,
            sources,
            graph,
            master,
            left: [0.0; RENDER_QUANTUM],
            right: [0.0; RENDER_QUANTUM],
            cursor: RENDER_QUANTUM,
            stats: Arc::new(RenderStats::default()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub fn graph(&self) -> &GraphRenderer {
        &self.graph
    }

    pub fn active_sources(&self) -> usize {
        self.sources.active()
    }

    /// Render one quantum and advance the clock. Returns the stereo block.
    pub fn render_quantum(&mut self) -> (&[f32], &[f32]) {
        let start = self.clock.frames();

        self.sources.render(start, &mut self.left, &mut self.right);
        self.graph.process(start, &mut self.left, &mut self.right);
        self.master.process(start, &mut self.left, &mut self.right);

        let peak = self
            .left
            .iter()
            .chain(self.right.iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        self.stats.peak.fetch_max(peak, Ordering::Relaxed);
        self.stats.quanta.fetch_add(1, Ordering::Relaxed);
        self.stats
            .tap_overruns
            .store(self.master.tap_overruns(), Ordering::Relaxed);

        self.clock.advance(RENDER_QUANTUM as u64);
        self.cursor = RENDER_QUANTUM;
        (&self.left, &self.right)
    }

    /// Fill an interleaved device buffer.
    ///
    /// Mono devices get the average of both channels; channels past the
    /// second are zeroed.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        for frame in out.chunks_mut(channels) {
            if self.cursor >= RENDER_QUANTUM {
                self.render_quantum();
                self.cursor = 0;
            }
            let l = self.left[self.cursor];
            let r = self.right[self.cursor];
            self.cursor += 1;

            match frame {
                [mono] => *mono = 0.5 * (l + r),
                [first, second, rest @ ..] => {
                    *first = l;
                    *second = r;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EffectsGraph;
    use crate::impulse::{generate_seeded, ImpulseSpec};
    use crate::master::master_bus;
    use crate::scheduler::PlaybackScheduler;

    const SR: u32 = 8_000;

    fn renderer() -> (Renderer, crate::master::MasterControl) {
        let clock = FrameClock::new(SR);
        let (_scheduler, sources) = PlaybackScheduler::new(SR, 0.1);
        let reverb = generate_seeded(SR, ImpulseSpec::new(0.05, 2.0), 1);
        let spatial = generate_seeded(SR, ImpulseSpec::new(0.01, 6.0), 2);
        let (_graph, graph) = EffectsGraph::new(clock.clone(), &reverb, &spatial);
        let (control, master, _tap) = master_bus(clock.clone());
        (Renderer::new(clock, sources, graph, master), control)
    }

    #[test]
    fn test_clock_advances_per_quantum() {
        let (mut r, _control) = renderer();
        r.render_quantum();
        r.render_quantum();
        assert_eq!(r.clock().frames(), 2 * RENDER_QUANTUM as u64);
        assert_eq!(r.stats().quanta(), 2);
    }

    #[test]
    fn test_odd_device_buffers_reuse_leftover_frames() {
        let (mut r, _control) = renderer();
        let mut out = vec![1.0; 100 * 2];
        r.render(&mut out, 2);
        assert_eq!(r.clock().frames(), RENDER_QUANTUM as u64);
        r.render(&mut out, 2);
        // 200 frames requested, two quanta rendered
        assert_eq!(r.clock().frames(), 2 * RENDER_QUANTUM as u64);
    }

    #[test]
    fn test_silence_without_sources() {
        let (mut r, mut control) = renderer();
        control.route(true);
        control.fade_in();
        let mut out = vec![1.0; 256 * 4];
        r.render(&mut out, 4);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(r.stats().take_peak(), 0.0);
    }
}
