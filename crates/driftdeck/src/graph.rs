//! Effects graph
//!
//! The topology is fixed and built once:
//!
//! ```text
//! input ─► [mono downmix] ─► lowpass ─► panner ─┬─► dry gain ──────────────────┐
//!                                               ├─► spatial convolver ─► wet ──┤
//!                                               ├─► delay send ─► delay line ──┤ (feedback loop)
//!                                               └─► reverb send ─► reverb ─────┴─► output
//! ```
//!
//! Paths are switched on and off only through their gains. The control
//! half ([`EffectsGraph`]) owns [`EffectsState`] and turns setter calls
//! into automation commands; the render half ([`GraphRenderer`]) owns the
//! DSP and consumes those commands from a lock-free queue at the start of
//! every block.

use rtrb::{Consumer, Producer, RingBuffer};
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::{secs_to_frame, FrameClock, RENDER_QUANTUM};
use crate::dsp::filter::{MAX_Q, MIN_CUTOFF_HZ, MIN_Q};
use crate::dsp::{
    cutoff_hz, pan_stereo, resonance_q, Convolver, DelayLine, SvfLowpass, MAX_DELAY_SECONDS,
    MAX_FEEDBACK,
};
use crate::impulse::ImpulseResponse;
use crate::param::{AudioParam, Automation};

/// Time constant for slider-driven parameter changes.
pub const SMOOTHING_TAU: f64 = 0.05;

/// Length of the dry/wet crossfade when toggling spatial rotation.
pub const ROTATION_FADE_SECS: f64 = 0.2;

/// Rate of the rotation LFO.
pub const ROTATION_LFO_HZ: f64 = 0.1;

/// Normalized resonance that gives Q ≈ 0.707.
pub const DEFAULT_RESONANCE: f32 = 0.0305;

pub const REVERB_PARTITION: usize = 512;
pub const SPATIAL_PARTITION: usize = 128;

const COMMAND_CAPACITY: usize = 512;

/// Automatable parameters of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamId {
    /// Lowpass cutoff in Hz
    FilterFrequency,
    FilterQ,
    Pan,
    DryGain,
    SpatialWet,
    /// Scale of the LFO's contribution to pan
    RotationDepth,
    DelaySend,
    /// Seconds
    DelayTime,
    DelayFeedback,
    ReverbSend,
}

/// Control → render messages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphCommand {
    Param(ParamId, Automation),
    Mono(bool),
    /// Start the rotation LFO, or cancel its pending stop.
    StartRotation,
    /// Stop and release the LFO once the clock reaches `at`.
    StopRotation { at: f64 },
}

/// User-facing effect settings. Values are always within range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectsState {
    /// -1.0 (left) to 1.0 (right)
    pub pan: f32,
    /// Normalized 0.0..=1.0, log-mapped to 40 Hz..Nyquist
    pub filter_cutoff: f32,
    /// Normalized 0.0..=1.0, mapped to Q 0.1..=20
    pub filter_resonance: f32,
    pub delay_mix: f32,
    /// Seconds, 0.0..=1.0
    pub delay_time: f32,
    /// 0.0..=0.95
    pub delay_feedback: f32,
    pub reverb_mix: f32,
    pub mono: bool,
    pub spatial_rotation: bool,
}

impl Default for EffectsState {
    fn default() -> Self {
        Self {
            pan: 0.0,
            filter_cutoff: 1.0,
            filter_resonance: DEFAULT_RESONANCE,
            delay_mix: 0.0,
            delay_time: 0.3,
            delay_feedback: 0.3,
            reverb_mix: 0.0,
            mono: false,
            spatial_rotation: false,
        }
    }
}

fn clamp_finite(value: f32, min: f32, max: f32) -> Option<f32> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(min, max))
    }
}

/// Control half of the effects graph.
///
/// Every setter clamps its input and is a no-op when the value does not
/// change; the return value says whether anything was sent to the renderer.
pub struct EffectsGraph {
    state: EffectsState,
    clock: FrameClock,
    tx: Producer<GraphCommand>,
    dropped: u64,
}

impl EffectsGraph {
    /// Build both halves. `reverb` and `spatial` are the convolution
    /// responses for the two wet paths.
    pub fn new(
        clock: FrameClock,
        reverb: &ImpulseResponse,
        spatial: &ImpulseResponse,
    ) -> (Self, GraphRenderer) {
        let (tx, rx) = RingBuffer::new(COMMAND_CAPACITY);
        let state = EffectsState::default();
        let renderer = GraphRenderer::new(clock.sample_rate(), rx, &state, reverb, spatial);
        (
            Self {
                state,
                clock,
                tx,
                dropped: 0,
            },
            renderer,
        )
    }

    pub fn state(&self) -> &EffectsState {
        &self.state
    }

    /// Cutoff in Hz for the current normalized setting.
    pub fn cutoff_hz(&self) -> f32 {
        cutoff_hz(self.state.filter_cutoff, self.clock.sample_rate())
    }

    /// Q for the current normalized resonance.
    pub fn q(&self) -> f32 {
        resonance_q(self.state.filter_resonance)
    }

    /// Changes refused because the render queue was full.
    pub fn dropped_commands(&self) -> u64 {
        self.dropped
    }

    /// Check that `needed` commands fit before any state changes, so a
    /// full queue never leaves the state ahead of the renderer.
    fn reserve(&mut self, needed: usize) -> bool {
        if self.tx.slots() >= needed {
            return true;
        }
        self.dropped += 1;
        warn!(dropped = self.dropped, "effects command queue full, change not applied");
        false
    }

    fn send(&mut self, command: GraphCommand) {
        if self.tx.push(command).is_err() {
            self.dropped += 1;
            warn!(dropped = self.dropped, "effects command queue full, dropping {:?}", command);
        }
    }

    fn smooth(&mut self, id: ParamId, value: f32) {
        let at = self.clock.now();
        self.send(GraphCommand::Param(
            id,
            Automation::Target {
                value,
                at,
                tau: SMOOTHING_TAU,
            },
        ));
    }

    fn ramp(&mut self, id: ParamId, value: f32, at: f64) {
        self.send(GraphCommand::Param(
            id,
            Automation::Linear {
                value,
                at,
                duration: ROTATION_FADE_SECS,
            },
        ));
    }

    /// Ignored while spatial rotation owns the pan.
    pub fn set_pan(&mut self, pan: f32) -> bool {
        if self.state.spatial_rotation {
            return false;
        }
        let Some(pan) = clamp_finite(pan, -1.0, 1.0) else {
            return false;
        };
        if pan == self.state.pan {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.pan = pan;
        self.smooth(ParamId::Pan, pan);
        true
    }

    pub fn set_filter_cutoff(&mut self, value: f32) -> bool {
        let Some(value) = clamp_finite(value, 0.0, 1.0) else {
            return false;
        };
        if value == self.state.filter_cutoff {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.filter_cutoff = value;
        let hz = self.cutoff_hz();
        self.smooth(ParamId::FilterFrequency, hz);
        true
    }

    pub fn set_filter_resonance(&mut self, value: f32) -> bool {
        let Some(value) = clamp_finite(value, 0.0, 1.0) else {
            return false;
        };
        if value == self.state.filter_resonance {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.filter_resonance = value;
        self.smooth(ParamId::FilterQ, resonance_q(value));
        true
    }

    /// Delay send level.
    pub fn set_delay(&mut self, mix: f32) -> bool {
        let Some(mix) = clamp_finite(mix, 0.0, 1.0) else {
            return false;
        };
        if mix == self.state.delay_mix {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.delay_mix = mix;
        self.smooth(ParamId::DelaySend, mix);
        true
    }

    pub fn set_delay_time(&mut self, secs: f32) -> bool {
        let Some(secs) = clamp_finite(secs, 0.0, MAX_DELAY_SECONDS) else {
            return false;
        };
        if secs == self.state.delay_time {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.delay_time = secs;
        self.smooth(ParamId::DelayTime, secs);
        true
    }

    pub fn set_delay_feedback(&mut self, feedback: f32) -> bool {
        let Some(feedback) = clamp_finite(feedback, 0.0, MAX_FEEDBACK) else {
            return false;
        };
        if feedback == self.state.delay_feedback {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.delay_feedback = feedback;
        self.smooth(ParamId::DelayFeedback, feedback);
        true
    }

    /// Reverb send level.
    pub fn set_reverb(&mut self, mix: f32) -> bool {
        let Some(mix) = clamp_finite(mix, 0.0, 1.0) else {
            return false;
        };
        if mix == self.state.reverb_mix {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.reverb_mix = mix;
        self.smooth(ParamId::ReverbSend, mix);
        true
    }

    pub fn set_mono(&mut self, mono: bool) -> bool {
        if mono == self.state.mono {
            return false;
        }
        if !self.reserve(1) {
            return false;
        }
        self.state.mono = mono;
        self.send(GraphCommand::Mono(mono));
        debug!(mono, "mono downmix");
        true
    }

    /// Flip mono; returns the new setting.
    pub fn toggle_mono(&mut self) -> bool {
        self.set_mono(!self.state.mono);
        self.state.mono
    }

    /// Crossfade into or out of the rotating wet path.
    ///
    /// Enabling starts the LFO and fades dry out and wet in over 200 ms.
    /// Disabling fades back, stops the LFO when the fade ends, and glides
    /// pan back to center.
    pub fn set_spatial_rotation(&mut self, enabled: bool) -> bool {
        if enabled == self.state.spatial_rotation {
            return false;
        }
        if !self.reserve(5) {
            return false;
        }
        self.state.spatial_rotation = enabled;
        let now = self.clock.now();

        if enabled {
            self.send(GraphCommand::StartRotation);
            self.ramp(ParamId::DryGain, 0.0, now);
            self.ramp(ParamId::SpatialWet, 1.0, now);
            self.ramp(ParamId::RotationDepth, 1.0, now);
        } else {
            self.ramp(ParamId::DryGain, 1.0, now);
            self.ramp(ParamId::SpatialWet, 0.0, now);
            self.ramp(ParamId::RotationDepth, 0.0, now);
            self.send(GraphCommand::StopRotation {
                at: now + ROTATION_FADE_SECS,
            });
            self.state.pan = 0.0;
            self.smooth(ParamId::Pan, 0.0);
        }
        debug!(enabled, "spatial rotation");
        true
    }

    /// Flip spatial rotation; returns the new setting.
    pub fn toggle_spatial_rotation(&mut self) -> bool {
        self.set_spatial_rotation(!self.state.spatial_rotation);
        self.state.spatial_rotation
    }
}

struct Params {
    filter_frequency: AudioParam,
    filter_q: AudioParam,
    pan: AudioParam,
    dry: AudioParam,
    spatial_wet: AudioParam,
    rotation_depth: AudioParam,
    delay_send: AudioParam,
    delay_time: AudioParam,
    delay_feedback: AudioParam,
    reverb_send: AudioParam,
}

impl Params {
    fn new(sample_rate: u32, state: &EffectsState) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let p = |value, min, max| AudioParam::new(value, min, max, sample_rate);
        Self {
            filter_frequency: p(
                cutoff_hz(state.filter_cutoff, sample_rate),
                MIN_CUTOFF_HZ,
                nyquist,
            ),
            filter_q: p(resonance_q(state.filter_resonance), MIN_Q, MAX_Q),
            pan: p(state.pan, -1.0, 1.0),
            dry: p(1.0, 0.0, 1.0),
            spatial_wet: p(0.0, 0.0, 1.0),
            rotation_depth: p(0.0, 0.0, 1.0),
            delay_send: p(state.delay_mix, 0.0, 1.0),
            delay_time: p(state.delay_time, 0.0, MAX_DELAY_SECONDS),
            delay_feedback: p(state.delay_feedback, 0.0, MAX_FEEDBACK),
            reverb_send: p(state.reverb_mix, 0.0, 1.0),
        }
    }

    fn get(&self, id: ParamId) -> &AudioParam {
        match id {
            ParamId::FilterFrequency => &self.filter_frequency,
            ParamId::FilterQ => &self.filter_q,
            ParamId::Pan => &self.pan,
            ParamId::DryGain => &self.dry,
            ParamId::SpatialWet => &self.spatial_wet,
            ParamId::RotationDepth => &self.rotation_depth,
            ParamId::DelaySend => &self.delay_send,
            ParamId::DelayTime => &self.delay_time,
            ParamId::DelayFeedback => &self.delay_feedback,
            ParamId::ReverbSend => &self.reverb_send,
        }
    }

    fn get_mut(&mut self, id: ParamId) -> &mut AudioParam {
        match id {
            ParamId::FilterFrequency => &mut self.filter_frequency,
            ParamId::FilterQ => &mut self.filter_q,
            ParamId::Pan => &mut self.pan,
            ParamId::DryGain => &mut self.dry,
            ParamId::SpatialWet => &mut self.spatial_wet,
            ParamId::RotationDepth => &mut self.rotation_depth,
            ParamId::DelaySend => &mut self.delay_send,
            ParamId::DelayTime => &mut self.delay_time,
            ParamId::DelayFeedback => &mut self.delay_feedback,
            ParamId::ReverbSend => &mut self.reverb_send,
        }
    }
}

/// Per-block parameter values.
struct Scratch {
    frequency: [f32; RENDER_QUANTUM],
    q: [f32; RENDER_QUANTUM],
    pan: [f32; RENDER_QUANTUM],
    dry: [f32; RENDER_QUANTUM],
    wet: [f32; RENDER_QUANTUM],
    depth: [f32; RENDER_QUANTUM],
    delay_send: [f32; RENDER_QUANTUM],
    delay_time: [f32; RENDER_QUANTUM],
    feedback: [f32; RENDER_QUANTUM],
    reverb_send: [f32; RENDER_QUANTUM],
}

impl Scratch {
    fn new() -> Self {
        Self {
            frequency: [0.0; RENDER_QUANTUM],
            q: [0.0; RENDER_QUANTUM],
            pan: [0.0; RENDER_QUANTUM],
            dry: [0.0; RENDER_QUANTUM],
            wet: [0.0; RENDER_QUANTUM],
            depth: [0.0; RENDER_QUANTUM],
            delay_send: [0.0; RENDER_QUANTUM],
            delay_time: [0.0; RENDER_QUANTUM],
            feedback: [0.0; RENDER_QUANTUM],
            reverb_send: [0.0; RENDER_QUANTUM],
        }
    }
}

struct Lfo {
    running: bool,
    phase: f64,
    step: f64,
    stop_at: Option<u64>,
}

/// Render half of the effects graph.
pub struct GraphRenderer {
    sample_rate: u32,
    rx: Consumer<GraphCommand>,
    mono: bool,
    filter: SvfLowpass,
    delay: DelayLine,
    reverb: Convolver,
    spatial: Convolver,
    spatial_idle: bool,
    params: Params,
    lfo: Lfo,
    scratch: Box<Scratch>,
}

impl GraphRenderer {
    fn new(
        sample_rate: u32,
        rx: Consumer<GraphCommand>,
        state: &EffectsState,
        reverb: &ImpulseResponse,
        spatial: &ImpulseResponse,
    ) -> Self {
        Self {
            sample_rate,
            rx,
            mono: state.mono,
            filter: SvfLowpass::new(sample_rate),
            delay: DelayLine::new(sample_rate),
            reverb: Convolver::new(reverb, REVERB_PARTITION, true),
            spatial: Convolver::new(spatial, SPATIAL_PARTITION, true),
            spatial_idle: true,
            params: Params::new(sample_rate, state),
            lfo: Lfo {
                running: false,
                phase: 0.0,
                step: std::f64::consts::TAU * ROTATION_LFO_HZ / sample_rate.max(1) as f64,
                stop_at: None,
            },
            scratch: Box::new(Scratch::new()),
        }
    }

    pub fn is_mono(&self) -> bool {
        self.mono
    }

    /// True while the LFO exists (including a fade-out before its stop).
    pub fn is_rotating(&self) -> bool {
        self.lfo.running
    }

    pub fn param_value(&self, id: ParamId) -> f32 {
        self.params.get(id).value()
    }

    pub fn param_resting(&self, id: ParamId) -> bool {
        self.params.get(id).is_resting()
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.pop() {
            match command {
                GraphCommand::Param(id, automation) => self.params.get_mut(id).schedule(automation),
                GraphCommand::Mono(mono) => self.mono = mono,
                GraphCommand::StartRotation => {
                    if !self.lfo.running {
                        self.lfo.phase = 0.0;
                    }
                    self.lfo.running = true;
                    self.lfo.stop_at = None;
                }
                GraphCommand::StopRotation { at } => {
                    if self.lfo.running {
                        self.lfo.stop_at = Some(secs_to_frame(at, self.sample_rate));
                    }
                }
            }
        }
    }

    /// Process one block in place. `start_frame` is the engine frame of
    /// the first sample; blocks longer than [`RENDER_QUANTUM`] are truncated.
    pub fn process(&mut self, start_frame: u64, left: &mut [f32], right: &mut [f32]) {
        self.drain_commands();

        let n = left.len().min(right.len()).min(RENDER_QUANTUM);
        if n == 0 {
            return;
        }

        let spatial_on = !self.params.spatial_wet.is_resting_at(0.0);
        if spatial_on {
            self.spatial_idle = false;
        } else if !self.spatial_idle {
            self.spatial.reset();
            self.spatial_idle = true;
        }

        let p = &mut self.params;
        let s = &mut self.scratch;
        p.filter_frequency.process(start_frame, &mut s.frequency[..n]);
        p.filter_q.process(start_frame, &mut s.q[..n]);
        p.pan.process(start_frame, &mut s.pan[..n]);
        p.dry.process(start_frame, &mut s.dry[..n]);
        p.spatial_wet.process(start_frame, &mut s.wet[..n]);
        p.rotation_depth.process(start_frame, &mut s.depth[..n]);
        p.delay_send.process(start_frame, &mut s.delay_send[..n]);
        p.delay_time.process(start_frame, &mut s.delay_time[..n]);
        p.delay_feedback.process(start_frame, &mut s.feedback[..n]);
        p.reverb_send.process(start_frame, &mut s.reverb_send[..n]);

        // Filter coefficients update once per block.
        self.filter.set_params(s.frequency[0], s.q[0]);

        let s = &self.scratch;
        let sr = self.sample_rate as f32;

        for i in 0..n {
            let frame = start_frame + i as u64;
            let (mut l, mut r) = (left[i], right[i]);

            if self.mono {
                let m = (l + r) * 0.5;
                l = m;
                r = m;
            }

            let (l, r) = self.filter.process(l, r);

            let mut pan = s.pan[i];
            if self.lfo.running {
                if self.lfo.stop_at.is_some_and(|stop| frame >= stop) {
                    self.lfo.running = false;
                    self.lfo.stop_at = None;
                } else {
                    pan += s.depth[i] * self.lfo.phase.sin() as f32;
                    self.lfo.phase = (self.lfo.phase + self.lfo.step) % std::f64::consts::TAU;
                }
            }
            let (pl, pr) = pan_stereo(l, r, pan);

            let mut out_l = pl * s.dry[i];
            let mut out_r = pr * s.dry[i];

            if spatial_on {
                let (wl, wr) = self.spatial.process(pl, pr);
                out_l += wl * s.wet[i];
                out_r += wr * s.wet[i];
            }

            let (dl, dr) = self.delay.process(
                pl * s.delay_send[i],
                pr * s.delay_send[i],
                s.delay_time[i] * sr,
                s.feedback[i],
            );
            out_l += dl;
            out_r += dr;

            let (rl, rr) = self
                .reverb
                .process(pl * s.reverb_send[i], pr * s.reverb_send[i]);
            out_l += rl;
            out_r += rr;

            left[i] = out_l;
            right[i] = out_r;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impulse::{generate_seeded, ImpulseSpec};

    const SR: u32 = 8_000;

    fn build() -> (EffectsGraph, GraphRenderer, FrameClock) {
        let clock = FrameClock::new(SR);
        let reverb = generate_seeded(SR, ImpulseSpec::new(0.1, 2.0), 1);
        let spatial = generate_seeded(SR, ImpulseSpec::new(0.05, 6.0), 2);
        let (graph, renderer) = EffectsGraph::new(clock.clone(), &reverb, &spatial);
        (graph, renderer, clock)
    }

    /// Render `secs` of a constant signal, advancing the clock.
    fn render(renderer: &mut GraphRenderer, clock: &FrameClock, secs: f64, value: f32) -> Vec<(f32, f32)> {
        let mut out = Vec::new();
        let blocks = (secs * SR as f64 / RENDER_QUANTUM as f64).ceil() as usize;
        for _ in 0..blocks {
            let mut l = [value; RENDER_QUANTUM];
            let mut r = [value; RENDER_QUANTUM];
            renderer.process(clock.frames(), &mut l, &mut r);
            clock.advance(RENDER_QUANTUM as u64);
            out.extend(l.iter().copied().zip(r.iter().copied()));
        }
        out
    }

    #[test]
    fn test_default_graph_is_transparent() {
        let (_graph, mut renderer, clock) = build();
        let out = render(&mut renderer, &clock, 0.05, 0.25);
        for (l, r) in out {
            assert!((l - 0.25).abs() < 1e-6 && (r - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_setters_clamp_and_are_idempotent() {
        let (mut graph, _renderer, _clock) = build();

        assert!(graph.set_pan(3.0));
        assert_eq!(graph.state().pan, 1.0);
        assert!(!graph.set_pan(1.0));

        assert!(graph.set_delay_feedback(2.0));
        assert_eq!(graph.state().delay_feedback, MAX_FEEDBACK);

        assert!(graph.set_delay_time(5.0));
        assert_eq!(graph.state().delay_time, 1.0);

        assert!(!graph.set_reverb(f32::NAN));
        assert!(!graph.set_reverb(-1.0));
        assert!(graph.set_reverb(0.4));

        assert!(graph.set_mono(true));
        assert!(!graph.set_mono(true));
        assert!(!graph.toggle_mono());
    }

    #[test]
    fn test_cutoff_mapping_reaches_endpoints() {
        let (mut graph, mut renderer, clock) = build();
        graph.set_filter_cutoff(0.0);
        assert!((graph.cutoff_hz() - 40.0).abs() < 1e-3);

        render(&mut renderer, &clock, 1.0, 0.0);
        assert!((renderer.param_value(ParamId::FilterFrequency) - 40.0).abs() < 0.01);

        graph.set_filter_cutoff(1.0);
        assert!((graph.cutoff_hz() - SR as f32 / 2.0).abs() < 0.01);
    }

    #[test]
    fn test_resonance_maps_to_q() {
        let (mut graph, _renderer, _clock) = build();
        graph.set_filter_resonance(1.0);
        assert!((graph.q() - 20.0).abs() < 1e-4);
        graph.set_filter_resonance(0.0);
        assert!((graph.q() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_mono_downmix() {
        let (mut graph, mut renderer, clock) = build();
        graph.set_mono(true);
        let mut l = [1.0; RENDER_QUANTUM];
        let mut r = [0.0; RENDER_QUANTUM];
        renderer.process(clock.frames(), &mut l, &mut r);
        assert!(renderer.is_mono());
        assert!((l[0] - 0.5).abs() < 1e-6);
        assert!((r[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pan_ignored_while_rotating() {
        let (mut graph, _renderer, _clock) = build();
        graph.set_spatial_rotation(true);
        assert!(!graph.set_pan(-0.5));
        assert_eq!(graph.state().pan, 0.0);
    }

    #[test]
    fn test_rotation_crossfades_and_runs_lfo() {
        let (mut graph, mut renderer, clock) = build();
        assert!(graph.set_spatial_rotation(true));
        assert!(!graph.set_spatial_rotation(true));

        render(&mut renderer, &clock, 0.1, 0.1);
        let dry = renderer.param_value(ParamId::DryGain);
        assert!(dry > 0.3 && dry < 0.7, "mid-fade dry {}", dry);

        render(&mut renderer, &clock, 0.2, 0.1);
        assert_eq!(renderer.param_value(ParamId::DryGain), 0.0);
        assert_eq!(renderer.param_value(ParamId::SpatialWet), 1.0);
        assert!(renderer.is_rotating());
    }

    #[test]
    fn test_full_queue_refuses_change_until_drained() {
        let (mut graph, mut renderer, clock) = build();
        let mut accepted = 0;
        let mut last = 0.0;
        for i in 1..=COMMAND_CAPACITY + 10 {
            let mix = i as f32 / (COMMAND_CAPACITY + 10) as f32;
            if graph.set_reverb(mix) {
                accepted += 1;
                last = mix;
            }
        }
        assert_eq!(accepted, COMMAND_CAPACITY);
        assert_eq!(graph.dropped_commands(), 10);
        assert_eq!(graph.state().reverb_mix, last);

        assert!(!graph.set_spatial_rotation(true));
        assert!(!graph.state().spatial_rotation);

        render(&mut renderer, &clock, 0.01, 0.0);
        assert!(graph.set_reverb(1.0));
        assert!(graph.set_spatial_rotation(true));
    }

    #[test]
    fn test_double_toggle_settles_dry() {
        let (mut graph, mut renderer, clock) = build();
        graph.set_spatial_rotation(true);
        render(&mut renderer, &clock, 0.05, 0.1);
        graph.set_spatial_rotation(false);
        render(&mut renderer, &clock, 0.4, 0.1);

        assert!(renderer.param_resting(ParamId::DryGain));
        assert_eq!(renderer.param_value(ParamId::DryGain), 1.0);
        assert_eq!(renderer.param_value(ParamId::SpatialWet), 0.0);
        assert_eq!(renderer.param_value(ParamId::RotationDepth), 0.0);
        assert!(!renderer.is_rotating());
        assert_eq!(graph.state().pan, 0.0);
    }

    #[test]
    fn test_reenable_cancels_pending_stop() {
        let (mut graph, mut renderer, clock) = build();
        graph.set_spatial_rotation(true);
        render(&mut renderer, &clock, 0.3, 0.1);
        graph.set_spatial_rotation(false);
        render(&mut renderer, &clock, 0.05, 0.1);
        graph.set_spatial_rotation(true);
        render(&mut renderer, &clock, 0.5, 0.1);

        assert!(renderer.is_rotating());
        assert_eq!(renderer.param_value(ParamId::SpatialWet), 1.0);
    }

    #[test]
    fn test_delay_send_produces_echo() {
        let (mut graph, mut renderer, clock) = build();
        graph.set_delay(1.0);
        graph.set_delay_time(0.1);
        graph.set_delay_feedback(0.0);
        // Let the smoothing settle on silence.
        render(&mut renderer, &clock, 1.0, 0.0);

        let mut l = [0.0; RENDER_QUANTUM];
        let mut r = [0.0; RENDER_QUANTUM];
        l[0] = 1.0;
        r[0] = 1.0;
        renderer.process(clock.frames(), &mut l, &mut r);
        clock.advance(RENDER_QUANTUM as u64);

        let out = render(&mut renderer, &clock, 0.2, 0.0);
        // 0.1 s at 8 kHz = 800 frames after the impulse, i.e. 672 into `out`.
        assert!((out[672].0 - 1.0).abs() < 1e-3, "{}", out[672].0);
    }
}
