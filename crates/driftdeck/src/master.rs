//! Master bus: lifecycle gain, master volume, destination routing and the
//! recording tap.
//!
//! ```text
//! effects ─► output gain ─► master volume ─┬─► destination (when routed)
//!                                          └─► tap ring (when tapping)
//! ```
//!
//! Play/pause/stop drive the output gain; the volume slider drives master
//! volume. Both are automation, so the two never step against each other.

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::warn;

use crate::clock::{FrameClock, RENDER_QUANTUM};
use crate::param::{AudioParam, Automation};

/// Output gain ramp 0 → 1 when playback (re)starts.
pub const FADE_IN_SECS: f64 = 0.2;

/// Output gain ramp → 0 on pause.
pub const FADE_OUT_SECS: f64 = 0.1;

/// Time constant for master volume changes.
pub const VOLUME_TAU: f64 = 0.05;

/// Seconds of stereo audio the tap ring holds between recorder drains.
const TAP_SECONDS: usize = 4;

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MasterCommand {
    OutputGain(Automation),
    Volume(Automation),
    /// Connect or disconnect the bus from the destination.
    Route(bool),
    /// Start or stop copying the bus into the tap ring.
    Tap(bool),
}

/// Reader end of the tap: interleaved stereo samples.
pub type TapReader = Consumer<f32>;

/// Build the control and render halves plus the tap reader.
pub fn master_bus(clock: FrameClock) -> (MasterControl, MasterBus, TapReader) {
    let sample_rate = clock.sample_rate();
    let (tx, rx) = RingBuffer::new(COMMAND_CAPACITY);
    let (tap_tx, tap_rx) = RingBuffer::new(sample_rate as usize * 2 * TAP_SECONDS);
    (
        MasterControl {
            clock,
            tx,
            volume: 1.0,
            routed: false,
            dropped: 0,
        },
        MasterBus {
            rx,
            output_gain: AudioParam::new(0.0, 0.0, 1.0, sample_rate),
            volume: AudioParam::new(1.0, 0.0, 1.0, sample_rate),
            routed: false,
            tapping: false,
            tap: tap_tx,
            gain_buf: [0.0; RENDER_QUANTUM],
            volume_buf: [0.0; RENDER_QUANTUM],
            tap_overruns: 0,
        },
        tap_rx,
    )
}

/// Control half of the master bus.
pub struct MasterControl {
    clock: FrameClock,
    tx: Producer<MasterCommand>,
    volume: f32,
    routed: bool,
    dropped: u64,
}

impl MasterControl {
    fn has_room(&mut self) -> bool {
        if self.tx.slots() > 0 {
            return true;
        }
        self.dropped += 1;
        warn!(dropped = self.dropped, "master command queue full, change not applied");
        false
    }

    fn send(&mut self, command: MasterCommand) {
        if self.tx.push(command).is_err() {
            self.dropped += 1;
            warn!(dropped = self.dropped, "master command queue full, dropping {:?}", command);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn is_routed(&self) -> bool {
        self.routed
    }

    /// Ramp output gain to 1 over [`FADE_IN_SECS`].
    pub fn fade_in(&mut self) {
        let at = self.clock.now();
        self.send(MasterCommand::OutputGain(Automation::Linear {
            value: 1.0,
            at,
            duration: FADE_IN_SECS,
        }));
    }

    /// Ramp output gain to 0 over [`FADE_OUT_SECS`]. Returns the engine
    /// time at which the bus is silent.
    pub fn fade_out(&mut self) -> f64 {
        let at = self.clock.now();
        self.send(MasterCommand::OutputGain(Automation::Linear {
            value: 0.0,
            at,
            duration: FADE_OUT_SECS,
        }));
        at + FADE_OUT_SECS
    }

    /// Zero output gain immediately. Returns the current engine time.
    pub fn silence(&mut self) -> f64 {
        let at = self.clock.now();
        self.send(MasterCommand::OutputGain(Automation::Set { value: 0.0, at }));
        at
    }

    /// Master volume, clamped to 0..=1.
    pub fn set_volume(&mut self, volume: f32) -> bool {
        if volume.is_nan() {
            return false;
        }
        let volume = volume.clamp(0.0, 1.0);
        if volume == self.volume {
            return false;
        }
        if !self.has_room() {
            return false;
        }
        self.volume = volume;
        let at = self.clock.now();
        self.send(MasterCommand::Volume(Automation::Target {
            value: volume,
            at,
            tau: VOLUME_TAU,
        }));
        true
    }

    pub fn route(&mut self, routed: bool) -> bool {
        if routed == self.routed {
            return false;
        }
        if !self.has_room() {
            return false;
        }
        self.routed = routed;
        self.send(MasterCommand::Route(routed));
        true
    }

    pub fn set_tap(&mut self, tapping: bool) {
        self.send(MasterCommand::Tap(tapping));
    }
}

/// Render half of the master bus.
pub struct MasterBus {
    rx: Consumer<MasterCommand>,
    output_gain: AudioParam,
    volume: AudioParam,
    routed: bool,
    tapping: bool,
    tap: Producer<f32>,
    gain_buf: [f32; RENDER_QUANTUM],
    volume_buf: [f32; RENDER_QUANTUM],
    tap_overruns: u64,
}

impl MasterBus {
    pub fn output_gain(&self) -> f32 {
        self.output_gain.value()
    }

    pub fn is_routed(&self) -> bool {
        self.routed
    }

    /// Blocks in which the tap ring was full and samples were lost.
    pub fn tap_overruns(&self) -> u64 {
        self.tap_overruns
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.rx.pop() {
            match command {
                MasterCommand::OutputGain(a) => self.output_gain.schedule(a),
                MasterCommand::Volume(a) => self.volume.schedule(a),
                MasterCommand::Route(routed) => self.routed = routed,
                MasterCommand::Tap(tapping) => self.tapping = tapping,
            }
        }
    }

    /// Apply gains in place, feed the tap, and mute if not routed.
    pub fn process(&mut self, start_frame: u64, left: &mut [f32], right: &mut [f32]) {
        self.drain_commands();
        let n = left.len().min(right.len()).min(RENDER_QUANTUM);

        self.output_gain.process(start_frame, &mut self.gain_buf[..n]);
        self.volume.process(start_frame, &mut self.volume_buf[..n]);

        for i in 0..n {
            let g = self.gain_buf[i] * self.volume_buf[i];
            left[i] *= g;
            right[i] *= g;
        }

        if self.tapping {
            // Whole frames only, so the reader never sees channels swap.
            let frames = (self.tap.slots() / 2).min(n);
            for i in 0..frames {
                let _ = self.tap.push(left[i]);
                let _ = self.tap.push(right[i]);
            }
            if frames < n {
                self.tap_overruns += 1;
            }
        }

        if !self.routed {
            left[..n].fill(0.0);
            right[..n].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1_000;

    fn block(bus: &mut MasterBus, clock: &FrameClock, value: f32) -> ([f32; RENDER_QUANTUM], [f32; RENDER_QUANTUM]) {
        let mut l = [value; RENDER_QUANTUM];
        let mut r = [value; RENDER_QUANTUM];
        bus.process(clock.frames(), &mut l, &mut r);
        clock.advance(RENDER_QUANTUM as u64);
        (l, r)
    }

    #[test]
    fn test_unrouted_bus_is_silent_but_taps() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, mut tap) = master_bus(clock.clone());
        control.fade_in();
        control.set_tap(true);

        block(&mut bus, &clock, 1.0);
        let (l, _) = block(&mut bus, &clock, 1.0);
        assert!(l.iter().all(|&s| s == 0.0));
        assert_eq!(tap.slots(), RENDER_QUANTUM * 2 * 2);
    }

    #[test]
    fn test_tap_overrun_keeps_frames_whole() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, mut tap) = master_bus(clock.clone());
        control.fade_in();
        control.set_tap(true);

        let stereo_block = |bus: &mut MasterBus| {
            let mut l = [1.0; RENDER_QUANTUM];
            let mut r = [-1.0; RENDER_QUANTUM];
            bus.process(clock.frames(), &mut l, &mut r);
            clock.advance(RENDER_QUANTUM as u64);
        };

        // Four seconds of ring at 1 kHz fill up during the 32nd block.
        for _ in 0..32 {
            stereo_block(&mut bus);
        }
        let capacity = SR as usize * 2 * TAP_SECONDS;
        assert_eq!(tap.slots(), capacity);
        assert_eq!(bus.tap_overruns(), 1);

        // One free slot is not room for a frame.
        tap.pop().unwrap();
        stereo_block(&mut bus);
        assert_eq!(tap.slots(), capacity - 1);
        assert_eq!(bus.tap_overruns(), 2);

        tap.pop().unwrap();
        stereo_block(&mut bus);
        assert_eq!(tap.slots(), capacity);

        let mut samples = Vec::new();
        while let Ok(s) = tap.pop() {
            samples.push(s);
        }
        let last = &samples[samples.len() - 2..];
        assert_eq!(last, &[1.0, -1.0]);
    }

    #[test]
    fn test_full_queue_keeps_volume_in_step() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, _tap) = master_bus(clock.clone());
        for i in 0..COMMAND_CAPACITY {
            assert!(control.set_volume(i as f32 / 100.0));
        }
        let applied = control.volume();
        assert!(!control.set_volume(0.9));
        assert_eq!(control.volume(), applied);
        assert!(!control.route(true));
        assert!(!control.is_routed());

        block(&mut bus, &clock, 0.0);
        assert!(control.set_volume(0.9));
        assert!(control.route(true));
    }

    #[test]
    fn test_fade_in_reaches_unity() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, _tap) = master_bus(clock.clone());
        assert!(control.route(true));
        assert!(!control.route(true));
        control.fade_in();

        let (l, _) = block(&mut bus, &clock, 1.0);
        assert_eq!(l[0], 0.0);
        assert!((l[100] - 0.5).abs() < 1e-6);
        block(&mut bus, &clock, 1.0);
        assert_eq!(bus.output_gain(), 1.0);
    }

    #[test]
    fn test_fade_out_reaches_zero_within_window() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, _tap) = master_bus(clock.clone());
        control.route(true);
        control.fade_in();
        for _ in 0..3 {
            block(&mut bus, &clock, 1.0);
        }

        let silent_at = control.fade_out();
        assert!((silent_at - clock.now() - FADE_OUT_SECS).abs() < 1e-9);
        let (l, _) = block(&mut bus, &clock, 1.0);
        // 100 frames at 1 kHz
        assert_eq!(l[100], 0.0);
        assert_eq!(bus.output_gain(), 0.0);
    }

    #[test]
    fn test_silence_is_immediate() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, _tap) = master_bus(clock.clone());
        control.route(true);
        control.fade_in();
        block(&mut bus, &clock, 1.0);
        block(&mut bus, &clock, 1.0);

        control.silence();
        let (l, _) = block(&mut bus, &clock, 1.0);
        assert!(l.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_volume_is_clamped_and_scales_output() {
        let clock = FrameClock::new(SR);
        let (mut control, mut bus, _tap) = master_bus(clock.clone());
        control.route(true);
        control.fade_in();
        // already at the clamped maximum
        assert!(!control.set_volume(2.0));
        assert!(control.set_volume(0.5));
        assert!(!control.set_volume(0.5));
        assert_eq!(control.volume(), 0.5);
        for _ in 0..10 {
            block(&mut bus, &clock, 1.0);
        }
        let (l, _) = block(&mut bus, &clock, 1.0);
        assert!((l[0] - 0.5).abs() < 1e-3);
    }
}
