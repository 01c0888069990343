//! Sample-timed parameter automation
//!
//! Control code never writes a DSP value directly. It sends an
//! [`Automation`] stamped with an engine time, and the render thread
//! evaluates it frame by frame. Scheduling a new automation cancels
//! whatever was pending or running and continues from the value the
//! parameter holds at that moment, so two control paths touching the same
//! gain in quick succession never produce a step.

use crate::clock::secs_to_frame;

/// One automation event. Times are engine seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Automation {
    /// Jump to `value` at `at`.
    Set { value: f32, at: f64 },
    /// Ramp linearly from the held value, reaching `value` at `at + duration`.
    Linear { value: f32, at: f64, duration: f64 },
    /// Exponential approach toward `value` with time constant `tau`.
    Target { value: f32, at: f64, tau: f64 },
}

impl Automation {
    pub fn at(&self) -> f64 {
        match *self {
            Automation::Set { at, .. }
            | Automation::Linear { at, .. }
            | Automation::Target { at, .. } => at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment {
    Hold,
    Linear {
        from: f32,
        to: f32,
        start: u64,
        end: u64,
    },
    Target {
        target: f32,
        coeff: f32,
    },
}

/// Render-side parameter state.
#[derive(Debug, Clone)]
pub struct AudioParam {
    value: f32,
    min: f32,
    max: f32,
    sample_rate: u32,
    pending: Option<(u64, Automation)>,
    segment: Segment,
}

impl AudioParam {
    pub fn new(value: f32, min: f32, max: f32, sample_rate: u32) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            sample_rate: sample_rate.max(1),
            pending: None,
            segment: Segment::Hold,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// True when nothing is scheduled and the value is constant.
    pub fn is_resting(&self) -> bool {
        self.pending.is_none() && self.segment == Segment::Hold
    }

    pub fn is_resting_at(&self, value: f32) -> bool {
        self.is_resting() && self.value == value
    }

    /// Cancel anything in flight, hold the current value, then queue `automation`.
    pub fn schedule(&mut self, automation: Automation) {
        self.segment = Segment::Hold;
        self.pending = Some((secs_to_frame(automation.at(), self.sample_rate), automation));
    }

    /// Fill `out` with the parameter value for frames `start_frame..start_frame + out.len()`.
    pub fn process(&mut self, start_frame: u64, out: &mut [f32]) {
        if self.is_resting() {
            out.fill(self.value);
            return;
        }
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.step(start_frame + i as u64);
        }
    }

    fn step(&mut self, frame: u64) -> f32 {
        if let Some((at_frame, automation)) = self.pending {
            if frame >= at_frame {
                self.pending = None;
                self.activate(frame, at_frame, automation);
            }
        }

        match self.segment {
            Segment::Hold => {}
            Segment::Linear {
                from,
                to,
                start,
                end,
            } => {
                if frame >= end {
                    self.value = to;
                    self.segment = Segment::Hold;
                } else {
                    let t = (frame - start) as f32 / (end - start) as f32;
                    self.value = from + (to - from) * t;
                }
            }
            Segment::Target { target, coeff } => {
                let diff = target - self.value;
                if diff.abs() <= 1e-5 * target.abs().max(1.0) {
                    self.value = target;
                    self.segment = Segment::Hold;
                } else {
                    self.value += diff * coeff;
                }
            }
        }
        self.value
    }

    fn activate(&mut self, frame: u64, at_frame: u64, automation: Automation) {
        match automation {
            Automation::Set { value, .. } => {
                self.value = value.clamp(self.min, self.max);
                self.segment = Segment::Hold;
            }
            Automation::Linear {
                value, duration, ..
            } => {
                let to = value.clamp(self.min, self.max);
                let end = at_frame + secs_to_frame(duration, self.sample_rate);
                if end <= frame {
                    self.value = to;
                    self.segment = Segment::Hold;
                } else {
                    self.segment = Segment::Linear {
                        from: self.value,
                        to,
                        start: frame,
                        end,
                    };
                }
            }
            Automation::Target { value, tau, .. } => {
                let target = value.clamp(self.min, self.max);
                if tau.is_nan() || tau <= 0.0 {
                    self.value = target;
                    self.segment = Segment::Hold;
                } else {
                    let coeff = 1.0 - (-1.0 / (tau * self.sample_rate as f64)).exp();
                    self.segment = Segment::Target {
                        target,
                        coeff: coeff as f32,
                    };
                }
            }
        }
    }
}
