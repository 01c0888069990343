//! Render-thread DSP building blocks
//!
//! Everything here is plain per-sample math with state allocated up front.

pub mod convolver;
pub mod delay;
pub mod filter;
pub mod panner;

pub use convolver::{normalization_scale, Convolver};
pub use delay::{DelayLine, MAX_DELAY_SECONDS, MAX_FEEDBACK};
pub use filter::{cutoff_hz, resonance_q, SvfLowpass};
pub use panner::pan_stereo;
