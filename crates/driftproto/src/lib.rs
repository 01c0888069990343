//! Session protocol for driftdeck.
//!
//! Types shared between the engine and a generative audio backend:
//! weighted prompts going up, [`ServerMessage`]s coming down, and the
//! [`SessionConnector`]/[`Session`] traits a backend implements.
//!
//! With the `loopback` feature (on by default) the crate also ships an
//! in-process backend that synthesizes audio from the prompts, so the
//! engine can be exercised without a network service.

pub mod message;
pub mod prompt;
pub mod session;

#[cfg(feature = "loopback")]
pub mod loopback;

pub use message::{
    AudioSegment, FilteredPrompt, PcmFormat, ServerContent, ServerMessage, SetupComplete,
    SEGMENT_CHANNELS, SEGMENT_SAMPLE_RATE,
};
pub use prompt::{active_prompts, Prompt, WeightedPrompt, MAX_PROMPT_WEIGHT};
pub use session::{Session, SessionConnector, SessionError, SessionEvent, SessionEvents};

#[cfg(feature = "loopback")]
pub use loopback::{LoopbackConfig, LoopbackConnector, LoopbackSession};
