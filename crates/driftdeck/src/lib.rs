//! driftdeck: realtime playback and effects for generative audio sessions.
//!
//! A session backend streams encoded PCM segments. driftdeck decodes them,
//! schedules them back to back on a sample-accurate engine clock, keeps the
//! session alive across disconnects, and plays the result through a fixed
//! effects graph whose every switch is gain automation:
//!
//! ```text
//! segments ─► decode ─► PlaybackScheduler ─► sources ─┐
//!                                                     ▼
//!   [mono] ─► lowpass ─► panner ─┬─ dry ─────────────────────┐
//!                                ├─ spatial conv ─ wet ──────┤
//!                                ├─ delay send ─ delay line ─┤
//!                                └─ reverb send ─ reverb ────┤
//!                                                            ▼
//!                            output gain ─► master volume ─► device / tap
//! ```
//!
//! Control code talks to an [`Engine`] handle; an output backend drives the
//! [`Renderer`] on the audio thread. The two halves share nothing but
//! lock-free queues and the frame clock.

pub mod clock;
pub mod connection;
pub mod decode;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod impulse;
pub mod master;
pub mod output;
pub mod param;
pub mod recorder;
pub mod render;
pub mod scheduler;
pub mod throttle;

pub use clock::{FrameClock, RENDER_QUANTUM};
pub use connection::{Connection, ConnectionState, Disconnect, ReconnectPolicy};
pub use decode::{decode_segment, DecodeError, PcmBuffer};
pub use engine::{Engine, EngineStatus, MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE};
pub use error::EngineError;
pub use events::{EngineEvent, PlaybackState};
pub use graph::{EffectsGraph, EffectsState, GraphRenderer, ParamId};
pub use impulse::{generate_impulse, generate_seeded, ImpulseResponse, ImpulseSpec};
pub use output::{NullOutput, Output, OutputError};
pub use param::{AudioParam, Automation};
pub use recorder::{encode_wav, Recorder, RecorderError, Recording};
pub use render::{RenderStats, Renderer};
pub use scheduler::{IngestOutcome, PlaybackScheduler, ScheduledBuffer, SourceMixer};
pub use throttle::Throttle;
