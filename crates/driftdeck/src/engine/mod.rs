//! Public control surface of the engine.
//!
//! [`Engine`] is a cheap, cloneable handle. Every call turns into a
//! [`Command`] for the single actor task that owns all control state: the
//! session, the scheduler, the effects graph control half, timers. The
//! render side comes back as a [`Renderer`] for an output backend to drive.
//!
//! ```text
//! UI ──► Engine ──cmd──► EngineActor ◄── session events (tagged by generation)
//!                           │  ▲
//!                  rtrb     │  └── timers: reconnect, pre-roll, throttle, drain
//!                           ▼
//!                        Renderer (audio thread)
//! ```

mod actor;

use std::sync::Arc;

use driftconf::DeckConfig;
use driftproto::{Prompt, SessionConnector};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::info;

use crate::clock::FrameClock;
use crate::connection::{ConnectionState, ReconnectPolicy};
use crate::error::EngineError;
use crate::events::{EngineEvent, PlaybackState};
use crate::graph::{EffectsGraph, EffectsState};
use crate::impulse::{generate_impulse, ImpulseSpec};
use crate::master::{master_bus, MasterControl};
use crate::output::Output;
use crate::recorder::Recorder;
use crate::render::{RenderStats, Renderer};
use crate::scheduler::PlaybackScheduler;

use actor::EngineActor;

/// Slowest and fastest playback rate multipliers.
pub const MIN_PLAYBACK_RATE: f64 = 0.25;
pub const MAX_PLAYBACK_RATE: f64 = 4.0;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Effect {
    Pan(f32),
    Mono(bool),
    ToggleMono,
    SpatialRotation(bool),
    ToggleSpatialRotation,
    FilterCutoff(f32),
    FilterResonance(f32),
    Delay(f32),
    DelayTime(f32),
    DelayFeedback(f32),
    Reverb(f32),
}

#[derive(Debug)]
pub(crate) enum Command {
    Play,
    Pause,
    Stop,
    PlayPause,
    SetPrompts(Vec<Prompt>),
    SetMasterVolume(f32),
    SetPlaybackRate(f64),
    Effect(Effect),
    StartRecording,
    StopRecording,
    Status(oneshot::Sender<EngineStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Snapshot of control-side state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub playback: PlaybackState,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
    pub session_generation: u64,
    /// Engine seconds.
    pub engine_time: f64,
    pub next_start_time: f64,
    pub buffers_in_flight: usize,
    pub buffers_scheduled: u64,
    pub buffers_dropped: u64,
    pub decode_failures: u64,
    pub is_recording: bool,
    pub filtered_prompts: Vec<String>,
    pub playback_rate: f64,
    pub master_volume: f32,
    pub effects: EffectsState,
}

/// Control-side halves created alongside a [`Renderer`].
pub(crate) struct ControlParts {
    pub clock: FrameClock,
    pub graph: EffectsGraph,
    pub scheduler: PlaybackScheduler,
    pub master: MasterControl,
    pub recorder: Recorder,
}

/// Build the DSP chain and split it into control parts and a renderer.
pub(crate) fn build_render_side(config: &DeckConfig) -> (ControlParts, Renderer) {
    let sample_rate = config.audio.sample_rate;
    let clock = FrameClock::new(sample_rate);

    let mut rng = rand::thread_rng();
    let reverb = generate_impulse(
        sample_rate,
        ImpulseSpec::new(config.effects.reverb_secs, config.effects.reverb_decay),
        &mut rng,
    );
    let spatial = generate_impulse(
        sample_rate,
        ImpulseSpec::new(config.effects.spatial_secs, config.effects.spatial_decay),
        &mut rng,
    );

    let (graph, graph_renderer) = EffectsGraph::new(clock.clone(), &reverb, &spatial);
    let (scheduler, sources) = PlaybackScheduler::new(sample_rate, config.audio.buffer_time_secs);
    let (master, bus, tap) = master_bus(clock.clone());
    let recorder = Recorder::new(sample_rate, tap);

    let renderer = Renderer::new(clock.clone(), sources, graph_renderer, bus);
    (
        ControlParts {
            clock,
            graph,
            scheduler,
            master,
            recorder,
        },
        renderer,
    )
}

/// Handle to a running engine.
#[derive(Clone)]
pub struct Engine {
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
    connection: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<EngineEvent>,
    clock: FrameClock,
    stats: Arc<RenderStats>,
}

impl Engine {
    /// Spawn the engine actor on the current tokio runtime.
    ///
    /// The returned [`Renderer`] produces no sound until something pulls
    /// it; see [`Engine::start`] for the usual pairing with an output.
    pub fn spawn(
        config: &DeckConfig,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<(Engine, Renderer), EngineError> {
        config.validate()?;

        let (parts, renderer) = build_render_side(config);
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PlaybackState::Stopped);
        let (conn_tx, conn_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine = Engine {
            tx,
            state: state_rx,
            connection: conn_rx,
            events: events.clone(),
            clock: parts.clock.clone(),
            stats: renderer.stats(),
        };

        let actor = EngineActor::new(
            config,
            ReconnectPolicy::from_config(&config.session),
            connector,
            parts,
            rx,
            state_tx,
            conn_tx,
            events,
        );
        tokio::spawn(actor.run());

        info!(
            sample_rate = config.audio.sample_rate,
            buffer_time = config.audio.buffer_time_secs,
            model = %config.session.model,
            "engine started"
        );
        Ok((engine, renderer))
    }

    /// Spawn the engine and hand its renderer to the configured output.
    pub fn start(
        config: &DeckConfig,
        connector: Arc<dyn SessionConnector>,
    ) -> Result<(Engine, Output), EngineError> {
        let (engine, renderer) = Self::spawn(config, connector)?;
        let output = Output::start(config.audio.output, renderer)?;
        Ok((engine, output))
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx.send(command).map_err(|_| EngineError::Closed)
    }

    pub fn play(&self) -> Result<(), EngineError> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.send(Command::Pause)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(Command::Stop)
    }

    /// Playing pauses, paused or stopped plays, loading stops.
    pub fn play_pause(&self) -> Result<(), EngineError> {
        self.send(Command::PlayPause)
    }

    /// Replace the full prompt set. Upstream updates are throttled.
    pub fn set_weighted_prompts(&self, prompts: Vec<Prompt>) -> Result<(), EngineError> {
        self.send(Command::SetPrompts(prompts))
    }

    /// 0.0..=1.0
    pub fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.send(Command::SetMasterVolume(volume))
    }

    /// Applies to buffers scheduled from now on, clamped to
    /// [`MIN_PLAYBACK_RATE`]..=[`MAX_PLAYBACK_RATE`].
    pub fn set_playback_rate(&self, rate: f64) -> Result<(), EngineError> {
        self.send(Command::SetPlaybackRate(rate))
    }

    pub fn set_pan(&self, pan: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::Pan(pan)))
    }

    pub fn set_mono(&self, mono: bool) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::Mono(mono)))
    }

    pub fn toggle_mono(&self) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::ToggleMono))
    }

    pub fn set_spatial_rotation(&self, enabled: bool) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::SpatialRotation(enabled)))
    }

    pub fn toggle_spatial_rotation(&self) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::ToggleSpatialRotation))
    }

    pub fn set_filter_cutoff(&self, value: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::FilterCutoff(value)))
    }

    pub fn set_filter_resonance(&self, value: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::FilterResonance(value)))
    }

    pub fn set_delay(&self, mix: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::Delay(mix)))
    }

    pub fn set_delay_time(&self, secs: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::DelayTime(secs)))
    }

    pub fn set_delay_feedback(&self, feedback: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::DelayFeedback(feedback)))
    }

    pub fn set_reverb(&self, mix: f32) -> Result<(), EngineError> {
        self.send(Command::Effect(Effect::Reverb(mix)))
    }

    pub fn start_recording(&self) -> Result<(), EngineError> {
        self.send(Command::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<(), EngineError> {
        self.send(Command::StopRecording)
    }

    pub fn playback_state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// A receiver that observes every playback state change.
    pub fn watch_playback(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn render_stats(&self) -> Arc<RenderStats> {
        Arc::clone(&self.stats)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status(tx))?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Stop playback and end the actor. Other handles see
    /// [`EngineError::Closed`] afterwards.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| EngineError::Closed)
    }
}
