//! The engine actor: one task, one `select!` loop, no locks.

use std::collections::HashSet;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;

use driftconf::DeckConfig;
use driftproto::{
    active_prompts, AudioSegment, Prompt, ServerMessage, Session, SessionConnector, SessionError,
    SessionEvent, SessionEvents, WeightedPrompt,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Command, ControlParts, Effect, EngineStatus, MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE};
use crate::clock::FrameClock;
use crate::connection::{Connection, ConnectionState, Disconnect, ReconnectPolicy};
use crate::decode::decode_segment;
use crate::events::{EngineEvent, PlaybackState};
use crate::graph::EffectsGraph;
use crate::master::MasterControl;
use crate::recorder::{Recorder, DRAIN_INTERVAL_MS};
use crate::scheduler::{IngestOutcome, PlaybackScheduler};
use crate::throttle::Throttle;

const NO_ACTIVE_PROMPTS: &str = "There needs to be one active prompt to play.";
const CONNECTION_FAILED: &str =
    "Failed to maintain connection to the music session. Please check your network and try again.";

/// Longest the actor waits on any single session call.
pub(crate) const SESSION_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages from tasks the actor spawned.
enum Internal {
    Opened {
        generation: u64,
        result: Result<Arc<dyn Session>, SessionError>,
    },
    Session {
        generation: u64,
        event: SessionEvent,
    },
}

pub(super) struct EngineActor {
    model: String,
    connector: Arc<dyn SessionConnector>,

    commands: mpsc::UnboundedReceiver<Command>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    state_tx: watch::Sender<PlaybackState>,
    conn_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<EngineEvent>,

    state: PlaybackState,
    connection: Connection,
    session: Option<Arc<dyn Session>>,
    /// Bumped whenever a session is opened or released.
    generation: u64,
    /// Cancelled while nobody wants a session.
    intent: CancellationToken,
    /// Cancelled when the current session is released.
    session_token: CancellationToken,

    prompts: Vec<Prompt>,
    filtered: HashSet<String>,
    throttle: Throttle<Vec<WeightedPrompt>>,
    playback_rate: f64,

    clock: FrameClock,
    graph: EffectsGraph,
    scheduler: PlaybackScheduler,
    master: MasterControl,
    recorder: Recorder,

    reconnect_at: Option<Instant>,
    preroll_at: Option<Instant>,
    drain_at: Option<Instant>,

    buffers_scheduled: u64,
    buffers_dropped: u64,
    decode_failures: u64,
}

impl EngineActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: &DeckConfig,
        policy: ReconnectPolicy,
        connector: Arc<dyn SessionConnector>,
        parts: ControlParts,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<PlaybackState>,
        conn_tx: watch::Sender<ConnectionState>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let intent = CancellationToken::new();
        intent.cancel();

        Self {
            model: config.session.model.clone(),
            connector,
            commands,
            internal_tx,
            internal_rx,
            state_tx,
            conn_tx,
            events,
            state: PlaybackState::Stopped,
            connection: Connection::new(policy),
            session: None,
            generation: 0,
            intent,
            session_token: CancellationToken::new(),
            prompts: Vec::new(),
            filtered: HashSet::new(),
            throttle: Throttle::new(Duration::from_millis(config.session.prompt_throttle_ms)),
            playback_rate: 1.0,
            clock: parts.clock,
            graph: parts.graph,
            scheduler: parts.scheduler,
            master: parts.master,
            recorder: parts.recorder,
            reconnect_at: None,
            preroll_at: None,
            drain_at: None,
            buffers_scheduled: 0,
            buffers_dropped: 0,
            decode_failures: 0,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("engine actor running");
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    // Every handle dropped.
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
                _ = wait_until(deadline) => self.fire_timers().await,
            }
            self.publish_connection();
        }
        info!("engine actor stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.reconnect_at,
            self.preroll_at,
            self.throttle.deadline(),
            self.drain_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn wants_connected(&self) -> bool {
        !self.intent.is_cancelled()
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "playback state");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(EngineEvent::PlaybackStateChanged { state });
    }

    fn publish_connection(&self) {
        let current = self.connection.state();
        self.conn_tx.send_if_modified(|published| {
            if *published != current {
                *published = current;
                true
            } else {
                false
            }
        });
    }

    fn enter_loading(&mut self) {
        self.scheduler.begin_loading();
        self.preroll_at = None;
        self.set_state(PlaybackState::Loading);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::Stop => self.stop().await,
            Command::PlayPause => match self.state {
                PlaybackState::Playing => self.pause().await,
                PlaybackState::Paused | PlaybackState::Stopped => self.play().await,
                PlaybackState::Loading => self.stop().await,
            },
            Command::SetPrompts(prompts) => self.set_prompts(prompts),
            Command::SetMasterVolume(volume) => {
                self.master.set_volume(volume);
            }
            Command::SetPlaybackRate(rate) => {
                if rate.is_finite() {
                    self.playback_rate = rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
                    debug!(rate = self.playback_rate, "playback rate");
                }
            }
            Command::Effect(effect) => self.apply_effect(effect),
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording(),
            Command::Status(reply) => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown(reply) => {
                // Normally intercepted by the run loop.
                self.stop().await;
                let _ = reply.send(());
            }
        }
    }

    fn apply_effect(&mut self, effect: Effect) {
        let graph = &mut self.graph;
        match effect {
            Effect::Pan(pan) => {
                graph.set_pan(pan);
            }
            Effect::Mono(mono) => {
                graph.set_mono(mono);
            }
            Effect::ToggleMono => {
                graph.toggle_mono();
            }
            Effect::SpatialRotation(enabled) => {
                graph.set_spatial_rotation(enabled);
            }
            Effect::ToggleSpatialRotation => {
                graph.toggle_spatial_rotation();
            }
            Effect::FilterCutoff(value) => {
                graph.set_filter_cutoff(value);
            }
            Effect::FilterResonance(value) => {
                graph.set_filter_resonance(value);
            }
            Effect::Delay(mix) => {
                graph.set_delay(mix);
            }
            Effect::DelayTime(secs) => {
                graph.set_delay_time(secs);
            }
            Effect::DelayFeedback(feedback) => {
                graph.set_delay_feedback(feedback);
            }
            Effect::Reverb(mix) => {
                graph.set_reverb(mix);
            }
        }
    }

    fn status(&self) -> EngineStatus {
        let mut filtered: Vec<String> = self.filtered.iter().cloned().collect();
        filtered.sort();
        EngineStatus {
            playback: self.state,
            connection: self.connection.state(),
            reconnect_attempts: self.connection.attempts(),
            session_generation: self.generation,
            engine_time: self.clock.now(),
            next_start_time: self.scheduler.next_start_time(),
            buffers_in_flight: self.scheduler.in_flight(),
            buffers_scheduled: self.buffers_scheduled,
            buffers_dropped: self.buffers_dropped,
            decode_failures: self.decode_failures,
            is_recording: self.recorder.is_recording(),
            filtered_prompts: filtered,
            playback_rate: self.playback_rate,
            master_volume: self.master.volume(),
            effects: self.graph.state().clone(),
        }
    }

    fn active_prompts(&self) -> Vec<WeightedPrompt> {
        active_prompts(&self.prompts, &self.filtered)
    }

    // ---- transport ------------------------------------------------------

    async fn play(&mut self) {
        let active = self.active_prompts();
        if active.is_empty() {
            warn!("play refused: no active prompts");
            self.emit(EngineEvent::error(NO_ACTIVE_PROMPTS));
            if self.state == PlaybackState::Loading {
                self.stop().await;
            }
            return;
        }

        let busy = self.session.is_some() || self.connection.state() == ConnectionState::Connecting;
        if self.wants_connected() && self.state.accepts_audio() && busy {
            debug!(state = %self.state, "already playing");
            return;
        }

        if self.intent.is_cancelled() {
            self.intent = CancellationToken::new();
        }
        self.reconnect_at = None;

        if let Some(session) = self.session.clone() {
            // Resume the paused session.
            info!(generation = self.generation, "resuming session");
            self.enter_loading();
            self.start_session(session, active).await;
            return;
        }

        if self.connection.state() == ConnectionState::Connecting {
            debug!("session open already in progress");
            self.enter_loading();
            return;
        }

        self.enter_loading();
        self.open_session();
    }

    async fn pause(&mut self) {
        self.intent.cancel();
        self.reconnect_at = None;
        self.preroll_at = None;
        self.stop_recording();

        if let Some(session) = self.session.clone() {
            if let Err(e) = bounded("pause", session.pause()).await {
                warn!("session pause failed: {}", e);
            }
        } else {
            self.abandon_pending_open();
        }

        let silent_at = self.master.fade_out();
        self.scheduler.flush(silent_at);
        self.scheduler.reset();
        self.set_state(PlaybackState::Paused);
    }

    async fn stop(&mut self) {
        self.intent.cancel();
        self.reconnect_at = None;
        self.preroll_at = None;
        self.stop_recording();

        if let Some(session) = self.session.clone() {
            stop_in_background(session, self.generation);
        }

        let at = self.master.silence();
        self.scheduler.flush(at);
        self.scheduler.reset();
        self.release_session();
        self.connection.shutdown();
        self.throttle.cancel();
        self.set_state(PlaybackState::Stopped);
    }

    // ---- session lifecycle ---------------------------------------------

    fn open_session(&mut self) {
        if !self.connection.begin_connect() {
            return;
        }
        self.generation += 1;
        self.session_token = CancellationToken::new();

        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let model = self.model.clone();
        let intent = self.intent.clone();
        let session_token = self.session_token.clone();
        let internal = self.internal_tx.clone();

        info!(generation, model = %model, "opening session");
        tokio::spawn(async move {
            let (events, mut rx) = SessionEvents::channel();
            let result = tokio::select! {
                result = connector.connect(&model, events) => result,
                _ = intent.cancelled() => {
                    debug!(generation, "session open cancelled");
                    return;
                }
            };
            let opened = result.is_ok();
            if internal.send(Internal::Opened { generation, result }).is_err() || !opened {
                return;
            }

            // Forward callbacks until the session or the engine goes away.
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => {
                            if internal.send(Internal::Session { generation, event }).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = session_token.cancelled() => break,
                }
            }
            debug!(generation, "session event forwarding ended");
        });
    }

    /// Forget an open still in flight; its result will be stale.
    fn abandon_pending_open(&mut self) {
        if self.connection.state() == ConnectionState::Connecting {
            self.generation += 1;
        }
        self.connection.shutdown();
    }

    fn release_session(&mut self) {
        self.session_token.cancel();
        if self.session.take().is_some() {
            debug!(generation = self.generation, "session released");
        }
        self.generation += 1;
    }

    async fn start_session(&mut self, session: Arc<dyn Session>, active: Vec<WeightedPrompt>) {
        self.throttle.cancel();
        if let Err(e) = bounded("set_weighted_prompts", session.set_weighted_prompts(active)).await {
            warn!("failed to send prompts: {}", e);
            self.emit(EngineEvent::error(e.to_string()));
        }
        if let Err(e) = bounded("play", session.play()).await {
            warn!("session play failed: {}", e);
            self.emit(EngineEvent::error(e.to_string()));
        }
        self.master.fade_in();
        self.master.route(true);
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Opened { generation, result } => {
                self.on_opened(generation, result).await
            }
            Internal::Session { generation, event } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "stale session event ignored");
                    return;
                }
                self.on_session_event(event).await;
            }
        }
    }

    async fn on_opened(&mut self, generation: u64, result: Result<Arc<dyn Session>, SessionError>) {
        if generation != self.generation || !self.wants_connected() {
            if let Ok(session) = result {
                debug!(generation, "closing stale session");
                stop_in_background(session, generation);
            }
            return;
        }

        match result {
            Ok(session) => {
                info!(generation, "session opened");
                self.connection.opened();
                self.session = Some(Arc::clone(&session));
                self.filtered.clear();
                let active = self.active_prompts();
                self.start_session(session, active).await;
            }
            Err(e) => {
                warn!(generation, "session open failed: {}", e);
                self.handle_disconnect().await;
            }
        }
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(message) => self.on_message(message),
            SessionEvent::Error(e) => {
                warn!(generation = self.generation, "session error: {}", e);
                self.handle_disconnect().await;
            }
            SessionEvent::Closed => {
                info!(generation = self.generation, "session closed");
                self.handle_disconnect().await;
            }
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        if message.setup_complete.is_some() {
            debug!(generation = self.generation, "setup complete");
            self.connection.handshake_complete();
        }
        if let Some(filtered) = message.filtered_prompt {
            info!(text = %filtered.text, reason = %filtered.reason, "prompt filtered");
            self.filtered.insert(filtered.text.clone());
            self.emit(EngineEvent::FilteredPrompt {
                text: filtered.text,
                reason: filtered.reason,
            });
        }
        if let Some(content) = message.server_content {
            for segment in &content.audio_chunks {
                self.ingest_segment(segment);
            }
        }
    }

    fn ingest_segment(&mut self, segment: &AudioSegment) {
        if !self.state.accepts_audio() {
            self.buffers_dropped += 1;
            return;
        }
        let buffer = match decode_segment(segment) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.decode_failures += 1;
                warn!("dropping undecodable segment: {}", e);
                return;
            }
        };

        let now = self.clock.now();
        match self
            .scheduler
            .ingest(buffer, self.playback_rate, self.state, now)
        {
            IngestOutcome::Scheduled {
                start_time,
                resynced,
                preroll,
            } => {
                self.buffers_scheduled += 1;
                if resynced {
                    info!(now, start_time, "playback resynchronized");
                }
                if let Some(secs) = preroll {
                    debug!(secs, "pre-roll armed");
                    self.preroll_at = Some(Instant::now() + Duration::from_secs_f64(secs));
                }
            }
            IngestOutcome::Dropped => self.buffers_dropped += 1,
            IngestOutcome::Overflow => self.buffers_dropped += 1,
        }
    }

    async fn handle_disconnect(&mut self) {
        self.release_session();
        match self.connection.lost(self.wants_connected()) {
            Disconnect::Idle => {}
            Disconnect::Retry { attempt, delay } => {
                let max = self.connection.policy().max_attempts;
                warn!(attempt, max, delay_ms = delay.as_millis() as u64, "connection lost, reconnecting");
                self.enter_loading();
                self.emit(EngineEvent::error(format!(
                    "Connection lost. Reconnecting (attempt {}/{}) in {}s...",
                    attempt,
                    max,
                    delay.as_secs_f64()
                )));
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Disconnect::GiveUp { attempts } => {
                error!(attempts, "giving up on session");
                self.emit(EngineEvent::error(CONNECTION_FAILED));
                self.stop().await;
            }
        }
    }

    // ---- prompts --------------------------------------------------------

    fn set_prompts(&mut self, prompts: Vec<Prompt>) {
        self.prompts = prompts;
        let active = self.active_prompts();
        self.throttle.submit(active, Instant::now());
    }

    async fn flush_prompts(&mut self, active: Vec<WeightedPrompt>) {
        let Some(session) = self.session.clone() else {
            // Sent on the next open.
            return;
        };
        if active.is_empty() {
            self.emit(EngineEvent::error(NO_ACTIVE_PROMPTS));
            if self.state != PlaybackState::Paused && self.state != PlaybackState::Stopped {
                self.pause().await;
            }
            return;
        }
        debug!(prompts = active.len(), "sending prompts");
        if let Err(e) = bounded("set_weighted_prompts", session.set_weighted_prompts(active)).await {
            warn!("failed to send prompts: {}", e);
            self.emit(EngineEvent::error(e.to_string()));
        }
    }

    // ---- recording ------------------------------------------------------

    fn start_recording(&mut self) {
        let prompts = self.active_prompts().into_iter().map(|p| p.text).collect();
        if !self.recorder.start(prompts) {
            return;
        }
        self.master.set_tap(true);
        self.drain_at = Some(Instant::now() + Duration::from_millis(DRAIN_INTERVAL_MS));
        self.emit(EngineEvent::RecordingStateChanged { is_recording: true });
    }

    fn stop_recording(&mut self) {
        if !self.recorder.is_recording() {
            return;
        }
        self.master.set_tap(false);
        self.drain_at = None;
        match self.recorder.stop() {
            Ok(Some(recording)) => {
                self.emit(EngineEvent::RecordingStateChanged {
                    is_recording: false,
                });
                self.emit(EngineEvent::RecordingFinished {
                    wav: recording.wav,
                    prompts: recording.prompts,
                });
            }
            Ok(None) => {}
            Err(e) => {
                error!("recording failed: {}", e);
                self.emit(EngineEvent::RecordingStateChanged {
                    is_recording: false,
                });
                self.emit(EngineEvent::error(e.to_string()));
            }
        }
    }

    // ---- timers ---------------------------------------------------------

    async fn fire_timers(&mut self) {
        let now = Instant::now();

        if self.preroll_at.is_some_and(|at| at <= now) {
            self.preroll_at = None;
            if self.state == PlaybackState::Loading {
                info!("pre-roll complete");
                self.set_state(PlaybackState::Playing);
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            if self.wants_connected() {
                self.play().await;
            } else {
                debug!("reconnect skipped, no longer wanted");
            }
        }

        if let Some(active) = self.throttle.take_due(now) {
            self.flush_prompts(active).await;
        }

        if self.drain_at.is_some_and(|at| at <= now) {
            self.recorder.drain();
            self.drain_at = self
                .recorder
                .is_recording()
                .then(|| now + Duration::from_millis(DRAIN_INTERVAL_MS));
        }
    }
}

/// Await a session call for at most [`SESSION_CALL_TIMEOUT`].
async fn bounded(
    what: &'static str,
    call: impl Future<Output = Result<(), SessionError>>,
) -> Result<(), SessionError> {
    timeout(SESSION_CALL_TIMEOUT, call)
        .await
        .unwrap_or(Err(SessionError::Timeout(what)))
}

/// Best-effort stop that never holds up the actor.
fn stop_in_background(session: Arc<dyn Session>, generation: u64) {
    tokio::spawn(async move {
        if let Err(e) = bounded("stop", session.stop()).await {
            debug!(generation, "ignoring session stop failure: {}", e);
        }
    });
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
