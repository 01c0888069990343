//! Scripted session backend for engine integration tests.
//!
//! Every session records the calls the engine makes on it, and the test can
//! push server messages into any session it opened.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use driftconf::DeckConfig;
use driftproto::{
    AudioSegment, PcmFormat, ServerMessage, Session, SessionConnector, SessionError,
    SessionEvents, WeightedPrompt,
};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Report `Closed` right after opening, before any handshake.
    CloseOnOpen,
    /// Send `setupComplete` and stay open.
    Handshake,
}

/// How a scripted session answers a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reply {
    #[default]
    Ok,
    Fail,
    /// Never answer.
    Hang,
}

impl Reply {
    async fn answer(self) -> Result<(), SessionError> {
        match self {
            Reply::Ok => Ok(()),
            Reply::Fail => Err(SessionError::Rejected("scripted failure".to_string())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Replies {
    pub pause: Reply,
    pub stop: Reply,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetPrompts(Vec<WeightedPrompt>),
    Play,
    Pause,
    Stop,
}

#[derive(Default)]
pub struct ScriptedSession {
    calls: Mutex<Vec<Call>>,
    replies: Replies,
}

impl ScriptedSession {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn prompt_updates(&self) -> Vec<Vec<WeightedPrompt>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetPrompts(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn set_weighted_prompts(&self, prompts: Vec<WeightedPrompt>) -> Result<(), SessionError> {
        self.record(Call::SetPrompts(prompts));
        Ok(())
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.record(Call::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.record(Call::Pause);
        self.replies.pause.answer().await
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.record(Call::Stop);
        self.replies.stop.answer().await
    }
}

struct Opened {
    at: Instant,
    session: Arc<ScriptedSession>,
    events: SessionEvents,
}

pub struct ScriptedConnector {
    behavior: Behavior,
    replies: Replies,
    opened: Mutex<Vec<Opened>>,
}

impl ScriptedConnector {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Self::with_replies(behavior, Replies::default())
    }

    pub fn with_replies(behavior: Behavior, replies: Replies) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            replies,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.opened.lock().unwrap().iter().map(|o| o.at).collect()
    }

    pub fn session_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<ScriptedSession> {
        Arc::clone(&self.opened.lock().unwrap()[index].session)
    }

    /// Deliver a server message on session `index`.
    pub fn send(&self, index: usize, message: ServerMessage) {
        let opened = self.opened.lock().unwrap();
        assert!(opened[index].events.message(message), "engine stopped listening");
    }

    pub fn close(&self, index: usize) {
        let opened = self.opened.lock().unwrap();
        opened[index].events.closed();
    }

    /// Wait (in paused time) until `n` sessions have been opened.
    pub async fn wait_for_sessions(&self, n: usize) {
        while self.session_count() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(
        &self,
        _model: &str,
        events: SessionEvents,
    ) -> Result<Arc<dyn Session>, SessionError> {
        let session = Arc::new(ScriptedSession {
            calls: Mutex::new(Vec::new()),
            replies: self.replies,
        });
        match self.behavior {
            Behavior::CloseOnOpen => {
                events.closed();
            }
            Behavior::Handshake => {
                events.message(ServerMessage::setup_complete());
            }
        }
        self.opened.lock().unwrap().push(Opened {
            at: Instant::now(),
            session: Arc::clone(&session),
            events,
        });
        Ok(session)
    }
}

/// Small, fast engine configuration.
pub fn test_config() -> DeckConfig {
    let mut config = DeckConfig::default();
    config.audio.sample_rate = 16_000;
    config.audio.buffer_time_secs = 2.5;
    config.effects.reverb_secs = 0.25;
    config.effects.spatial_secs = 0.1;
    config
}

/// One segment of a 440 Hz tone at the default 48 kHz stereo format.
pub fn tone_segment(secs: f64) -> AudioSegment {
    let format = PcmFormat::default();
    let frames = (secs * format.sample_rate as f64) as usize;
    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f64 / format.sample_rate as f64;
        let s = ((t * 440.0 * std::f64::consts::TAU).sin() * 0.3 * i16::MAX as f64) as i16;
        samples.push(s);
        samples.push(s);
    }
    AudioSegment::from_pcm16(&samples, format)
}

/// A segment whose payload is not base64.
pub fn garbage_segment() -> AudioSegment {
    AudioSegment {
        data: "not/base64!!".to_string(),
        mime_type: None,
    }
}

pub fn audio(segments: Vec<AudioSegment>) -> ServerMessage {
    ServerMessage::audio(segments)
}
