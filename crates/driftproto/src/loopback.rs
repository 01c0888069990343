//! In-process backend that synthesizes tones from the weighted prompts.
//!
//! Useful for running the engine without network access: each prompt maps
//! to a pentatonic pitch, its weight to loudness, and segments arrive at
//! real-time pace while the session is playing. Prompts containing a
//! blocked word are reported through `filteredPrompt` and left out of the
//! mix, the way a real backend's content policy behaves.

use std::collections::{HashMap, HashSet};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::{
    AudioSegment, PcmFormat, ServerMessage, Session, SessionConnector, SessionError,
    SessionEvents, WeightedPrompt,
};

/// Semitone offsets of a major pentatonic scale over two octaves.
const PENTATONIC: [i32; 10] = [0, 2, 4, 7, 9, 12, 14, 16, 19, 21];

/// Peak level of the summed voices.
const HEADROOM: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Length of each emitted segment.
    pub segment_secs: f64,
    pub format: PcmFormat,
    /// Case-insensitive substrings that trigger a content-filter notice.
    pub blocked_words: Vec<String>,
    /// Root pitch of the scale in Hz.
    pub root_hz: f64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            segment_secs: 2.0,
            format: PcmFormat::default(),
            blocked_words: Vec::new(),
            root_hz: 220.0,
        }
    }
}

/// Connector for [`LoopbackSession`]s.
pub struct LoopbackConnector {
    config: LoopbackConfig,
    connects: AtomicU64,
}

impl LoopbackConnector {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            connects: AtomicU64::new(0),
        }
    }

    /// Number of sessions opened so far.
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

#[async_trait]
impl SessionConnector for LoopbackConnector {
    async fn connect(
        &self,
        model: &str,
        events: SessionEvents,
    ) -> Result<Arc<dyn Session>, SessionError> {
        let id = self.connects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(session = id, model, "loopback session opened");

        let (tx, rx) = mpsc::unbounded_channel();
        let generator = Generator::new(self.config.clone());
        tokio::spawn(run_session(id, generator, events, rx));

        Ok(Arc::new(LoopbackSession { tx }))
    }
}

#[derive(Debug)]
enum Command {
    SetPrompts(Vec<WeightedPrompt>),
    Play,
    Pause,
    Stop,
}

/// Handle to a running loopback session task.
pub struct LoopbackSession {
    tx: mpsc::UnboundedSender<Command>,
}

impl LoopbackSession {
    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl Session for LoopbackSession {
    async fn set_weighted_prompts(&self, prompts: Vec<WeightedPrompt>) -> Result<(), SessionError> {
        self.send(Command::SetPrompts(prompts))
    }

    async fn play(&self) -> Result<(), SessionError> {
        self.send(Command::Play)
    }

    async fn pause(&self) -> Result<(), SessionError> {
        self.send(Command::Pause)
    }

    async fn stop(&self) -> Result<(), SessionError> {
        self.send(Command::Stop)
    }
}

async fn run_session(
    id: u64,
    mut generator: Generator,
    events: SessionEvents,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    if !events.message(ServerMessage::setup_complete()) {
        return;
    }

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(generator.config.segment_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut playing = false;

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::SetPrompts(prompts)) => {
                        for text in generator.set_prompts(prompts) {
                            events.message(ServerMessage::filtered(
                                text,
                                "prompt contains a blocked word",
                            ));
                        }
                    }
                    Some(Command::Play) => {
                        if !playing {
                            playing = true;
                            ticker.reset_immediately();
                        }
                    }
                    Some(Command::Pause) => playing = false,
                    Some(Command::Stop) | None => {
                        events.closed();
                        break;
                    }
                }
            }
            _ = ticker.tick(), if playing => {
                let segment = generator.next_segment();
                if !events.message(ServerMessage::audio(vec![segment])) {
                    break;
                }
            }
        }
    }

    debug!(session = id, "loopback session finished");
}

struct Voice {
    freq: f64,
    amp: f64,
    pan: f64,
}

/// Phase-continuous tone synthesis for one session.
struct Generator {
    config: LoopbackConfig,
    voices: HashMap<String, Voice>,
    phases: HashMap<String, f64>,
    filtered: HashSet<String>,
}

impl Generator {
    fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            voices: HashMap::new(),
            phases: HashMap::new(),
            filtered: HashSet::new(),
        }
    }

    fn is_blocked(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.config
            .blocked_words
            .iter()
            .any(|w| !w.is_empty() && lower.contains(&w.to_lowercase()))
    }

    /// Returns texts newly rejected by the content filter.
    fn set_prompts(&mut self, prompts: Vec<WeightedPrompt>) -> Vec<String> {
        let mut rejected = Vec::new();
        let mut accepted = Vec::new();
        for prompt in prompts {
            if self.is_blocked(&prompt.text) {
                if self.filtered.insert(prompt.text.clone()) {
                    rejected.push(prompt.text);
                }
            } else if prompt.weight > 0.0 {
                accepted.push(prompt);
            }
        }

        let total: f64 = accepted.iter().map(|p| p.weight as f64).sum();
        self.voices.clear();
        for prompt in accepted {
            let hash = text_hash(&prompt.text);
            let degree = PENTATONIC[(hash % PENTATONIC.len() as u64) as usize];
            let freq = self.config.root_hz * 2f64.powf(degree as f64 / 12.0);
            let pan = ((hash >> 8) % 101) as f64 / 100.0 - 0.5;
            let amp = HEADROOM * prompt.weight as f64 / total.max(1.0);
            self.voices.insert(prompt.text, Voice { freq, amp, pan });
        }
        self.phases.retain(|text, _| self.voices.contains_key(text));
        rejected
    }

    fn next_segment(&mut self) -> AudioSegment {
        let format = self.config.format;
        let channels = format.channels.max(1) as usize;
        let frames = (self.config.segment_secs * format.sample_rate as f64).round() as usize;
        let sr = format.sample_rate as f64;

        let mut samples = vec![0i16; frames * channels];
        let mut mix = vec![(0.0f64, 0.0f64); frames];

        for (text, voice) in &self.voices {
            let phase = self.phases.entry(text.clone()).or_insert(0.0);
            let step = TAU * voice.freq / sr;
            let left_gain = voice.amp * (0.5 - voice.pan * 0.5).sqrt();
            let right_gain = voice.amp * (0.5 + voice.pan * 0.5).sqrt();
            for frame in mix.iter_mut() {
                let s = phase.sin();
                frame.0 += s * left_gain;
                frame.1 += s * right_gain;
                *phase = (*phase + step) % TAU;
            }
        }

        for (i, (l, r)) in mix.into_iter().enumerate() {
            let base = i * channels;
            if channels == 1 {
                samples[base] = to_pcm16((l + r) * 0.5);
            } else {
                samples[base] = to_pcm16(l);
                samples[base + 1] = to_pcm16(r);
            }
        }

        AudioSegment::from_pcm16(&samples, format)
    }
}

fn to_pcm16(value: f64) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f64) as i16
}

/// FNV-1a, stable across runs so a prompt always gets the same pitch.
fn text_hash(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.to_lowercase().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
