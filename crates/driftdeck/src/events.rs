//! State and events published to UI consumers

use std::fmt;

use serde::Serialize;

/// Transport state as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    /// Waiting for a session or for pre-roll to fill.
    Loading,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }

    /// States in which incoming audio is scheduled.
    pub fn accepts_audio(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PlaybackStateChanged { state: PlaybackState },

    /// The backend refused a prompt; it stays out of the active set until
    /// the next session.
    FilteredPrompt { text: String, reason: String },

    /// Human-readable problem, including reconnect progress and fatal
    /// connection loss.
    Error { message: String },

    RecordingStateChanged { is_recording: bool },

    RecordingFinished {
        #[serde(skip)]
        wav: Vec<u8>,
        /// Texts of the prompts that were active when recording started.
        prompts: Vec<String>,
    },
}

impl EngineEvent {
    pub fn error(message: impl Into<String>) -> Self {
        EngineEvent::Error {
            message: message.into(),
        }
    }
}
