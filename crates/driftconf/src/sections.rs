//! Configuration sections.

use serde::{Deserialize, Serialize};

/// Which output backend renders the master bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Paced render thread with no device (headless, CI, recording only).
    #[default]
    Null,
    /// System audio device via cpal (requires the `cpal-output` feature).
    Cpal,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Null => "null",
            OutputKind::Cpal => "cpal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Some(OutputKind::Null),
            "cpal" => Some(OutputKind::Cpal),
            _ => None,
        }
    }
}

/// Audio engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Engine sample rate in Hz.
    /// Default: 48000 (matches the session's PCM format)
    #[serde(default = "AudioConfig::default_sample_rate")]
    pub sample_rate: u32,

    /// Pre-roll before the first buffer of a loading phase starts.
    /// Default: 2.5
    #[serde(default = "AudioConfig::default_buffer_time_secs")]
    pub buffer_time_secs: f64,

    /// Output backend.
    /// Default: null
    #[serde(default)]
    pub output: OutputKind,
}

impl AudioConfig {
    fn default_sample_rate() -> u32 {
        48_000
    }

    fn default_buffer_time_secs() -> f64 {
        2.5
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Self::default_sample_rate(),
            buffer_time_secs: Self::default_buffer_time_secs(),
            output: OutputKind::default(),
        }
    }
}

/// Generative session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier passed to the backend on open.
    #[serde(default = "SessionConfig::default_model")]
    pub model: String,

    /// Reconnect attempts before giving up.
    /// Default: 5
    #[serde(default = "SessionConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base of the exponential reconnect backoff.
    /// Default: 1000
    #[serde(default = "SessionConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Cap on the reconnect backoff.
    /// Default: 8000
    #[serde(default = "SessionConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Trailing window for coalescing prompt-weight updates.
    /// Default: 150
    #[serde(default = "SessionConfig::default_prompt_throttle_ms")]
    pub prompt_throttle_ms: u64,
}

impl SessionConfig {
    fn default_model() -> String {
        "models/lyria-realtime-exp".to_string()
    }

    fn default_max_reconnect_attempts() -> u32 {
        5
    }

    fn default_backoff_base_ms() -> u64 {
        1000
    }

    fn default_backoff_max_ms() -> u64 {
        8000
    }

    fn default_prompt_throttle_ms() -> u64 {
        150
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_max_ms: Self::default_backoff_max_ms(),
            prompt_throttle_ms: Self::default_prompt_throttle_ms(),
        }
    }
}

/// Synthesized impulse responses for the convolution paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectsConfig {
    #[serde(default = "EffectsConfig::default_reverb_secs")]
    pub reverb_secs: f64,

    #[serde(default = "EffectsConfig::default_reverb_decay")]
    pub reverb_decay: f64,

    #[serde(default = "EffectsConfig::default_spatial_secs")]
    pub spatial_secs: f64,

    #[serde(default = "EffectsConfig::default_spatial_decay")]
    pub spatial_decay: f64,
}

impl EffectsConfig {
    fn default_reverb_secs() -> f64 {
        3.0
    }

    fn default_reverb_decay() -> f64 {
        2.0
    }

    fn default_spatial_secs() -> f64 {
        0.5
    }

    fn default_spatial_decay() -> f64 {
        6.0
    }
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            reverb_secs: Self::default_reverb_secs(),
            reverb_decay: Self::default_reverb_decay(),
            spatial_secs: Self::default_spatial_secs(),
            spatial_decay: Self::default_spatial_decay(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default tracing filter when RUST_LOG is unset.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
