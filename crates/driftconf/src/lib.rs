//! Minimal configuration loading for driftdeck.
//!
//! Kept dependency-light so every driftdeck crate can import it.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/driftdeck/config.toml` (system)
//! 2. `~/.config/driftdeck/config.toml` (user)
//! 3. `./driftdeck.toml` (local override, or a path given on the CLI)
//! 4. Environment variables (`DRIFTDECK_*`)
//!
//! Files are merged key by key, so a local file only needs the keys it
//! changes.
//!
//! # Example Config
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! buffer_time_secs = 2.5
//! output = "cpal"
//!
//! [session]
//! model = "models/lyria-realtime-exp"
//! max_reconnect_attempts = 5
//! backoff_base_ms = 1000
//! backoff_max_ms = 8000
//! prompt_throttle_ms = 150
//!
//! [effects]
//! reverb_secs = 3.0
//! reverb_decay = 2.0
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};
pub use sections::{AudioConfig, EffectsConfig, OutputKind, SessionConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete driftdeck configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeckConfig {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub effects: EffectsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl DeckConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace `./driftdeck.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars were applied.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        Self::load_files(&files)
    }

    /// Load exactly the given files (in order), then apply env overrides.
    pub fn load_files(files: &[PathBuf]) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in files {
            let table = loader::load_table(path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path.clone());
        }

        let mut config = loader::table_to_config(merged, files.last().map(PathBuf::as_path))?;
        loader::apply_env_overrides(&mut config, &mut sources)?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sample_rate < 8_000 {
            return Err(ConfigError::Invalid {
                key: "audio.sample_rate".to_string(),
                message: format!("{} Hz is below 8000 Hz", self.audio.sample_rate),
            });
        }
        if !self.audio.buffer_time_secs.is_finite() || self.audio.buffer_time_secs < 0.0 {
            return Err(ConfigError::Invalid {
                key: "audio.buffer_time_secs".to_string(),
                message: "must be a non-negative number of seconds".to_string(),
            });
        }
        if self.session.backoff_max_ms < self.session.backoff_base_ms {
            return Err(ConfigError::Invalid {
                key: "session.backoff_max_ms".to_string(),
                message: "must be >= session.backoff_base_ms".to_string(),
            });
        }
        for (key, secs) in [
            ("effects.reverb_secs", self.effects.reverb_secs),
            ("effects.spatial_secs", self.effects.spatial_secs),
        ] {
            if !(0.01..=10.0).contains(&secs) {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    message: format!("{secs} s is outside 0.01..=10"),
                });
            }
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# driftdeck configuration\n\n");

        output.push_str("[audio]\n");
        output.push_str(&format!("sample_rate = {}\n", self.audio.sample_rate));
        output.push_str(&format!(
            "buffer_time_secs = {:?}\n",
            self.audio.buffer_time_secs
        ));
        output.push_str(&format!("output = \"{}\"\n", self.audio.output.as_str()));

        output.push_str("\n[session]\n");
        output.push_str(&format!("model = \"{}\"\n", self.session.model));
        output.push_str(&format!(
            "max_reconnect_attempts = {}\n",
            self.session.max_reconnect_attempts
        ));
        output.push_str(&format!(
            "backoff_base_ms = {}\n",
            self.session.backoff_base_ms
        ));
        output.push_str(&format!("backoff_max_ms = {}\n", self.session.backoff_max_ms));
        output.push_str(&format!(
            "prompt_throttle_ms = {}\n",
            self.session.prompt_throttle_ms
        ));

        output.push_str("\n[effects]\n");
        output.push_str(&format!("reverb_secs = {:?}\n", self.effects.reverb_secs));
        output.push_str(&format!("reverb_decay = {:?}\n", self.effects.reverb_decay));
        output.push_str(&format!("spatial_secs = {:?}\n", self.effects.spatial_secs));
        output.push_str(&format!(
            "spatial_decay = {:?}\n",
            self.effects.spatial_decay
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeckConfig::default();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.buffer_time_secs, 2.5);
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.session.prompt_throttle_ms, 150);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = DeckConfig::default();
        let rendered = config.to_toml();
        assert!(rendered.contains("[audio]"));
        assert!(rendered.contains("[session]"));

        let parsed: DeckConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = DeckConfig::default();
        config.session.backoff_max_ms = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_max_ms"));
    }

    #[test]
    fn test_load_files_merges_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let system = dir.path().join("system.toml");
        let local = dir.path().join("local.toml");
        std::fs::write(
            &system,
            "[audio]\nbuffer_time_secs = 1.0\n[session]\nmodel = \"a\"\n",
        )
        .unwrap();
        std::fs::write(&local, "[session]\nmodel = \"b\"\n").unwrap();

        let (config, sources) = DeckConfig::load_files(&[system.clone(), local.clone()]).unwrap();
        assert_eq!(config.audio.buffer_time_secs, 1.0);
        assert_eq!(config.session.model, "b");
        assert_eq!(config.session.backoff_max_ms, 8000);
        assert_eq!(sources.files, vec![system, local]);
    }
}
