//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, DeckConfig, OutputKind};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/driftdeck/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("driftdeck/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("driftdeck.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, recursing into nested tables.
///
/// Scalars and arrays in `overlay` replace those in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Deserialize a merged table; missing keys take compiled defaults.
pub fn table_to_config(table: toml::Table, origin: Option<&Path>) -> Result<DeckConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.map(Path::to_path_buf).unwrap_or_default(),
            message: e.to_string(),
        })
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut DeckConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_overrides_from(config, sources, env::vars())
}

/// Apply `DRIFTDECK_*` overrides from an explicit variable list.
pub fn apply_overrides_from(
    config: &mut DeckConfig,
    sources: &mut ConfigSources,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<(), ConfigError> {
    for (key, value) in vars {
        let applied = match key.as_str() {
            "DRIFTDECK_SAMPLE_RATE" => {
                config.audio.sample_rate = parse_env(&key, &value)?;
                true
            }
            "DRIFTDECK_BUFFER_TIME_SECS" => {
                config.audio.buffer_time_secs = parse_env(&key, &value)?;
                true
            }
            "DRIFTDECK_OUTPUT" => {
                config.audio.output =
                    OutputKind::parse(&value).ok_or_else(|| ConfigError::Invalid {
                        key: key.clone(),
                        message: format!("unknown output '{value}' (expected null or cpal)"),
                    })?;
                true
            }
            "DRIFTDECK_MODEL" => {
                config.session.model = value;
                true
            }
            "DRIFTDECK_MAX_RECONNECT_ATTEMPTS" => {
                config.session.max_reconnect_attempts = parse_env(&key, &value)?;
                true
            }
            "DRIFTDECK_PROMPT_THROTTLE_MS" => {
                config.session.prompt_throttle_ms = parse_env(&key, &value)?;
                true
            }
            "DRIFTDECK_LOG_LEVEL" => {
                config.telemetry.log_level = value;
                true
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }
    Ok(())
}

/// Expand `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(s: &str) -> toml::Table {
        s.parse().unwrap()
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base = table("[audio]\nsample_rate = 44100\nbuffer_time_secs = 2.0\n");
        merge_tables(&mut base, table("[audio]\nbuffer_time_secs = 1.0\n"));

        let config = table_to_config(base, None).unwrap();
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.buffer_time_secs, 1.0);
    }

    #[test]
    fn test_env_overrides_are_recorded() {
        let mut config = DeckConfig::default();
        let mut sources = ConfigSources::default();
        let vars = vec![
            ("DRIFTDECK_OUTPUT".to_string(), "cpal".to_string()),
            ("DRIFTDECK_MAX_RECONNECT_ATTEMPTS".to_string(), "3".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];

        apply_overrides_from(&mut config, &mut sources, vars).unwrap();

        assert_eq!(config.audio.output, OutputKind::Cpal);
        assert_eq!(config.session.max_reconnect_attempts, 3);
        assert_eq!(
            sources.env_overrides,
            vec!["DRIFTDECK_OUTPUT", "DRIFTDECK_MAX_RECONNECT_ATTEMPTS"]
        );
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = DeckConfig::default();
        let mut sources = ConfigSources::default();
        let vars = vec![("DRIFTDECK_SAMPLE_RATE".to_string(), "fast".to_string())];

        let err = apply_overrides_from(&mut config, &mut sources, vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[audio\n").unwrap();

        let err = load_table(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_expand_path_leaves_absolute_paths() {
        assert_eq!(expand_path("/tmp/x.wav"), PathBuf::from("/tmp/x.wav"));
    }
}
