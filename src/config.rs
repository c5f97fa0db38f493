//! Configuration loading (C10): defaults, an optional `uppyyl.toml`, then
//! `UPPYYL_*` environment overrides, in that precedence order.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid log level `{0}`, expected one of error/warn/info/debug/trace")]
    InvalidLogLevel(String),
    #[error("invalid environment variable `{name}`: {message}")]
    InvalidEnv { name: String, message: String },
}

/// Logging configuration: the level name tracing-subscriber's `EnvFilter`
/// ultimately consumes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];

    fn validate(&self) -> Result<(), ConfigError> {
        if Self::LEVELS.contains(&self.level.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::InvalidLogLevel(self.level.clone()))
        }
    }
}

/// Seeds the simulator's RNG (§4.7's random-step command).
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct RandomConfig {
    pub seed: Option<u64>,
}

/// Bounds on the trace the engine keeps in memory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_trace_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_trace_len: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct SimConfig {
    pub logging: LoggingConfig,
    pub random: RandomConfig,
    pub engine: EngineConfig,
}

impl SimConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()
    }
}

/// Loads a [`SimConfig`] by layering defaults, an optional TOML file, and
/// `UPPYYL_*` environment variables, in that precedence order.
pub struct ConfigLoader;

impl ConfigLoader {
    /// `path`, if present, is read as TOML; a missing file falls back to
    /// defaults rather than erroring (only an unreadable *existing* file,
    /// or one that fails to parse, is fatal).
    pub fn load(path: Option<&Path>) -> Result<SimConfig, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => Self::load_from_file(p)?,
            _ => SimConfig::default(),
        };
        Self::apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<SimConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env_overrides(config: &mut SimConfig) -> Result<(), ConfigError> {
        if let Ok(level) = std::env::var("UPPYYL_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = std::env::var("UPPYYL_LOG_JSON") {
            config.logging.json = parse_bool("UPPYYL_LOG_JSON", &json)?;
        }
        if let Ok(seed) = std::env::var("UPPYYL_RANDOM_SEED") {
            config.random.seed = Some(seed.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "UPPYYL_RANDOM_SEED".into(),
                message: format!("`{}` is not a valid u64", seed),
            })?);
        }
        if let Ok(max_len) = std::env::var("UPPYYL_MAX_TRACE_LEN") {
            config.engine.max_trace_len = max_len.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "UPPYYL_MAX_TRACE_LEN".into(),
                message: format!("`{}` is not a valid usize", max_len),
            })?;
        }
        Ok(())
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            message: format!("`{}` is not a valid boolean", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.max_trace_len, 10_000);
    }

    #[test]
    fn invalid_log_level_rejected() {
        let config = SimConfig { logging: LoggingConfig { level: "verbose".into(), json: false }, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = ConfigLoader::load(Some(Path::new("/nonexistent/uppyyl.toml"))).unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uppyyl.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let config = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uppyyl.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        std::env::set_var("UPPYYL_LOG_LEVEL", "trace");
        let config = ConfigLoader::load(Some(&path)).unwrap();
        std::env::remove_var("UPPYYL_LOG_LEVEL");
        assert_eq!(config.logging.level, "trace");
    }
}
