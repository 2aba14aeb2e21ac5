use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::util::paths::{config_path, data_dir, transcripts_dir};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Overrides the per-probe default timeout, in milliseconds
pub const ENV_TIMEOUT_MS: &str = "PUPPETEER_TIMEOUT_MS";
/// Enables transcript recording when set to a truthy value
pub const ENV_RECORD: &str = "PUPPETEER_RECORD";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Wait applied to probe calls that do not set their own (None = until close)
    pub default_timeout: Option<Duration>,
    pub transcript: TranscriptConfig,
    /// Markdown file receiving `report` payloads
    pub report_path: Option<PathBuf>,
    /// Cache `override` answers for identical firings
    pub cache_enabled: bool,
    /// File whose contents are forwarded to the agent with each request
    pub instructions_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptConfig {
    pub record: bool,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlTranscriptConfig {
    pub record: Option<bool>,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlReportConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCacheConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlInstructionsConfig {
    pub path: Option<PathBuf>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub default_timeout_ms: Option<u64>,
    pub transcript: Option<TomlTranscriptConfig>,
    pub report: Option<TomlReportConfig>,
    pub cache: Option<TomlCacheConfig>,
    pub instructions: Option<TomlInstructionsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            transcript: TranscriptConfig {
                record: false,
                dir: transcripts_dir(),
            },
            report_path: None,
            cache_enabled: false,
            instructions_path: None,
        }
    }
}

impl Config {
    /// Load configuration from the data directory, merging with defaults.
    ///
    /// Never fails: an unreadable or malformed file is logged and ignored.
    pub fn load() -> Self {
        let mut config = Config::default();

        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        match Self::read_toml(&config_file) {
            Ok(toml_config) => config.merge(toml_config),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring config file, using defaults");
            }
        }

        if let Err(err) = config.apply_env(|name| std::env::var(name).ok()) {
            tracing::warn!(error = %err, "ignoring environment override");
        }

        config
    }

    /// Load configuration from `path`, failing on any error
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.merge(Self::read_toml(path)?);
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str::<TomlConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge file settings on top of the current values
    pub fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(ms) = toml_config.default_timeout_ms {
            self.default_timeout = timeout_from_ms(ms);
        }

        if let Some(transcript) = toml_config.transcript {
            if let Some(record) = transcript.record {
                self.transcript.record = record;
            }
            if let Some(dir) = transcript.dir {
                self.transcript.dir = expand_home(dir);
            }
        }

        if let Some(report) = toml_config.report {
            self.report_path = report.path.map(expand_home);
        }

        if let Some(cache) = toml_config.cache {
            if let Some(enabled) = cache.enabled {
                self.cache_enabled = enabled;
            }
        }

        if let Some(instructions) = toml_config.instructions {
            self.instructions_path = instructions.path.map(expand_home);
        }
    }

    /// Apply environment overrides, reading variables through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TIMEOUT_MS) {
            let ms = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_TIMEOUT_MS,
                    value: value.clone(),
                })?;
            self.default_timeout = timeout_from_ms(ms);
        }

        if let Some(value) = lookup(ENV_RECORD) {
            self.transcript.record = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: ENV_RECORD,
                        value,
                    })
                }
            };
        }

        Ok(())
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::warn!(error = %e, "failed to create config directory");
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "failed to write default config");
        }
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

/// Read an instructions file; blank or unreadable files yield `None`
pub fn read_instructions(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => None,
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read instructions file"
            );
            None
        }
    }
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms))
    }
}

/// Resolve a leading `~/` against the home directory
fn expand_home(path: PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(data_dir)
            .join(rest),
        Err(_) => path,
    }
}
