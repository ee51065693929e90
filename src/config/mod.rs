//! Configuration management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{LiveDataRecord, WeatherDataPacket, MAX_PACKET_SIZE};

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.live_cache_size == 0 || self.server.sample_cache_size == 0 {
            return Err(Error::InvalidConfig("Cache sizes must be at least 1".into()));
        }

        if self.server.stash_window == 0 {
            return Err(Error::InvalidConfig("Stash window must be at least 1".into()));
        }

        if self.server.wraparound_threshold == 0 {
            return Err(Error::InvalidConfig(
                "Wraparound threshold must be at least 1".into(),
            ));
        }

        // One live record plus the batch overshoot must still fit
        let budget = self.client.max_sample_payload + WeatherDataPacket::PREFIX_SIZE + LiveDataRecord::HEADER_SIZE;
        if self.client.max_sample_payload == 0 || budget > MAX_PACKET_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Sample payload budget must be between 1 and {} bytes",
                MAX_PACKET_SIZE - WeatherDataPacket::PREFIX_SIZE - LiveDataRecord::HEADER_SIZE
            )));
        }

        if self.client.authenticate_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "Authenticate timeout must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("net", "weatherpush", "weatherpush").map_or_else(
            || PathBuf::from("weatherpush.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            client: ClientConfig {
                authorisation_code: 0x1234_5678,
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info,weatherpush=debug".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Live records cached per station as diff bases.
    #[serde(default = "default_live_cache_size")]
    pub live_cache_size: usize,

    /// Sample records cached as diff bases, across all stations.
    #[serde(default = "default_sample_cache_size")]
    pub sample_cache_size: usize,

    /// Stashed live records more than this many sequence ids ahead of a
    /// full live record are discarded.
    #[serde(default = "default_stash_window")]
    pub stash_window: u16,

    /// A backwards sequence jump larger than this is a counter wraparound
    /// rather than a late record.
    #[serde(default = "default_wraparound_threshold")]
    pub wraparound_threshold: u16,
}

fn default_live_cache_size() -> usize {
    5
}
fn default_sample_cache_size() -> usize {
    1
}
fn default_stash_window() -> u16 {
    100
}
fn default_wraparound_threshold() -> u16 {
    60000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            live_cache_size: default_live_cache_size(),
            sample_cache_size: default_sample_cache_size(),
            stash_window: default_stash_window(),
            wraparound_threshold: default_wraparound_threshold(),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Code sent in the Authenticate packet.
    #[serde(default)]
    pub authorisation_code: u32,

    /// Consecutive compressed live records before a full one is forced.
    #[serde(default = "default_max_compressed_live_records")]
    pub max_compressed_live_records: u32,

    /// Sample bytes to batch in front of one live record.
    #[serde(default = "default_max_sample_payload")]
    pub max_sample_payload: usize,

    /// Resend Authenticate if no reply arrives within this time.
    #[serde(default = "default_authenticate_timeout", with = "humantime_serde")]
    pub authenticate_timeout: Duration,
}

fn default_max_compressed_live_records() -> u32 {
    30
}
fn default_max_sample_payload() -> usize {
    65000
}
fn default_authenticate_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            authorisation_code: 0,
            max_compressed_live_records: default_max_compressed_live_records(),
            max_sample_payload: default_max_sample_payload(),
            authenticate_timeout: default_authenticate_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path. Logs go to stdout when unset.
    pub file: Option<PathBuf>,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use std::sync::Mutex;
    use tracing_subscriber::{fmt, prelude::*, util::TryInitError, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);
    let init_err = |e: TryInitError| Error::Config(format!("Failed to init logging: {e}"));

    match (&config.file, config.format == "json") {
        (Some(path), json) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("Failed to open log file: {e}")))?;
            let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
            if json {
                subscriber.with(layer.json()).try_init().map_err(init_err)?;
            } else {
                subscriber.with(layer).try_init().map_err(init_err)?;
            }
        }
        (None, true) => {
            subscriber
                .with(fmt::layer().json())
                .try_init()
                .map_err(init_err)?;
        }
        (None, false) => {
            subscriber
                .with(fmt::layer().with_ansi(config.color))
                .try_init()
                .map_err(init_err)?;
        }
    }

    Ok(())
}
