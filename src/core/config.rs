//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SnrError};
use crate::retention::scheduler::parse_schedule;

/// Full collector configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub output: OutputConfig,
    pub retention: RetentionConfig,
    pub parser: ParserConfig,
    pub paths: PathsConfig,
}

/// Device link settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Port read timeout; a timeout is reported as an empty read.
    pub read_timeout_ms: u64,
    pub read_chunk_bytes: usize,
}

/// Where parsed artifacts land.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Per-batch INI metadata file, rewritten for every batch.
    pub ini_path: PathBuf,
    /// Root of `<YYYYMMDD>/<batch>/<serial>.bmp`.
    pub image_root: PathBuf,
    /// Root of `<YYYYMMDD>.log` status logs.
    pub log_root: PathBuf,
}

/// Keep windows and sweep schedules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    pub image_keep_days: u64,
    pub log_keep_days: u64,
    /// Six-field cron expression (sec min hour dom month dow).
    pub image_sweep_cron: String,
    pub log_sweep_cron: String,
}

/// Parser cadence and buffer limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ParserConfig {
    pub idle_timeout_ms: u64,
    /// Buffer size that raises a warning.
    pub buffer_high_water_bytes: usize,
    /// Buffer size at which unparsed bytes are dropped.
    pub buffer_cap_bytes: usize,
    pub handoff_channel_capacity: usize,
}

/// Filesystem paths used by the daemon itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let port_name = if cfg!(windows) { "COM1" } else { "/dev/ttyUSB0" };
        Self {
            port_name: port_name.to_string(),
            baud_rate: 115_200,
            reconnect_delay_ms: 3_000,
            read_timeout_ms: 500,
            read_chunk_bytes: 1024,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            ini_path: data.join("SNRinfo.ini"),
            image_root: data.join("images"),
            log_root: data.join("logs"),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            image_keep_days: 30,
            log_keep_days: 90,
            image_sweep_cron: "59 59 23 * * *".to_string(),
            log_sweep_cron: "59 59 01 * * *".to_string(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5_000,
            buffer_high_water_bytes: 4 * 1024 * 1024,
            buffer_cap_bytes: 32 * 1024 * 1024,
            handoff_channel_capacity: 64,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        Self {
            config_file: home_dir.join(".config").join("snrd").join("config.toml"),
            activity_log: data_dir().join("activity.jsonl"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[SNR-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("snrd")
}

impl SerialConfig {
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn image_keep(&self) -> chrono::Duration {
        keep_days(self.image_keep_days)
    }

    #[must_use]
    pub fn log_keep(&self) -> chrono::Duration {
        keep_days(self.log_keep_days)
    }
}

fn keep_days(days: u64) -> chrono::Duration {
    i64::try_from(days)
        .ok()
        .and_then(chrono::Duration::try_days)
        .unwrap_or(chrono::Duration::MAX)
}

impl ParserConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SnrError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(SnrError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // serial
        if let Some(raw) = lookup("SNR_SERIAL_PORT_NAME") {
            self.serial.port_name = raw;
        }
        set_parsed(&mut lookup, "SNR_SERIAL_BAUD_RATE", &mut self.serial.baud_rate)?;
        set_parsed(
            &mut lookup,
            "SNR_SERIAL_RECONNECT_DELAY_MS",
            &mut self.serial.reconnect_delay_ms,
        )?;

        // output
        if let Some(raw) = lookup("SNR_OUTPUT_INI_PATH") {
            self.output.ini_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SNR_OUTPUT_IMAGE_ROOT") {
            self.output.image_root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SNR_OUTPUT_LOG_ROOT") {
            self.output.log_root = PathBuf::from(raw);
        }

        // retention
        set_parsed(
            &mut lookup,
            "SNR_RETENTION_IMAGE_KEEP_DAYS",
            &mut self.retention.image_keep_days,
        )?;
        set_parsed(
            &mut lookup,
            "SNR_RETENTION_LOG_KEEP_DAYS",
            &mut self.retention.log_keep_days,
        )?;

        // parser
        set_parsed(
            &mut lookup,
            "SNR_PARSER_IDLE_TIMEOUT_MS",
            &mut self.parser.idle_timeout_ms,
        )?;
        set_parsed(
            &mut lookup,
            "SNR_PARSER_BUFFER_CAP_BYTES",
            &mut self.parser.buffer_cap_bytes,
        )?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.serial.port_name.trim().is_empty() {
            return Err(SnrError::InvalidConfig {
                details: "serial.port_name must not be empty".to_string(),
            });
        }
        if self.serial.baud_rate == 0 {
            return Err(SnrError::InvalidConfig {
                details: "serial.baud_rate must be > 0".to_string(),
            });
        }
        if self.serial.read_chunk_bytes == 0 {
            return Err(SnrError::InvalidConfig {
                details: "serial.read_chunk_bytes must be > 0".to_string(),
            });
        }

        for (name, path) in [
            ("output.ini_path", &self.output.ini_path),
            ("output.image_root", &self.output.image_root),
            ("output.log_root", &self.output.log_root),
        ] {
            if path.as_os_str().is_empty() {
                return Err(SnrError::InvalidConfig {
                    details: format!("{name} must not be empty"),
                });
            }
        }

        if self.parser.idle_timeout_ms == 0 {
            return Err(SnrError::InvalidConfig {
                details: "parser.idle_timeout_ms must be > 0".to_string(),
            });
        }
        if self.parser.handoff_channel_capacity == 0 {
            return Err(SnrError::InvalidConfig {
                details: "parser.handoff_channel_capacity must be >= 1".to_string(),
            });
        }
        if self.parser.buffer_cap_bytes < self.parser.buffer_high_water_bytes {
            return Err(SnrError::InvalidConfig {
                details: format!(
                    "parser.buffer_cap_bytes ({}) must be >= parser.buffer_high_water_bytes ({})",
                    self.parser.buffer_cap_bytes, self.parser.buffer_high_water_bytes
                ),
            });
        }

        for expression in [
            &self.retention.image_sweep_cron,
            &self.retention.log_sweep_cron,
        ] {
            parse_schedule(expression)?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw.trim().parse::<T>().map_err(|error| SnrError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })?;
    }
    Ok(())
}
