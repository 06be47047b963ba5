use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timing knobs for the tour.
///
/// Durations are written as human-readable strings (`"15s"`, `"100ms"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// How long each relay's feed is displayed.
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    /// How long to wait for a panel's data before moving on without displaying.
    #[serde(with = "humantime_serde")]
    pub data_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub data_poll_interval: Duration,
    /// Interval between progress updates while displaying.
    #[serde(with = "humantime_serde")]
    pub progress_tick: Duration,
    /// Pause between closing one relay and rotating to the next.
    #[serde(with = "humantime_serde")]
    pub advance_delay: Duration,
    /// How long a cancelled visit may take to unwind before it is aborted.
    #[serde(with = "humantime_serde")]
    pub abort_grace: Duration,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            dwell: Duration::from_secs(15),
            data_timeout: Duration::from_secs(5),
            data_poll_interval: Duration::from_millis(100),
            progress_tick: Duration::from_millis(50),
            advance_delay: Duration::from_secs(1),
            abort_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("dwell must be greater than zero")]
    ZeroDwell,
    #[error("data_timeout must be greater than zero")]
    ZeroDataTimeout,
    #[error("data_poll_interval must be greater than zero")]
    ZeroPollInterval,
    #[error("data_poll_interval ({poll:?}) must be shorter than data_timeout ({timeout:?})")]
    PollIntervalExceedsTimeout { poll: Duration, timeout: Duration },
    #[error("progress_tick must be greater than zero")]
    ZeroProgressTick,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read autopilot config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse autopilot config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write autopilot config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize autopilot config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("autopilot config {} must contain a TOML table at the top level", path.display())]
    NotATable { path: PathBuf },
    #[error(transparent)]
    Invalid(#[from] ConfigValidationError),
}

const TABLE: &str = "autopilot";

/// File layout: the autopilot settings live under an `[autopilot]` table so
/// the same file can carry other sections.
#[derive(Debug, Default, Deserialize)]
struct PersistedConfig {
    #[serde(default)]
    autopilot: AutopilotConfig,
}

impl AutopilotConfig {
    /// Read `path` if it exists, falling back to defaults, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_unvalidated(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let persisted: PersistedConfig = toml::from_str(text)?;
        Ok(persisted.autopilot)
    }

    /// Write the `[autopilot]` table to `path`, keeping any other tables
    /// already in the file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut root = load_root_table(path)?;
        root.insert(TABLE.to_string(), toml::Value::try_from(self)?);
        let text = toml::to_string_pretty(&root)?;
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Render as a standalone `[autopilot]` document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let mut root = toml::value::Table::new();
        root.insert(TABLE.to_string(), toml::Value::try_from(self)?);
        Ok(toml::to_string_pretty(&root)?)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.dwell.is_zero() {
            return Err(ConfigValidationError::ZeroDwell);
        }
        if self.data_timeout.is_zero() {
            return Err(ConfigValidationError::ZeroDataTimeout);
        }
        if self.data_poll_interval.is_zero() {
            return Err(ConfigValidationError::ZeroPollInterval);
        }
        if self.data_poll_interval >= self.data_timeout {
            return Err(ConfigValidationError::PollIntervalExceedsTimeout {
                poll: self.data_poll_interval,
                timeout: self.data_timeout,
            });
        }
        if self.progress_tick.is_zero() {
            return Err(ConfigValidationError::ZeroProgressTick);
        }
        Ok(())
    }
}

fn load_root_table(path: &Path) -> Result<toml::value::Table, ConfigError> {
    if !path.exists() {
        return Ok(toml::value::Table::new());
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: toml::Value = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        toml::Value::Table(table) => Ok(table),
        _ => Err(ConfigError::NotATable {
            path: path.to_path_buf(),
        }),
    }
}
