//! Effective tour configuration: file, then environment, then flags.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use relaymap_autopilot::AutopilotConfig;

pub const DWELL_ENV: &str = "RELAYMAP_DWELL";
pub const DATA_TIMEOUT_ENV: &str = "RELAYMAP_DATA_TIMEOUT";
pub const ADVANCE_DELAY_ENV: &str = "RELAYMAP_ADVANCE_DELAY";

/// Timing values given on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingOverrides {
    pub dwell: Option<Duration>,
    pub data_timeout: Option<Duration>,
    pub advance_delay: Option<Duration>,
}

/// Load `path`, layer the process environment and `overrides` on top, and
/// validate the result.
pub fn resolve(path: &Path, overrides: &TimingOverrides) -> anyhow::Result<AutopilotConfig> {
    resolve_with(path, overrides, |key| std::env::var(key).ok())
}

pub fn resolve_with(
    path: &Path,
    overrides: &TimingOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<AutopilotConfig> {
    let mut config = AutopilotConfig::load_unvalidated(path)?;
    apply_env_overrides(&mut config, env)?;
    apply_cli_overrides(&mut config, overrides);
    config
        .validate()
        .with_context(|| format!("invalid autopilot settings (config file {})", path.display()))?;
    Ok(config)
}

fn apply_env_overrides(
    config: &mut AutopilotConfig,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(value) = env_duration(&env, DWELL_ENV)? {
        config.dwell = value;
    }
    if let Some(value) = env_duration(&env, DATA_TIMEOUT_ENV)? {
        config.data_timeout = value;
    }
    if let Some(value) = env_duration(&env, ADVANCE_DELAY_ENV)? {
        config.advance_delay = value;
    }
    Ok(())
}

fn env_duration(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<Duration>> {
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    humantime::parse_duration(raw)
        .map(Some)
        .with_context(|| format!("{key}={raw} is not a duration"))
}

fn apply_cli_overrides(config: &mut AutopilotConfig, overrides: &TimingOverrides) {
    if let Some(dwell) = overrides.dwell {
        config.dwell = dwell;
    }
    if let Some(timeout) = overrides.data_timeout {
        config.data_timeout = timeout;
    }
    if let Some(delay) = overrides.advance_delay {
        config.advance_delay = delay;
    }
}
