use std::path::Path;

use anyhow::bail;
use clap::Subcommand;
use relaymap_autopilot::AutopilotConfig;

use crate::settings::{self, TimingOverrides};

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommands {
    /// Print the effective configuration, environment overrides included
    Show,
    /// Write the default `[autopilot]` table
    Init {
        /// Replace the `[autopilot]` table of an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommands {
    pub fn run(self, path: &Path) -> anyhow::Result<()> {
        match self {
            ConfigCommands::Show => {
                let config = settings::resolve(path, &TimingOverrides::default())?;
                print!("{}", config.to_toml_string()?);
            }
            ConfigCommands::Init { force } => {
                write_defaults(path, force)?;
                println!("Wrote default autopilot settings to {}", path.display());
            }
        }
        Ok(())
    }
}

fn write_defaults(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to replace its [autopilot] table",
            path.display()
        );
    }
    AutopilotConfig::default().save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap_or_else(|error| panic!("tempdir failed: {error}"));
        let path = dir.path().join("relaymap.toml");

        write_defaults(&path, false).unwrap_or_else(|error| panic!("init failed: {error}"));

        let loaded =
            AutopilotConfig::load(&path).unwrap_or_else(|error| panic!("load failed: {error}"));
        assert_eq!(loaded, AutopilotConfig::default());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap_or_else(|error| panic!("tempdir failed: {error}"));
        let path = dir.path().join("relaymap.toml");
        std::fs::write(&path, "[autopilot]\ndwell = \"30s\"\n")
            .unwrap_or_else(|error| panic!("write failed: {error}"));

        assert!(write_defaults(&path, false).is_err());
        let loaded =
            AutopilotConfig::load(&path).unwrap_or_else(|error| panic!("load failed: {error}"));
        assert_eq!(loaded.dwell, std::time::Duration::from_secs(30));
    }

    #[test]
    fn forced_init_keeps_unrelated_tables() {
        let dir = tempfile::tempdir().unwrap_or_else(|error| panic!("tempdir failed: {error}"));
        let path = dir.path().join("relaymap.toml");
        std::fs::write(&path, "[globe]\ntheme = \"night\"\n\n[autopilot]\ndwell = \"30s\"\n")
            .unwrap_or_else(|error| panic!("write failed: {error}"));

        write_defaults(&path, true).unwrap_or_else(|error| panic!("init failed: {error}"));

        let text =
            std::fs::read_to_string(&path).unwrap_or_else(|error| panic!("read failed: {error}"));
        assert!(text.contains("theme = \"night\""), "{text}");
        let loaded =
            AutopilotConfig::load(&path).unwrap_or_else(|error| panic!("load failed: {error}"));
        assert_eq!(loaded, AutopilotConfig::default());
    }
}
