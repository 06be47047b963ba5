use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod logging;
mod relays;
mod settings;
mod simulate;

use commands::config::ConfigCommands;
use commands::tour::TourArgs;

#[derive(Parser)]
#[command(name = "relaymap", version, about = "Relay globe autopilot")]
struct Cli {
    /// Configuration file; the `[autopilot]` table holds the tour timing
    #[arg(long, global = true, env = "RELAYMAP_CONFIG", default_value = "relaymap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a headless tour against the simulated globe
    Tour(TourArgs),
    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Tour(args) => {
            let _log_guard = logging::init(args.log_file.as_deref())?;
            commands::tour::run(args, &cli.config).await
        }
        Commands::Config(command) => {
            let _log_guard = logging::init(None)?;
            command.run(&cli.config)
        }
    }
}
