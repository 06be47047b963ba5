//! `relaymap tour`: run the autopilot headless against the simulated globe.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args};
use relaymap_autopilot::{
    AutopilotConfig, AutopilotContext, AutopilotState, VisitPhase, spawn_autopilot,
};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::relays;
use crate::settings::{self, TimingOverrides};
use crate::simulate::{SimulatedGlobe, SimulationProfile};

const INPUT_HELP: &str = "commands: p = pause/resume, s = skip, q = quit";

#[derive(Args, Debug)]
pub struct TourArgs {
    /// TOML file with `relays = ["wss://...", ...]`
    #[arg(long)]
    pub relays: Option<PathBuf>,
    /// Relay to visit; may be repeated
    #[arg(long, action = ArgAction::Append)]
    pub relay: Vec<String>,
    /// How long each relay's feed stays on screen (e.g. 15s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub dwell: Option<Duration>,
    /// How long to wait for a panel's data before moving on
    #[arg(long, value_parser = humantime::parse_duration)]
    pub data_timeout: Option<Duration>,
    /// Pause between one relay and the next
    #[arg(long, value_parser = humantime::parse_duration)]
    pub advance_delay: Option<Duration>,
    /// Stop after this many passes over the relay list
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub cycles: Option<u32>,
    /// Seed for the simulated failures and latencies
    #[arg(long)]
    pub seed: Option<u64>,
    /// Probability that a camera flight fails
    #[arg(long, default_value_t = 0.0, value_parser = parse_rate)]
    pub fail_rate: f64,
    /// Probability that a relay's data never load
    #[arg(long, default_value_t = 0.0, value_parser = parse_rate)]
    pub stall_rate: f64,
    /// Simulated camera flight time
    #[arg(long, default_value = "800ms", value_parser = humantime::parse_duration)]
    pub flight_time: Duration,
    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl TourArgs {
    fn timing_overrides(&self) -> TimingOverrides {
        TimingOverrides {
            dwell: self.dwell,
            data_timeout: self.data_timeout,
            advance_delay: self.advance_delay,
        }
    }

    fn profile(&self) -> SimulationProfile {
        SimulationProfile {
            flight_time: self.flight_time,
            fail_rate: self.fail_rate,
            stall_rate: self.stall_rate,
            ..SimulationProfile::default()
        }
    }
}

fn parse_rate(raw: &str) -> Result<f64, String> {
    let rate: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("`{raw}` must be between 0 and 1"));
    }
    Ok(rate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TourInput {
    TogglePause,
    Skip,
    Quit,
}

impl TourInput {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" | "resume" => Some(TourInput::TogglePause),
            "s" | "skip" | "n" | "next" => Some(TourInput::Skip),
            "q" | "quit" | "stop" => Some(TourInput::Quit),
            _ => None,
        }
    }
}

pub async fn run(args: TourArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = settings::resolve(config_path, &args.timing_overrides())?;
    let relays = relays::collect(args.relays.as_deref(), &args.relay)?;
    let total = relays.len();
    if total == 0 {
        warn!("Relay list is empty");
    }

    let globe = Arc::new(SimulatedGlobe::new(args.profile(), args.seed));
    let mut closed = globe.closed_panels();
    let close_limit = args.cycles.map(|cycles| u64::from(cycles) * total as u64);

    let context = AutopilotContext::new();
    context.register_camera_reset(|| info!("Camera back at the overview"));
    let runner = spawn_autopilot(context.clone(), globe, Arc::new(relays), config.clone());

    print_summary(&config, total, args.cycles);
    let mut input = spawn_stdin_reader();
    let mut input_open = true;
    let mut states = context.subscribe();
    let mut printer = StatusPrinter::default();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    context.start();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted; stopping tour");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if let Some(line) = printer.update(&state) {
                    println!("{line}");
                }
                if !state.mode_on {
                    break;
                }
            }
            line = input.recv(), if input_open => match line {
                Some(line) => match TourInput::parse(&line) {
                    Some(TourInput::TogglePause) => context.toggle_pause(),
                    Some(TourInput::Skip) => {
                        if !context.skip() {
                            debug!("Skip ignored");
                        }
                    }
                    Some(TourInput::Quit) => break,
                    None if line.trim().is_empty() => {}
                    None => eprintln!("{INPUT_HELP}"),
                },
                None => input_open = false,
            },
            changed = closed.changed(), if close_limit.is_some() => {
                if changed.is_err() {
                    break;
                }
                let closes = *closed.borrow_and_update();
                if close_limit.is_some_and(|limit| closes >= limit) {
                    info!(visits = closes, "Requested cycles complete");
                    break;
                }
            }
        }
    }

    context.stop();
    runner.shutdown().await;
    println!("Tour finished.");
    Ok(())
}

/// Stdin is read on a plain thread so a pending read never holds up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(error) => {
                tracing::error!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_summary(config: &AutopilotConfig, relays: usize, cycles: Option<u32>) {
    println!("Relay tour");
    println!("  Relays:        {relays}");
    println!("  Dwell:         {}", humantime::format_duration(config.dwell));
    println!(
        "  Data timeout:  {}",
        humantime::format_duration(config.data_timeout)
    );
    println!(
        "  Advance delay: {}",
        humantime::format_duration(config.advance_delay)
    );
    match cycles {
        Some(cycles) => println!("  Cycles:        {cycles}"),
        None => println!("  Cycles:        until stopped"),
    }
    println!("  {INPUT_HELP}");
    println!();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusKey {
    mode_on: bool,
    paused: bool,
    index: usize,
    total: usize,
    phase: VisitPhase,
}

impl StatusKey {
    fn of(state: &AutopilotState) -> Self {
        Self {
            mode_on: state.mode_on,
            paused: state.paused,
            index: state.current_index,
            total: state.total,
            phase: state.phase,
        }
    }
}

/// Prints a line when anything but the progress percentage changes.
#[derive(Debug, Default)]
struct StatusPrinter {
    last: Option<StatusKey>,
}

impl StatusPrinter {
    fn update(&mut self, state: &AutopilotState) -> Option<String> {
        let key = StatusKey::of(state);
        if self.last == Some(key) {
            return None;
        }
        self.last = Some(key);
        Some(format_status(state))
    }
}

fn format_status(state: &AutopilotState) -> String {
    if !state.mode_on {
        return "autopilot off".to_string();
    }

    let position = if state.total == 0 {
        "[-/-]".to_string()
    } else {
        format!("[{}/{}]", state.current_index + 1, state.total)
    };
    let mut line = format!("{position} {}", state.phase);
    if state.phase == VisitPhase::Displaying {
        line.push_str(&format!(" {:>3.0}%", state.progress));
    }
    if state.paused {
        line.push_str(" (paused)");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("p", Some(TourInput::TogglePause) ; "p pauses")]
    #[test_case(" Resume ", Some(TourInput::TogglePause) ; "resume word")]
    #[test_case("s", Some(TourInput::Skip) ; "s skips")]
    #[test_case("next", Some(TourInput::Skip) ; "next skips")]
    #[test_case("Q", Some(TourInput::Quit) ; "q quits")]
    #[test_case("x", None ; "unknown")]
    #[test_case("", None ; "empty")]
    fn parses_input(line: &str, expected: Option<TourInput>) {
        assert_eq!(TourInput::parse(line), expected);
    }

    #[test_case("0", Ok(0.0) ; "zero")]
    #[test_case("0.3", Ok(0.3) ; "fraction")]
    #[test_case("1", Ok(1.0) ; "one")]
    fn accepts_rates(raw: &str, expected: Result<f64, String>) {
        assert_eq!(parse_rate(raw), expected);
    }

    #[test_case("1.01" ; "above one")]
    #[test_case("-0.5" ; "negative")]
    #[test_case("often" ; "not a number")]
    fn rejects_rates(raw: &str) {
        assert!(parse_rate(raw).is_err());
    }

    fn displaying(progress: f64) -> AutopilotState {
        let mut state = AutopilotState::default();
        state.mode_on = true;
        state.active = true;
        state.current_index = 1;
        state.total = 4;
        state.progress = progress;
        state.phase = VisitPhase::Displaying;
        state
    }

    #[test]
    fn status_line_shows_position_phase_and_progress() {
        assert_eq!(format_status(&displaying(40.0)), "[2/4] displaying  40%");

        let mut paused = displaying(40.0);
        paused.paused = true;
        paused.active = false;
        assert_eq!(format_status(&paused), "[2/4] displaying  40% (paused)");
        assert_eq!(format_status(&AutopilotState::default()), "autopilot off");
    }

    #[test]
    fn printer_ignores_progress_only_changes() {
        let mut printer = StatusPrinter::default();
        assert!(printer.update(&displaying(10.0)).is_some());
        assert!(printer.update(&displaying(55.0)).is_none());

        let mut closing = displaying(100.0);
        closing.phase = VisitPhase::Closing;
        assert_eq!(printer.update(&closing).as_deref(), Some("[2/4] closing"));
    }
}
