//! Pendant CLI - medical alert button daemon.
//!
//! This is the main binary entry point. See the `pendant` library for the
//! core functionality.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pendant::config::Config;
use pendant::connectivity::{ConnectivityChecker, IwgetidWifi, SystemPing};
use pendant::controller::{ControlEvent, Controller, LoopTimings};
use pendant::gpio;
use pendant::monitor::SwitchMonitor;
use pendant::signaler::{Pattern, Signaler};
use pendant::transmitter::{AlertOutcome, AlertTransmit, AlertTransmitter};

// CLI
#[derive(Parser)]
#[command(name = "pendant")]
#[command(version)]
#[command(about = "Medical alert button daemon for Raspberry Pi-class boards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon: poll connectivity, watch the switch, signal via LED
    Run,
    /// Run a single connectivity check; exits non-zero when unreachable
    Check,
    /// Send one test alert and print the outcome
    SendTest,
    /// Print the effective configuration as JSON
    Config,
}

/// Set up logging to stderr, or to `PENDANT_LOG_FILE` when set.
fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("PENDANT_LOG_FILE") {
        match std::fs::File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Could not open log file {path}: {e}"),
        }
    }

    builder.init();
}

/// Translate SIGINT/SIGTERM into a shutdown event so a sleeping control
/// loop wakes immediately.
fn spawn_signal_watcher(events: SyncSender<ControlEvent>) -> Result<()> {
    use signal_hook::consts::signal::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to install signal handlers")?;

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            log::info!("Received signal {signal}; shutting down");
            let _ = events.try_send(ControlEvent::Shutdown);
        }
    });

    Ok(())
}

fn build_checker(config: &Config) -> ConnectivityChecker {
    ConnectivityChecker::new(
        Box::new(IwgetidWifi),
        Box::new(SystemPing::new(Duration::from_secs(config.ping_timeout))),
        config.push_host.clone(),
    )
}

fn run_daemon() -> Result<()> {
    let config = Config::load()?;
    if !config.has_server_key() {
        log::warn!("No push server key configured; alert transmissions will be rejected");
    }

    let (led, switch) = match gpio::init(config.led_pin, config.switch_pin) {
        Ok(pins) => pins,
        Err(e) => {
            log::error!("GPIO init failed: {e:#}");
            return Err(e);
        }
    };

    let signaler = Arc::new(Signaler::new(Box::new(led)));
    let monitor = SwitchMonitor::new(
        Box::new(switch),
        Duration::from_millis(config.debounce_ms),
    );
    let checker = build_checker(&config);
    let transmitter =
        AlertTransmitter::new(&config.push_host, &config.server_key, &config.topic)?;
    let breathing = Pattern::breathing(
        config.breathing_step,
        Duration::from_millis(config.breathing_step_delay_ms),
    );

    let mut controller = Controller::new(
        signaler,
        monitor,
        checker,
        Box::new(transmitter),
        LoopTimings::from(&config),
        breathing,
    );

    spawn_signal_watcher(controller.event_sender())?;
    controller.run();
    Ok(())
}

fn run_check() -> Result<()> {
    let config = Config::load()?;
    if build_checker(&config).check() {
        println!("reachable");
        Ok(())
    } else {
        println!("unreachable");
        std::process::exit(1);
    }
}

fn run_send_test() -> Result<()> {
    let config = Config::load()?;
    let transmitter =
        AlertTransmitter::new(&config.push_host, &config.server_key, &config.topic)?;
    match transmitter.send_alert() {
        AlertOutcome::Delivered => {
            println!("delivered");
            Ok(())
        }
        AlertOutcome::Rejected(status) => {
            println!("rejected: status {status}");
            std::process::exit(1);
        }
        AlertOutcome::TransportError => {
            println!("transport error");
            std::process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run_daemon(),
        Commands::Check => run_check(),
        Commands::SendTest => run_send_test(),
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
