// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Relaunch - entry point
//!
//! `relaunch run` re-executes itself into a supervised worker. The worker
//! cleans up stale instances left by earlier generations and then keeps the
//! configured application up to date until it hands over to a new instance.

mod config;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::AppConfig;
use relaunch_daemon::{RunOutcome, Supervisor};
use relaunch_upgrader::backup::restore_backup;
use relaunch_upgrader::reaper;
use relaunch_upgrader::{HttpFetcher, PayloadLayout, ProcessLauncher, UpgradeConfig, Upgrader};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};

const DEFAULT_FILTER: &str = "warn,relaunch=info,relaunch_daemon=info,relaunch_upgrader=info";

/// Worker exit status after starting the upgraded instance. The supervisor
/// sees a healthy exit and restarts; stale generations are reaped on startup.
const HANDOVER_EXIT_CODE: u8 = 1;

#[derive(Parser, Debug)]
#[command(name = "relaunch", version, about = "Keeps an application running and up to date")]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "relaunch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervise a worker that keeps the application up to date
    Run,
    /// Run a single update cycle and print its outcome
    Check,
    /// Terminate stale instances of the application
    Reap,
    /// Put a backup taken before an upgrade back in place
    Restore {
        /// Backup file named in the install failure report
        backup: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let config_path = std::path::absolute(&cli.config)
        .with_context(|| format!("Invalid config path {}", cli.config.display()))?;
    let config = AppConfig::load(&config_path)?;

    match cli.command {
        Command::Run => run(&config_path, config),
        Command::Check => check(&config_path, config.upgrade),
        Command::Reap => reap(&config.upgrade),
        Command::Restore { backup } => restore(&config.upgrade, &backup),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

/// New instances always get an absolute config path, they start inside `app_path`
fn launcher_for(config_path: &Path) -> ProcessLauncher {
    ProcessLauncher::new(vec![
        OsString::from("run"),
        OsString::from("--config"),
        config_path.as_os_str().to_owned(),
    ])
}

fn run(config_path: &Path, config: AppConfig) -> Result<ExitCode> {
    let mut supervisor = Supervisor::for_current_process(config.supervisor.policy());
    if let RunOutcome::Terminated(termination) = supervisor.run() {
        info!("Supervisor {} finished: {termination:?}", std::process::id());
        return Ok(exit_code(termination.exit_code()));
    }

    build_runtime()?.block_on(work(config_path, config.upgrade))
}

async fn work(config_path: &Path, upgrade: UpgradeConfig) -> Result<ExitCode> {
    info!("Worker {} started", std::process::id());

    if upgrade.app_name.is_empty() {
        warn!("app_name is not configured, skipping stale process cleanup");
    } else {
        match reaper::reap_with_system(&upgrade.app_name, upgrade.reap_grace()) {
            Ok(pids) if !pids.is_empty() => info!("Terminated stale processes: {pids:?}"),
            Ok(_) => {}
            Err(e) => warn!("Stale process cleanup failed: {e}"),
        }
    }

    if !upgrade.enabled {
        info!("Automatic upgrades are disabled");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
        return Ok(ExitCode::SUCCESS);
    }

    let upgrader = Upgrader::new(upgrade, HttpFetcher::new()?, launcher_for(config_path));
    tokio::select! {
        outcome = upgrader.run() => {
            info!("Handing over to the upgraded instance: {outcome:?}");
            Ok(ExitCode::from(HANDOVER_EXIT_CODE))
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn check(config_path: &Path, upgrade: UpgradeConfig) -> Result<ExitCode> {
    let launcher = launcher_for(config_path);
    let outcome = build_runtime()?.block_on(async {
        let upgrader = Upgrader::new(upgrade, HttpFetcher::new()?, launcher);
        anyhow::Ok(upgrader.check_and_upgrade().await)
    })?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.class().is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn reap(upgrade: &UpgradeConfig) -> Result<ExitCode> {
    let pids = reaper::reap_with_system(&upgrade.app_name, upgrade.reap_grace())?;
    if pids.is_empty() {
        println!("No stale {} processes", upgrade.app_name);
    } else {
        println!("Terminated {} processes: {pids:?}", upgrade.app_name);
    }
    Ok(ExitCode::SUCCESS)
}

fn restore(upgrade: &UpgradeConfig, backup: &Path) -> Result<ExitCode> {
    if upgrade.app_name.is_empty() || upgrade.app_path.as_os_str().is_empty() {
        bail!("app_name and app_path must be configured to restore a backup");
    }

    let layout = PayloadLayout::new(upgrade, chrono::Local::now());
    restore_backup(backup, &layout)
        .with_context(|| format!("Failed to restore {}", backup.display()))?;

    println!(
        "Restored {} from {}",
        layout.app_path.display(),
        backup.display()
    );
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_restore() {
        let cli = Cli::parse_from(["relaunch", "restore", "/tmp/svc.bak", "--config", "x.toml"]);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        match cli.command {
            Command::Restore { backup } => assert_eq!(backup, PathBuf::from("/tmp/svc.bak")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::parse_from(["relaunch", "run"]);
        assert_eq!(cli.config, PathBuf::from("relaunch.toml"));
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn test_launcher_uses_absolute_config() {
        let launcher = launcher_for(Path::new("/etc/relaunch.toml"));
        let debug = format!("{launcher:?}");
        assert!(debug.contains("/etc/relaunch.toml"));
    }
}
