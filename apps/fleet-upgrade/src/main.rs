use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::process::ExitCode;

use fleet_upgrade::cli::Cli;
use fleet_upgrade::config::UpgradeConfig;
use fleet_upgrade::paths::{backup_suffix, default_rollback_path, expand_home};
use fleet_upgrade::remote::{SshConnector, SshOptions};
use fleet_upgrade::upgrade::{Orchestrator, RunOptions};
use fleet_upgrade::{logging, signals};

const TITLE: &str = "Fleet software upgrade";
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mode = cli.mode;
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            logging::report_fatal(mode, &err);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(cli: &Cli) {
    let debug_log = cli.debug.then(|| expand_home(&cli.debug_log));
    if let Err(err) = logging::init(debug_log.as_deref()) {
        eprintln!("Error: {err:#}");
        if debug_log.is_some() {
            logging::init(None).ok();
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    println!("{TITLE}");
    init_logging(&cli);

    let json_path = expand_home(&cli.json);
    let contents = fs::read(&json_path).with_context(|| {
        format!(
            "Error reading from JSON configuration file: {}",
            json_path.display()
        )
    })?;
    let config = UpgradeConfig::from_slice(&contents)
        .with_context(|| format!("Unable to parse {}", json_path.display()))?;

    let suffix = backup_suffix(chrono::Local::now());
    let rollback_path = cli
        .rollback_nodes
        .clone()
        .unwrap_or_else(|| default_rollback_path(&suffix));
    let options = RunOptions {
        mode: cli.mode,
        dry_run: cli.dry_run,
        verification: cli.verification(),
        failed_nodes_path: expand_home(&cli.failed_nodes),
        rollback_path: expand_home(&rollback_path),
        rollback_suffix: suffix,
    };
    let connector = SshConnector::new(SshOptions::from_config(&config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let cancel = signals::install().context("Failed to install signal handlers")?;
        let orchestrator = Orchestrator::new(config, connector, options, cancel);
        let report = tokio::task::spawn_blocking(move || orchestrator.run())
            .await
            .context("Upgrade task panicked")??;
        Ok::<u8, anyhow::Error>(report.exit_code())
    })
}
