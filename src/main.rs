// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! sonda: diagnostic capture orchestrator.
//!
//! Captures the traffic a collection pipeline should be receiving and the
//! log of the managed service that consumes it, wrapped around an observed
//! error, then packages both into a single archive for a support report.

#![deny(unsafe_code)]

mod archive;
mod preflight;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sonda_core::{Orchestrator, Outcome, RunConfig, RunId};

#[derive(Debug, Parser)]
#[command(
    name = "sonda",
    version,
    about = "Capture network traffic and service logs around an observed failure"
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface to capture on (overrides the config file).
    #[arg(short, long)]
    interface: Option<String>,

    /// Managed service control command (overrides the config file).
    #[arg(short, long)]
    service: Option<String>,

    /// Directory to collect artifacts in (defaults to a temp dir).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Skip the privilege and tool preflight checks.
    #[arg(long)]
    skip_preflight: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => {
                let interface = self
                    .interface
                    .clone()
                    .context("--interface is required when no config file is given")?;
                let service = self
                    .service
                    .clone()
                    .context("--service is required when no config file is given")?;
                RunConfig::new(interface, service)
            }
        };
        if let Some(interface) = self.interface {
            config.interface = interface;
        }
        if let Some(service) = self.service {
            config.service.program = service;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = Some(output_dir);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let skip_preflight = cli.skip_preflight;
    let config = cli.into_config()?;

    if !skip_preflight {
        preflight::check(&config)?;
    }

    let run_id = RunId::new();
    tracing::info!(
        %run_id,
        interface = %config.interface,
        port = config.port,
        "starting diagnostic run"
    );
    println!(
        "Watching {} for UDP traffic on port {}; the run will wait up to {} for data.",
        config.interface,
        config.port,
        humantime::format_duration(config.detect_window)
    );

    // Artifacts are collected under <scratch>/<archive_name>/ so the
    // tarball unpacks into a single directory.
    let (scratch, _temp_guard) = match &config.output_dir {
        Some(dir) => (dir.clone(), None),
        None => {
            let tmp = tempfile::tempdir().context("creating scratch directory")?;
            (tmp.path().to_path_buf(), Some(tmp))
        }
    };
    let work_dir = scratch.join(&config.archive_name);
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("creating {}", work_dir.display()))?;

    let mut orchestrator = Orchestrator::new(&config, &work_dir);
    let outcome = {
        let run = orchestrator.run();
        tokio::pin!(run);
        tokio::select! {
            outcome = &mut run => Some(outcome),
            _ = tokio::signal::ctrl_c() => None,
        }
    };

    let Some(outcome) = outcome else {
        // The stop protocol still applies on interrupt: the service stop
        // waits for the attach handshake before signaling its group.
        tracing::warn!("interrupted; stopping monitors");
        orchestrator.shutdown().await;
        return Ok(ExitCode::from(1));
    };

    report(&outcome);

    if outcome == Outcome::ErrorCaptured {
        let dest = std::env::current_dir().context("resolving current directory")?;
        let archive =
            archive::package(&scratch, &config.archive_name, &run_id, &dest).await?;
        println!("Diagnostics written to {}", archive.display());
        println!("Please attach this archive to your support request.");
    }

    Ok(ExitCode::from(outcome.exit_code()))
}

fn report(outcome: &Outcome) {
    match outcome {
        Outcome::NoSignalDetected => {
            println!("No matching UDP traffic was seen on the configured interface.");
            println!("The run cannot continue without traffic to capture.");
        }
        Outcome::CaptureFailure => {
            println!("The packet capture tool failed; see the log output above.");
        }
        Outcome::NoErrorObserved => {
            println!("The service ran out the detection window without logging an error.");
            println!("If the problem persists, re-run with a longer detect_window.");
        }
        Outcome::ServiceMonitorFailure => {
            println!("The service log monitor failed; see the log output above.");
        }
        Outcome::ErrorCaptured => {
            println!("An error was observed in the service log and recorded.");
        }
    }
}
