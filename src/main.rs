//! Stackpilot entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use log::{error, info};

mod cluster;
mod config;
mod confirm;
mod deployer;
mod dispatch;
mod error;
mod images;
mod lease;
mod manifest;
mod objects;
mod runtime;
mod status;
mod teardown;
mod types;
mod wait;

use config::Config;
use confirm::TerminalConfirm;
use dispatch::{Command, Orchestrator};
use runtime::{DockerCli, DockerRuntime};

#[derive(Debug, Parser)]
#[command(
    name = "stackpilot",
    about = "Deploy, inspect and tear down the insurance stack on Docker Swarm",
    version
)]
struct Cli {
    /// Configuration file (default: stackpilot.toml)
    #[arg(long, global = true, env = "STACKPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Print status as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Defaults to `deploy`
    #[command(subcommand)]
    command: Option<Command>,
}

fn parse_args() -> Result<Cli, ExitCode> {
    Cli::try_parse().map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = e.print();
            ExitCode::SUCCESS
        }
        _ => {
            // Unknown subcommands print usage and exit 1, not clap's 2.
            let _ = e.print();
            ExitCode::FAILURE
        }
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(code) => return code,
    };
    let command = cli.command.unwrap_or(Command::Deploy);

    // Load configuration
    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Starting stackpilot with config: {:?}", cfg);

    let docker = DockerCli::new(cfg.docker_binary.clone());
    let cluster = match DockerRuntime::connect(docker.clone()) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = Orchestrator {
        config: &cfg,
        cluster: &cluster,
        images: &docker,
        confirm: &TerminalConfirm,
        json: cli.json,
    };

    let mut stdout = std::io::stdout();
    match orchestrator.run(command, &mut stdout).await {
        Ok(summary) if summary.succeeded() => {
            info!("{:?} finished", command);
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            for failure in &summary.deferred {
                error!("{}", failure);
            }
            error!("{:?} finished with {} failure(s)", command, summary.deferred.len());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:?} failed: {:#}", command, anyhow::Error::from(e));
            ExitCode::FAILURE
        }
    }
}
