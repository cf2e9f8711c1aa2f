//! opennoded - Open Node Gateway
//!
//! Drives the lifecycle of the one open node attached to this gateway:
//! flashing, reset, debugger control and the console bridge.
//!
//! Usage:
//!   opennoded [OPTIONS] <COMMAND>
//!
//! The configuration file selects a board preset and overrides its fields.
//! Without `--config`, `/etc/opennode/gateway.toml` is used when present and
//! built-in defaults otherwise.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opennode_boards::{build_node, GatewayConfig};
use opennode_core::{OpenNode, StepReport};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG: &str = "/etc/opennode/gateway.toml";

#[derive(Parser)]
#[command(name = "opennoded")]
#[command(author, version, about = "Open node gateway")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OPENNODE_CONFIG")]
    config: Option<PathBuf>,

    /// Board preset, overrides the configuration file
    #[arg(short, long, env = "OPENNODE_BOARD")]
    board: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the node up, keep it running until Ctrl-C, then tear it down
    Run {
        /// Firmware flashed at setup (idle firmware by default)
        #[arg(short, long)]
        firmware: Option<PathBuf>,
    },

    /// Flash a firmware (idle firmware by default)
    Flash { firmware: Option<PathBuf> },

    /// Reset the node
    Reset,

    /// Start the debugger
    DebugStart,

    /// Stop the debugger
    DebugStop,

    /// Return the node to its idle state
    Teardown,

    /// Check the node status
    Status,

    /// Check that a firmware suits the board
    Verify { firmware: PathBuf },
}

fn load_config(path: Option<&Path>) -> Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::load_from(path)
            .with_context(|| format!("Failed to load config file: {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => GatewayConfig::load_from(Path::new(DEFAULT_CONFIG))
            .with_context(|| format!("Failed to load config file: {}", DEFAULT_CONFIG)),
        None => Ok(GatewayConfig::default()),
    }
}

/// Process exit status for an aggregate error count
fn exit_status(report: &StepReport) -> u8 {
    report.count().min(u8::MAX as usize) as u8
}

fn print_report(operation: &str, report: &StepReport) {
    if report.is_ok() {
        tracing::info!(operation, "Done");
    } else {
        for error in report.errors() {
            tracing::error!(operation, error = %error, "Step failed");
        }
    }
    println!("{}: {}", operation, report);
}

async fn run(node: &dyn OpenNode, firmware: Option<&Path>) -> Result<StepReport> {
    let mut report = node.setup(firmware).await;
    print_report("setup", &report);
    tracing::info!(phase = %node.phase(), "Node set up, waiting for Ctrl-C");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    let teardown = node.teardown().await;
    print_report("teardown", &teardown);
    report += teardown;
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "opennoded=debug,opennode_boards=debug,opennode_process=debug,opennode_firmware=debug"
    } else {
        "opennoded=info,opennode_boards=info,opennode_process=info,opennode_firmware=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer())
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(board) = cli.board {
        config.node.board = board;
    }
    let board = config.board().context("Invalid node configuration")?;

    tracing::info!(board = %board.board_type, tty = %board.tty.display(), "Starting opennoded");
    let node = build_node(board, config.timeouts.clone(), &config.tools);

    let report = match &cli.command {
        Commands::Run { firmware } => run(node.as_ref(), firmware.as_deref()).await?,
        Commands::Flash { firmware } => {
            let report = node.flash(firmware.as_deref()).await;
            print_report("flash", &report);
            report
        }
        Commands::Reset => {
            let report = node.reset().await;
            print_report("reset", &report);
            report
        }
        Commands::DebugStart => {
            let report = node.debug_start().await;
            print_report("debug-start", &report);
            report
        }
        Commands::DebugStop => {
            let report = node.debug_stop().await;
            print_report("debug-stop", &report);
            report
        }
        Commands::Teardown => {
            let report = node.teardown().await;
            print_report("teardown", &report);
            report
        }
        Commands::Status => {
            let report = node.status().await;
            print_report("status", &report);
            report
        }
        Commands::Verify { firmware } => {
            let report = node.verify_firmware(firmware).await;
            print_report("verify", &report);
            report
        }
    };

    Ok(ExitCode::from(exit_status(&report)))
}
