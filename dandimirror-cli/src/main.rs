//! dandimirror: keep local versioned mirrors of DANDI archive collections.
//!
//! # Usage
//!
//! ```text
//! dandimirror sync [IDS...] [--target DIR] [--assetstore DIR] [--instance NAME]
//!                  [--version V] [-j N] [--collection-jobs N] [-i] [--json]
//! dandimirror diff <ID> [--target DIR] [--instance NAME] [--version V]
//! dandimirror status [--target DIR] [--json]
//! dandimirror instances
//! ```

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{diff::DiffArgs, instances::InstancesArgs, status::StatusArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dandimirror",
    version,
    about = "Mirror DANDI archive collections into local versioned datasets",
    long_about = None,
)]
struct Cli {
    /// Emit log events as JSON lines on stderr.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring mirrors up to date with the archive.
    Sync(SyncArgs),

    /// Show what a sync of one collection would change, without writing.
    Diff(DiffArgs),

    /// Summarize the mirrors under the target directory.
    Status(StatusArgs),

    /// List the known archive instances.
    Instances(InstancesArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let outcome = match cli.command {
        Commands::Sync(args) => args.run().await,
        Commands::Diff(args) => args.run().await,
        Commands::Status(args) => args.run(),
        Commands::Instances(args) => args.run(),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
