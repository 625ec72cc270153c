//! Nodecast CLI - command-line interface
//!
//! This binary provides a command-line interface to the nodecast library:
//! a `daemon` subcommand running the per-node daemon and a `broadcast`
//! subcommand issuing one RPC to a set of nodes.

use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod error;

#[derive(Parser)]
#[command(name = "nodecast")]
#[command(version = nodecast::VERSION)]
#[command(about = "Parallel RPC broadcast engine for cluster control planes", long_about = None)]
struct Cli {
    /// Verbose mode. Multiple -v's increase verbosity.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files
    #[arg(long, default_value = "logs", global = true)]
    log_dir: String,

    /// Log file name
    #[arg(long, default_value = "nodecast.log", global = true)]
    log_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the per-node daemon
    Daemon(commands::daemon::DaemonArgs),

    /// Broadcast one RPC to a set of nodes
    Broadcast(commands::broadcast::BroadcastArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // -v flags set the default filter; an explicit RUST_LOG wins
    if std::env::var("RUST_LOG").is_err() {
        let level = match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    let _guard = match nodecast::logging::init_logging(&cli.log_dir, &cli.log_file) {
        Ok(guard) => Some(guard),
        Err(error) => {
            eprintln!("warning: failed to initialize log file: {}", error);
            None
        }
    };

    let result = match cli.command {
        Command::Daemon(args) => commands::daemon::run(args).await,
        Command::Broadcast(args) => commands::broadcast::run(args).await,
    };

    if let Err(error) = result {
        eprintln!("error: {}", error);
        process::exit(1);
    }
}
