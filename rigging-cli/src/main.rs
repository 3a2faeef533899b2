//! Rigging: daemon lifecycle and socket interception harness.
//!
//! # Usage
//!
//! ```text
//! rigging select --manifest <yaml> [--tier N]... [--tier-minimum N] [--tier-maximum N]
//! rigging control start|stop|restart [daemon] [--debug]
//! rigging status [--daemon D] [--down] [--extra-socket PATH]...
//! rigging intercept --plan <yaml> [--count N] [--timeout SECS]
//! rigging send --local PATH | --network HOST:PORT [--datagram] [--framing le] <payload>
//! rigging options set KEY=VALUE... [--file PATH]
//! rigging logs [--lines N]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::ControlArgs, intercept::InterceptArgs, logs::LogsArgs, options::OptionsCommand,
    select::SelectArgs, send::SendArgs, status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "rigging",
    version,
    about = "Supervise product daemons and intercept their sockets for integration tests",
    long_about = None,
)]
struct Cli {
    /// Harness configuration file (default: ~/.rigging/harness.yaml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply tier / platform / host-type selection to a test manifest.
    Select(SelectArgs),

    /// Start, stop or restart product daemons.
    Control(ControlArgs),

    /// Wait until daemons are up (or down).
    Status(StatusArgs),

    /// Run a setup plan and print intercepted traffic until done.
    Intercept(InterceptArgs),

    /// Send one unit to a product socket.
    Send(SendArgs),

    /// Edit the local internal options file.
    Options {
        #[command(subcommand)]
        command: OptionsCommand,
    },

    /// Print the tail of monitored product logs.
    Logs(LogsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Select(args) => args.run(config),
        Commands::Control(args) => args.run(config),
        Commands::Status(args) => args.run(config),
        Commands::Intercept(args) => args.run(config),
        Commands::Send(args) => args.run(),
        Commands::Options { command } => commands::options::run(command, config),
        Commands::Logs(args) => args.run(config),
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
