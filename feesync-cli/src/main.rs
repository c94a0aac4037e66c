//! Feesync CLI - mirror Alma patron fees into a local store

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{fees, logs, status, sync, user, SourceArgs};

/// Feesync - mirror Alma patron fees into a local store
#[derive(Parser)]
#[command(name = "feesync", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show fee store status and recent syncs
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sync a patron's fees (or every patron's) from a fee source
    Sync {
        /// Alma username or local id of the patron
        user: Option<String>,
        /// Sync every registered patron
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        source: SourceArgs,
        /// Preview changes without applying
        #[arg(long)]
        dry_run: bool,
        /// Fail the patron's sync on the first unparseable fee
        #[arg(long)]
        abort_on_parse_error: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage registered patrons
    User {
        #[command(subcommand)]
        command: user::UserCommands,
    },

    /// Show a patron's fees
    Fees {
        /// Alma username or local id of the patron
        user: String,
        /// Only fees with this status (e.g. active, stale, paid)
        #[arg(long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Status { json } => status::run(json),
        Commands::Sync {
            user,
            all,
            source,
            dry_run,
            abort_on_parse_error,
            json,
        } => sync::run(sync::SyncArgs {
            user,
            all,
            source,
            dry_run,
            abort_on_parse_error,
            json,
        }),
        Commands::User { command } => user::run(command),
        Commands::Fees { user, status, json } => fees::run(&user, status.as_deref(), json),
        Commands::Logs { command } => logs::run(command),
    }
}
