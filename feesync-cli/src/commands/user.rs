//! User command - manage the local patron directory

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::{get_context, get_logger, get_source, log_event, SourceArgs};
use crate::output;
use feesync_core::LogEvent;

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a patron by local id and Alma username
    Add {
        /// Local patron id
        yorku_id: String,
        /// Alma primary id
        username: String,
    },
    /// Register a patron found in the fee source (local id from UNIV_ID)
    Import {
        /// Alma primary id
        primary_id: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// List registered patrons
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: UserCommands) -> Result<()> {
    log_event(
        get_logger().as_ref(),
        LogEvent::new("command_executed").with_command("user"),
    );
    let ctx = get_context()?;

    match command {
        UserCommands::Add { yorku_id, username } => {
            let user = ctx.user_service.add_user(&yorku_id, &username)?;
            output::success(&format!(
                "Registered {} as local patron {}",
                user.username, user.yorku_id
            ));
        }
        UserCommands::Import { primary_id, source } => {
            let source = get_source(&ctx, &source)?;
            let user = ctx
                .sync_service(source)
                .register_user_from_source(&primary_id)?;
            output::success(&format!(
                "Registered {} as local patron {}",
                user.username, user.yorku_id
            ));
        }
        UserCommands::List { json } => {
            let users = ctx.user_service.list_users()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&users)?);
                return Ok(());
            }

            if users.is_empty() {
                println!("{}", "No patrons registered.".yellow());
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Username", "Local ID", "Registered"]);
            for user in users {
                table.add_row(vec![
                    user.username,
                    user.yorku_id,
                    user.created_at.format("%Y-%m-%d").to_string(),
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
