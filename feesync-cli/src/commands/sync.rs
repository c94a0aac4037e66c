//! Sync command - reconcile Alma fees into the local store

use std::sync::Arc;

use anyhow::{bail, Result};
use colored::Colorize;
use feesync_core::services::{ParseErrorPolicy, SyncResult, UserSyncResult};
use feesync_core::{LogEvent, OperationResult};
use indicatif::{ProgressBar, ProgressStyle};

use super::{get_context, get_logger, get_source, log_event, SourceArgs};

pub struct SyncArgs {
    pub user: Option<String>,
    pub all: bool,
    pub source: SourceArgs,
    pub dry_run: bool,
    pub abort_on_parse_error: bool,
    pub json: bool,
}

pub fn run(args: SyncArgs) -> Result<()> {
    let logger = get_logger().map(Arc::new);
    log_event(logger.as_deref(), LogEvent::new("command_executed").with_command("sync"));

    let ctx = get_context()?;
    let source = get_source(&ctx, &args.source)?;
    let mut options = ctx.sync_options(args.dry_run);
    if args.abort_on_parse_error {
        options.parse_errors = ParseErrorPolicy::Abort;
    }

    let mut service = ctx.sync_service(Arc::clone(&source));
    if let Some(l) = &logger {
        service = service.with_logger(Arc::clone(l));
    }

    let result = match (&args.user, args.all) {
        (Some(_), true) => bail!("Pass either a patron or --all, not both"),
        (None, false) => bail!("Name a patron to sync, or pass --all"),
        (Some(id), false) => {
            let user = ctx.user_service.resolve(id)?;
            SyncResult {
                results: vec![service.sync_user(&user, options)?],
            }
        }
        (None, true) => {
            if !source.can_find_users() {
                // a single-patron document would be applied to every patron
                bail!("--all needs a multi-patron fees document (with a \"users\" list)");
            }
            let users = ctx.user_service.list_users()?;
            let progress = if args.json {
                ProgressBar::hidden()
            } else {
                ProgressBar::new(users.len() as u64)
            };
            if let Ok(style) = ProgressStyle::with_template("{bar:30.cyan} {pos}/{len} {msg}") {
                progress.set_style(style);
            }
            let result = service.sync_users(&users, options, |r| {
                progress.set_message(r.username.clone());
                progress.inc(1);
            });
            progress.finish_and_clear();
            result
        }
    };

    let failed_users = result.errors().count();

    if args.json {
        let envelope = if failed_users == 0 {
            OperationResult::ok(&result)
        } else {
            OperationResult::partial(&result, format!("{} patron sync(s) failed", failed_users))
        };
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    } else {
        print_result(&result, args.dry_run);
    }

    if failed_users > 0 {
        bail!("{} patron sync(s) failed", failed_users);
    }
    Ok(())
}

fn print_result(result: &SyncResult, dry_run: bool) {
    if dry_run {
        println!("{}", "DRY RUN - No changes applied".yellow());
        println!();
    }

    for user_result in &result.results {
        print_user_result(user_result);
        println!();
    }

    if result.results.len() > 1 {
        println!(
            "{} {} created, {} updated, {} stale, {} unparseable",
            "Total:".bold(),
            result.total_created(),
            result.total_updated(),
            result.total_staled(),
            result.total_failed()
        );
    }

    if result.results.is_empty() {
        println!(
            "{}",
            "No patrons registered. Use 'feesync user add' to add one.".yellow()
        );
    }
}

fn print_user_result(r: &UserSyncResult) {
    if let Some(error) = &r.error {
        println!("{} {} - {}", "Error:".red(), r.username, error);
        return;
    }

    println!("{} {} ({})", "Synced:".green(), r.username, r.source);
    println!("  Fees reported: {}", r.seen);
    println!("    New: {}", r.created);
    println!("    Updated: {}", r.updated);
    println!("    Marked stale: {} (no longer reported)", r.staled);
    if r.failed > 0 {
        println!("    {} {}", "Unparseable:".red(), r.failed);
        for failure in &r.failures {
            println!(
                "      #{} {}: {}",
                failure.index,
                failure.fee_id.as_deref().unwrap_or("-"),
                failure.error
            );
        }
    }
    for warning in &r.warnings {
        println!("  {} {}", "Warning:".yellow(), warning);
    }
}
