//! Status command - show fee store summary

use anyhow::Result;
use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use feesync_core::LogEvent;

use super::{get_context, get_logger, log_event};
use crate::output;

pub fn run(json: bool) -> Result<()> {
    log_event(
        get_logger().as_ref(),
        LogEvent::new("command_executed").with_command("status"),
    );
    let ctx = get_context()?;
    let status = ctx.status_service.get_status()?;
    let runs = ctx.status_service.recent_runs(5)?;

    if json {
        let value = serde_json::json!({
            "status": status,
            "recent_runs": runs,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", "Fee Store Status".bold());
    println!();

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.add_row(vec!["Patrons", &status.total_users.to_string()]);
    table.add_row(vec!["Fees", &status.total_fees.to_string()]);
    table.add_row(vec![
        "Outstanding (active)",
        &output::format_amount(Some(status.active_balance)),
    ]);
    table.add_row(vec![
        "Last sync",
        status.last_sync.as_deref().unwrap_or("never"),
    ]);
    println!("{}", table);

    if !status.by_status.is_empty() {
        println!();
        println!("{}", "By Status".bold());
        for count in &status.by_status {
            println!(
                "  {:<12} {:>6}  {}",
                count.status,
                count.count,
                output::format_amount(Some(count.balance))
            );
        }
    }

    if !runs.is_empty() {
        println!();
        println!("{}", "Recent Syncs".bold());
        let mut table = output::create_table();
        table.set_header(vec!["Started", "Patron", "Source", "New", "Updated", "Stale", "Failed"]);
        for run in runs {
            table.add_row(vec![
                run.started_at,
                run.username,
                run.source,
                run.created.to_string(),
                run.updated.to_string(),
                run.staled.to_string(),
                run.failed.to_string(),
            ]);
        }
        println!("{}", table);
    }

    Ok(())
}
