//! Fees command - show a patron's mirrored fees

use anyhow::Result;
use colored::Colorize;
use comfy_table::Cell;
use feesync_core::{FeeStatus, LogEvent};
use rust_decimal::Decimal;

use super::{get_context, get_logger, log_event};
use crate::output;

pub fn run(user: &str, status: Option<&str>, json: bool) -> Result<()> {
    log_event(
        get_logger().as_ref(),
        LogEvent::new("command_executed").with_command("fees"),
    );
    let ctx = get_context()?;
    let user = ctx.user_service.resolve(user)?;

    let status = status.map(|s| FeeStatus::from(s.to_ascii_uppercase().as_str()));
    let fees = ctx
        .repository
        .get_fees_for_user(&user, status.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&fees)?);
        return Ok(());
    }

    if fees.is_empty() {
        println!("No fees for {}.", user.username);
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Fee ID", "Type", "Status", "Balance", "Created", "Title"]);

    for fee in &fees {
        let status_cell = match fee.fee_status {
            FeeStatus::Active => fee.fee_status.as_str().green().to_string(),
            FeeStatus::Stale => fee.fee_status.as_str().dimmed().to_string(),
            _ => fee.fee_status.to_string(),
        };
        table.add_row(vec![
            Cell::new(&fee.fee_id),
            Cell::new(fee.fee_type.as_deref().unwrap_or("")),
            Cell::new(status_cell),
            Cell::new(output::format_amount(fee.balance)),
            Cell::new(
                fee.creation_time
                    .map(|t| t.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
            ),
            Cell::new(output::truncate(fee.item_title.as_deref().unwrap_or(""), 40)),
        ]);
    }
    println!("{}", table);

    let outstanding: Decimal = fees
        .iter()
        .filter(|f| f.fee_status.is_active())
        .filter_map(|f| f.balance)
        .sum();
    println!("Outstanding: {}", output::format_amount(Some(outstanding)).bold());

    Ok(())
}
