//! CLI command implementations

pub mod fees;
pub mod logs;
pub mod status;
pub mod sync;
pub mod user;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use feesync_core::adapters::demo::DemoFeeSource;
use feesync_core::adapters::json_source::JsonFeeSource;
use feesync_core::{EntryPoint, FeeSource, FeeSyncContext, LogEvent, LoggingService};

/// Where fees come from, shared by every command that talks to a fee source
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Alma fees document to read ("-" for stdin)
    #[arg(long, short)]
    pub file: Option<PathBuf>,
    /// Use the built-in demo patrons instead of a fees document
    #[arg(long, conflicts_with = "file")]
    pub demo: bool,
}

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let data_dir = get_data_dir().ok()?;
    std::fs::create_dir_all(&data_dir).ok()?;
    LoggingService::new(&data_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: Option<&LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Data directory from FEESYNC_DIR, or ~/.feesync
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("FEESYNC_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".feesync"))
        .ok_or_else(|| anyhow!("Could not find home directory; set FEESYNC_DIR"))
}

/// Get or create the feesync context
pub fn get_context() -> Result<FeeSyncContext> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

    FeeSyncContext::new(&data_dir).context("Failed to initialize feesync context")
}

/// Resolve the fee source for a command
///
/// Priority: --demo, --file, a document piped on stdin, then settings.json.
/// An empty stdin (cron and friends attach /dev/null) counts as no document.
pub fn get_source(ctx: &FeeSyncContext, args: &SourceArgs) -> Result<Arc<dyn FeeSource>> {
    if args.demo {
        return Ok(Arc::new(DemoFeeSource::new()));
    }
    match args.file.as_deref() {
        Some(path) if path == Path::new("-") => match piped_document(&read_stdin()?)? {
            Some(source) => Ok(Arc::new(source)),
            None => bail!("--file - was given but stdin is empty"),
        },
        Some(path) => Ok(Arc::new(JsonFeeSource::from_path(path).with_context(|| {
            format!("Failed to read fees file {}", path.display())
        })?)),
        None if atty::isnt(atty::Stream::Stdin) => match piped_document(&read_stdin()?)? {
            Some(source) => Ok(Arc::new(source)),
            None => ctx.configured_source(),
        },
        None => ctx.configured_source(),
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read fees document from stdin")?;
    Ok(buffer)
}

/// Parse a fees document read from stdin; blank input is no document
fn piped_document(input: &str) -> Result<Option<JsonFeeSource>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    let source =
        JsonFeeSource::from_json(input).context("Failed to parse fees document from stdin")?;
    Ok(Some(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_stdin_is_no_document() {
        assert!(piped_document("").unwrap().is_none());
        assert!(piped_document(" \n\t").unwrap().is_none());
    }

    #[test]
    fn test_piped_document_is_parsed() {
        let source = piped_document(r#"{"fee": [{"id": "1"}], "total_record_count": 1}"#)
            .unwrap()
            .unwrap();
        assert_eq!(source.get_user_fees("p1").unwrap().fees.len(), 1);

        assert!(piped_document("not json").is_err());
    }
}
