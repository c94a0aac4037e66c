//! Configuration management
//!
//! Settings live in `settings.json` in the data directory:
//! ```json
//! {
//!   "sync": {
//!     "defaultSource": "json",
//!     "feesFile": "/srv/alma/fees.json",
//!     "parseErrorPolicy": "skip"
//!   }
//! }
//! ```
//! Keys this crate does not manage are kept as-is on save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::result::Error;
use crate::services::ParseErrorPolicy;

/// Names accepted for `sync.defaultSource`
pub const SOURCE_JSON: &str = "json";
pub const SOURCE_DEMO: &str = "demo";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    sync: SyncSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fees_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parse_error_policy: Option<ParseErrorPolicy>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Feesync configuration (resolved view of settings plus environment)
#[derive(Debug, Clone)]
pub struct Config {
    /// "json" or "demo"
    pub default_source: String,
    /// Alma fees document read by the json source
    pub fees_file: Option<PathBuf>,
    pub parse_error_policy: ParseErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_source: SOURCE_JSON.to_string(),
            fees_file: None,
            parse_error_policy: ParseErrorPolicy::default(),
        }
    }
}

fn read_settings(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)).into())
}

impl Config {
    /// Load config from the data directory
    ///
    /// Environment overrides (for cron jobs and CI):
    /// - FEESYNC_FEES_FILE: fees document path
    /// - FEESYNC_PARSE_ERRORS: "skip" or "abort"
    pub fn load(data_dir: &Path) -> Result<Self> {
        let raw = read_settings(&data_dir.join("settings.json"))?;

        let fees_file = match std::env::var("FEESYNC_FEES_FILE") {
            Ok(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => raw.sync.fees_file,
        };

        let parse_error_policy = match std::env::var("FEESYNC_PARSE_ERRORS") {
            Ok(value) if !value.is_empty() => value
                .parse::<ParseErrorPolicy>()
                .context("Invalid FEESYNC_PARSE_ERRORS")?,
            _ => raw.sync.parse_error_policy.unwrap_or_default(),
        };

        let default_source = raw
            .sync
            .default_source
            .unwrap_or_else(|| SOURCE_JSON.to_string());
        if default_source != SOURCE_JSON && default_source != SOURCE_DEMO {
            return Err(Error::Config(format!("Unknown default source '{}'", default_source)).into());
        }

        Ok(Self {
            default_source,
            fees_file,
            parse_error_policy,
        })
    }

    /// Save managed fields back to settings.json
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join("settings.json");
        let mut settings = read_settings(&settings_path)?;

        settings.sync.default_source = Some(self.default_source.clone());
        settings.sync.fees_file = self.fees_file.clone();
        settings.sync.parse_error_policy = Some(self.parse_error_policy);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}
