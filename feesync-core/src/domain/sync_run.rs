//! Sync run ledger entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One pass of fee synchronization for one patron
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub yorku_id: String,
    pub username: String,
    /// Fee source name ("json", "demo", ...)
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fees_seen: i64,
    pub fees_created: i64,
    pub fees_updated: i64,
    pub fees_staled: i64,
    pub fees_failed: i64,
    pub dry_run: bool,
}

impl SyncRun {
    /// Start a run for a patron
    pub fn start(
        yorku_id: impl Into<String>,
        username: impl Into<String>,
        source: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            yorku_id: yorku_id.into(),
            username: username.into(),
            source: source.into(),
            started_at: Utc::now(),
            finished_at: None,
            fees_seen: 0,
            fees_created: 0,
            fees_updated: 0,
            fees_staled: 0,
            fees_failed: 0,
            dry_run,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
