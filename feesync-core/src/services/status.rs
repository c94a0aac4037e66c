//! Status service - fee store summaries

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::adapters::duckdb::DuckDbRepository;

/// Status service for store summaries
pub struct StatusService {
    repository: Arc<DuckDbRepository>,
}

impl StatusService {
    pub fn new(repository: Arc<DuckDbRepository>) -> Self {
        Self { repository }
    }

    /// Get overall status summary
    pub fn get_status(&self) -> Result<StatusSummary> {
        let total_users = self.repository.get_user_count()?;
        let total_fees = self.repository.get_fee_count()?;
        let last_sync = self.repository.get_last_sync_time()?;

        let by_status: Vec<StatusCount> = self
            .repository
            .get_fee_status_counts()?
            .into_iter()
            .map(|c| StatusCount {
                status: c.status.to_string(),
                count: c.count,
                balance: c.balance,
            })
            .collect();

        let active_balance = by_status
            .iter()
            .filter(|c| c.status == "ACTIVE")
            .map(|c| c.balance)
            .sum();

        Ok(StatusSummary {
            total_users,
            total_fees,
            active_balance,
            by_status,
            last_sync: last_sync.map(|t| t.to_rfc3339()),
        })
    }

    /// Latest sync runs, newest first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        Ok(self
            .repository
            .get_recent_sync_runs(limit)?
            .into_iter()
            .map(|run| RunSummary {
                username: run.username,
                source: run.source,
                started_at: run.started_at.to_rfc3339(),
                created: run.fees_created,
                updated: run.fees_updated,
                staled: run.fees_staled,
                failed: run.fees_failed,
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total_users: i64,
    pub total_fees: i64,
    /// Outstanding balance across ACTIVE fees
    pub active_balance: Decimal,
    pub by_status: Vec<StatusCount>,
    pub last_sync: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
    pub balance: Decimal,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub username: String,
    pub source: String,
    pub started_at: String,
    pub created: i64,
    pub updated: i64,
    pub staled: i64,
    pub failed: i64,
}
