//! DuckDB repository implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::types::Type;
use duckdb::{params, Connection};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Fee, FeeStatus, FeeUpdate, LocalUser, SyncRun};
use crate::services::MigrationService;

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Decimal places kept for stored amounts
const AMOUNT_SCALE: u32 = 4;

/// Column list shared by every fee SELECT; order matches `row_to_fee`
const FEE_COLUMNS: &str = "id, fee_id, user_primary_id, yorku_id,
    fee_type, fee_description, fee_status,
    CAST(balance AS VARCHAR), CAST(remaining_vat_amount AS VARCHAR),
    CAST(original_amount AS VARCHAR), CAST(original_vat_amount AS VARCHAR),
    creation_time::VARCHAR, status_time::VARCHAR,
    owner_id, owner_description, item_title, item_barcode, comment,
    created_at::VARCHAR, updated_at::VARCHAR";

const SYNC_RUN_COLUMNS: &str = "run_id, yorku_id, username, source,
    started_at::VARCHAR, finished_at::VARCHAR,
    fees_seen, fees_created, fees_updated, fees_staled, fees_failed, dry_run";

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Per-status fee totals
#[derive(Debug, Clone, PartialEq)]
pub struct FeeStatusCount {
    pub status: FeeStatus,
    pub count: i64,
    pub balance: Decimal,
}

/// DuckDB repository implementation
///
/// Backs both the fee store and the local patron directory.
pub struct DuckDbRepository {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbRepository {
    /// Open (or create) the database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which show up when a scheduled sync and a manual one start together.
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[feesync] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    /// Path of the underlying database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> Result<crate::services::MigrationResult> {
        let conn = self.conn()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    /// Run `f` inside a single transaction, rolling back if it fails
    ///
    /// `f` goes through the repository's own methods, so the connection lock
    /// is not held across the call. Transactions do not nest.
    pub fn in_transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.conn()?.execute_batch("BEGIN TRANSACTION")?;
        match f() {
            Ok(value) => {
                self.conn()?.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Ok(conn) = self.conn() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
                Err(e)
            }
        }
    }

    // === Patrons ===

    /// Insert a patron, or re-point an existing username at a new local id
    ///
    /// On re-point the patron's fee rows move to the new local id as well.
    /// Returns the number of fee rows moved.
    pub fn upsert_user(&self, user: &LocalUser) -> Result<usize> {
        self.in_transaction(|| {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO sys_users (username, yorku_id, created_at)
                 VALUES (?, ?, CAST(? AS TIMESTAMP))
                 ON CONFLICT (username) DO UPDATE SET yorku_id = EXCLUDED.yorku_id",
                params![user.username, user.yorku_id, format_timestamp(&user.created_at)],
            )?;
            let moved = conn.execute(
                "UPDATE sys_fees SET yorku_id = ?
                 WHERE user_primary_id = ? AND yorku_id <> ?",
                params![user.yorku_id, user.username, user.yorku_id],
            )?;
            Ok(moved)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<LocalUser>> {
        self.query_user("WHERE username = ?", username)
    }

    pub fn get_user_by_yorku_id(&self, yorku_id: &str) -> Result<Option<LocalUser>> {
        self.query_user("WHERE yorku_id = ? ORDER BY username LIMIT 1", yorku_id)
    }

    fn query_user(&self, filter: &str, value: &str) -> Result<Option<LocalUser>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT yorku_id, username, created_at::VARCHAR FROM sys_users {}",
            filter
        ))?;
        match stmt.query_row([value], row_to_user) {
            Ok(user) => Ok(Some(user)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_users(&self) -> Result<Vec<LocalUser>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT yorku_id, username, created_at::VARCHAR FROM sys_users ORDER BY username",
        )?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn get_user_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_users", [], |row| row.get(0))?;
        Ok(count)
    }

    // === Fees ===

    /// Current row for an Alma fee, keyed by (fee_id, user_primary_id)
    pub fn find_fee(&self, fee_id: &str, user_primary_id: &str) -> Result<Option<Fee>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_fees WHERE fee_id = ? AND user_primary_id = ?",
            FEE_COLUMNS
        ))?;
        match stmt.query_row(params![fee_id, user_primary_id], row_to_fee) {
            Ok(fee) => Ok(Some(fee)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert a fee seen for the first time
    ///
    /// Fails on the (fee_id, user_primary_id) unique constraint if the fee
    /// already has a row.
    pub fn insert_fee(&self, fee: &Fee) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_fees (id, fee_id, user_primary_id, yorku_id,
                                   fee_type, fee_description, fee_status,
                                   balance, remaining_vat_amount, original_amount, original_vat_amount,
                                   creation_time, status_time,
                                   owner_id, owner_description, item_title, item_barcode, comment,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?,
                     CAST(? AS DECIMAL(18, 4)), CAST(? AS DECIMAL(18, 4)),
                     CAST(? AS DECIMAL(18, 4)), CAST(? AS DECIMAL(18, 4)),
                     CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP),
                     ?, ?, ?, ?, ?,
                     CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP))",
            params![
                fee.id.to_string(),
                fee.fee_id,
                fee.user_primary_id,
                fee.yorku_id,
                fee.fee_type,
                fee.fee_description,
                fee.fee_status.as_str(),
                format_decimal(fee.balance),
                format_decimal(fee.remaining_vat_amount),
                format_decimal(fee.original_amount),
                format_decimal(fee.original_vat_amount),
                fee.creation_time.as_ref().map(format_timestamp),
                fee.status_time.as_ref().map(format_timestamp),
                fee.owner_id,
                fee.owner_description,
                fee.item_title,
                fee.item_barcode,
                fee.comment,
                format_timestamp(&fee.created_at),
                format_timestamp(&fee.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Apply a patch to an existing fee row. Returns false if no row has `id`.
    pub fn update_fee(&self, id: Uuid, update: &FeeUpdate) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sys_fees SET
                balance = CAST(? AS DECIMAL(18, 4)),
                remaining_vat_amount = CAST(? AS DECIMAL(18, 4)),
                fee_status = ?,
                status_time = CAST(? AS TIMESTAMP),
                updated_at = CAST(? AS TIMESTAMP)
             WHERE id = ?",
            params![
                format_decimal(update.balance),
                format_decimal(update.remaining_vat_amount),
                update.fee_status.as_str(),
                update.status_time.as_ref().map(format_timestamp),
                format_timestamp(&Utc::now()),
                id.to_string(),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_fee_by_id(&self, id: Uuid) -> Result<Option<Fee>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM sys_fees WHERE id = ?", FEE_COLUMNS))?;
        match stmt.query_row([id.to_string()], row_to_fee) {
            Ok(fee) => Ok(Some(fee)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move every ACTIVE fee of a patron to STALE; returns rows changed
    ///
    /// A patron is (yorku_id, username): several usernames may share one
    /// local id, and each keeps its own fees.
    pub fn mark_active_fees_stale(&self, user: &LocalUser) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sys_fees SET fee_status = ?, updated_at = CAST(? AS TIMESTAMP)
             WHERE yorku_id = ? AND user_primary_id = ? AND fee_status = ?",
            params![
                FeeStatus::STALE,
                format_timestamp(&Utc::now()),
                user.yorku_id,
                user.username,
                FeeStatus::ACTIVE,
            ],
        )?;
        Ok(changed)
    }

    /// Fees of a patron, optionally restricted to one status
    pub fn get_fees_for_user(
        &self,
        user: &LocalUser,
        status: Option<&FeeStatus>,
    ) -> Result<Vec<Fee>> {
        let conn = self.conn()?;
        let fees = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sys_fees
                     WHERE yorku_id = ? AND user_primary_id = ? AND fee_status = ?
                     ORDER BY creation_time, fee_id",
                    FEE_COLUMNS
                ))?;
                let rows = stmt.query_map(
                    params![user.yorku_id, user.username, status.as_str()],
                    row_to_fee,
                )?;
                rows.collect::<duckdb::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sys_fees WHERE yorku_id = ? AND user_primary_id = ?
                     ORDER BY creation_time, fee_id",
                    FEE_COLUMNS
                ))?;
                let rows = stmt.query_map(params![user.yorku_id, user.username], row_to_fee)?;
                rows.collect::<duckdb::Result<Vec<_>>>()?
            }
        };
        Ok(fees)
    }

    /// Active fees of a patron
    pub fn get_active_fees(&self, user: &LocalUser) -> Result<Vec<Fee>> {
        self.get_fees_for_user(user, Some(&FeeStatus::Active))
    }

    pub fn get_fee_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sys_fees", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Row count and outstanding balance per status
    pub fn get_fee_status_counts(&self) -> Result<Vec<FeeStatusCount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fee_status, COUNT(*), CAST(COALESCE(SUM(balance), 0) AS VARCHAR)
             FROM sys_fees GROUP BY fee_status ORDER BY fee_status",
        )?;
        let counts = stmt
            .query_map([], |row| {
                let status: String = row.get(0)?;
                let balance: String = row.get(2)?;
                Ok(FeeStatusCount {
                    status: FeeStatus::from(status.as_str()),
                    count: row.get(1)?,
                    balance: Decimal::from_str(&balance).unwrap_or_default(),
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(counts)
    }

    // === Sync runs ===

    pub fn record_sync_run(&self, run: &SyncRun) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sys_sync_runs (run_id, yorku_id, username, source, started_at, finished_at,
                                        fees_seen, fees_created, fees_updated, fees_staled,
                                        fees_failed, dry_run)
             VALUES (?, ?, ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?)",
            params![
                run.id.to_string(),
                run.yorku_id,
                run.username,
                run.source,
                format_timestamp(&run.started_at),
                run.finished_at.as_ref().map(format_timestamp),
                run.fees_seen,
                run.fees_created,
                run.fees_updated,
                run.fees_staled,
                run.fees_failed,
                run.dry_run,
            ],
        )?;
        Ok(())
    }

    /// Most recent sync runs, newest first
    pub fn get_recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sys_sync_runs ORDER BY started_at DESC LIMIT ?",
            SYNC_RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map([limit as i64], row_to_sync_run)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn get_last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let last: Option<String> = conn.query_row(
            "SELECT MAX(started_at)::VARCHAR FROM sys_sync_runs WHERE NOT dry_run",
            [],
            |row| row.get(0),
        )?;
        Ok(last.as_deref().and_then(parse_db_timestamp))
    }
}

// === Row mapping ===

fn row_to_user(row: &duckdb::Row) -> duckdb::Result<LocalUser> {
    let created: Option<String> = row.get(2)?;
    Ok(LocalUser {
        yorku_id: row.get(0)?,
        username: row.get(1)?,
        created_at: created
            .as_deref()
            .and_then(parse_db_timestamp)
            .unwrap_or_else(Utc::now),
    })
}

fn row_to_fee(row: &duckdb::Row) -> duckdb::Result<Fee> {
    // 0: id, 1: fee_id, 2: user_primary_id, 3: yorku_id, 4: fee_type, 5: fee_description,
    // 6: fee_status, 7: balance, 8: remaining_vat_amount, 9: original_amount,
    // 10: original_vat_amount, 11: creation_time, 12: status_time, 13: owner_id,
    // 14: owner_description, 15: item_title, 16: item_barcode, 17: comment,
    // 18: created_at, 19: updated_at
    let id: String = row.get(0)?;
    let status: String = row.get(6)?;
    let created_at: Option<String> = row.get(18)?;
    let updated_at: Option<String> = row.get(19)?;

    Ok(Fee {
        id: parse_uuid(0, &id)?,
        fee_id: row.get(1)?,
        user_primary_id: row.get(2)?,
        yorku_id: row.get(3)?,
        fee_type: row.get(4)?,
        fee_description: row.get(5)?,
        fee_status: FeeStatus::from(status.as_str()),
        balance: decimal_column(row, 7)?,
        remaining_vat_amount: decimal_column(row, 8)?,
        original_amount: decimal_column(row, 9)?,
        original_vat_amount: decimal_column(row, 10)?,
        creation_time: timestamp_column(row, 11)?,
        status_time: timestamp_column(row, 12)?,
        owner_id: row.get(13)?,
        owner_description: row.get(14)?,
        item_title: row.get(15)?,
        item_barcode: row.get(16)?,
        comment: row.get(17)?,
        created_at: created_at
            .as_deref()
            .and_then(parse_db_timestamp)
            .unwrap_or_else(Utc::now),
        updated_at: updated_at
            .as_deref()
            .and_then(parse_db_timestamp)
            .unwrap_or_else(Utc::now),
    })
}

fn row_to_sync_run(row: &duckdb::Row) -> duckdb::Result<SyncRun> {
    let id: String = row.get(0)?;
    let username: Option<String> = row.get(2)?;
    let started_at: Option<String> = row.get(4)?;
    Ok(SyncRun {
        id: parse_uuid(0, &id)?,
        yorku_id: row.get(1)?,
        // rows written before the username column existed
        username: username.unwrap_or_default(),
        source: row.get(3)?,
        started_at: started_at
            .as_deref()
            .and_then(parse_db_timestamp)
            .unwrap_or_else(Utc::now),
        finished_at: timestamp_column(row, 5)?,
        fees_seen: row.get(6)?,
        fees_created: row.get(7)?,
        fees_updated: row.get(8)?,
        fees_staled: row.get(9)?,
        fees_failed: row.get(10)?,
        dry_run: row.get(11)?,
    })
}

fn parse_uuid(idx: usize, s: &str) -> duckdb::Result<Uuid> {
    Uuid::parse_str(s)
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decimal_column(row: &duckdb::Row, idx: usize) -> duckdb::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|s| {
        Decimal::from_str(&s)
            .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn timestamp_column(row: &duckdb::Row, idx: usize) -> duckdb::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    Ok(text.as_deref().and_then(parse_db_timestamp))
}

/// Amounts are stored as DECIMAL(18, 4); finer amounts are rounded here
/// (banker's rounding) instead of by the column cast
fn format_decimal(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.round_dp(AMOUNT_SCALE).to_string())
}

/// Timestamps are stored as UTC in naive TIMESTAMP columns
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn parse_db_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
