//! Sync service - reconcile a patron's Alma fees into the local fee table

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::duckdb::DuckDbRepository;
use crate::domain::fee_record::payload_primary_id;
use crate::domain::result::Error;
use crate::domain::{get_val, parse_alma_fee, Fee, FeeRecord, LocalUser, SyncRun};
use crate::ports::FeeSource;
use crate::services::{FeeReconciler, LogEvent, LoggingService, UpsertOutcome};

/// What to do with a fee record that does not parse
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseErrorPolicy {
    /// Record the failure and carry on with the rest of the batch
    #[default]
    Skip,
    /// Fail the patron's sync before anything is written
    Abort,
}

impl FromStr for ParseErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ParseErrorPolicy::Skip),
            "abort" => Ok(ParseErrorPolicy::Abort),
            other => Err(Error::Config(format!(
                "Unknown parse error policy '{}' (expected 'skip' or 'abort')",
                other
            ))),
        }
    }
}

impl fmt::Display for ParseErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorPolicy::Skip => f.write_str("skip"),
            ParseErrorPolicy::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Work out what would change without writing anything
    pub dry_run: bool,
    pub parse_errors: ParseErrorPolicy,
}

/// A fee record that could not be parsed
#[derive(Debug, Clone, Serialize)]
pub struct FeeFailure {
    /// Position in the source's fee list
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSyncResult {
    pub username: String,
    pub yorku_id: String,
    pub source: String,
    pub seen: i64,
    pub created: i64,
    pub updated: i64,
    /// Previously active fees the source no longer reports
    pub staled: i64,
    pub failed: i64,
    pub dry_run: bool,
    pub warnings: Vec<String>,
    pub failures: Vec<FeeFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UserSyncResult {
    fn new(user: &LocalUser, source: &str, dry_run: bool) -> Self {
        Self {
            username: user.username.clone(),
            yorku_id: user.yorku_id.clone(),
            source: source.to_string(),
            seen: 0,
            created: 0,
            updated: 0,
            staled: 0,
            failed: 0,
            dry_run,
            warnings: Vec::new(),
            failures: Vec::new(),
            error: None,
        }
    }

    fn to_sync_run(&self) -> SyncRun {
        let mut run = SyncRun::start(&self.yorku_id, &self.username, &self.source, self.dry_run);
        run.fees_seen = self.seen;
        run.fees_created = self.created;
        run.fees_updated = self.updated;
        run.fees_staled = self.staled;
        run.fees_failed = self.failed;
        run
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SyncResult {
    pub results: Vec<UserSyncResult>,
}

impl SyncResult {
    pub fn total_created(&self) -> i64 {
        self.results.iter().map(|r| r.created).sum()
    }

    pub fn total_updated(&self) -> i64 {
        self.results.iter().map(|r| r.updated).sum()
    }

    pub fn total_staled(&self) -> i64 {
        self.results.iter().map(|r| r.staled).sum()
    }

    pub fn total_failed(&self) -> i64 {
        self.results.iter().map(|r| r.failed).sum()
    }

    /// Patrons whose sync did not complete
    pub fn errors(&self) -> impl Iterator<Item = &UserSyncResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

/// Fetches fees from a [`FeeSource`] and reconciles them per patron
pub struct FeeSyncService {
    repository: Arc<DuckDbRepository>,
    reconciler: FeeReconciler,
    source: Arc<dyn FeeSource>,
    logger: Option<Arc<LoggingService>>,
}

impl FeeSyncService {
    pub fn new(repository: Arc<DuckDbRepository>, source: Arc<dyn FeeSource>) -> Self {
        Self {
            reconciler: FeeReconciler::new(Arc::clone(&repository)),
            repository,
            source,
            logger: None,
        }
    }

    /// Record sync events in the event log
    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    fn log(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            // Logging must never break a sync
            let _ = logger.log(event.with_source(self.source.name()));
        }
    }

    /// Sync one patron
    ///
    /// All records are parsed before anything is written, so an aborted batch
    /// leaves the store untouched. Then every ACTIVE fee of the patron is
    /// marked STALE and each parsed fee is upserted, which restores the ones
    /// Alma still reports.
    pub fn sync_user(&self, user: &LocalUser, options: SyncOptions) -> Result<UserSyncResult> {
        self.log(LogEvent::new("sync_started"));
        match self.sync_user_inner(user, options) {
            Ok(result) => {
                self.log(LogEvent::new("sync_completed"));
                Ok(result)
            }
            Err(e) => {
                self.log(LogEvent::new("sync_failed").with_error(e.to_string()));
                Err(e)
            }
        }
    }

    fn sync_user_inner(&self, user: &LocalUser, options: SyncOptions) -> Result<UserSyncResult> {
        let mut result = UserSyncResult::new(user, self.source.name(), options.dry_run);

        let fetched = self
            .source
            .get_user_fees(user.primary_id())
            .with_context(|| format!("Failed to fetch fees from {}", self.source.name()))?;
        result.warnings.extend(fetched.warnings);
        result.seen = fetched.fees.len() as i64;

        let fees = self.parse_all(&fetched.fees, user, options.parse_errors, &mut result)?;

        let reported: HashSet<&str> = fees.iter().map(|f| f.fee_id.as_str()).collect();
        result.staled = self
            .repository
            .get_active_fees(user)?
            .iter()
            .filter(|f| !reported.contains(f.fee_id.as_str()))
            .count() as i64;

        if options.dry_run {
            for fee in &fees {
                if self
                    .repository
                    .find_fee(&fee.fee_id, &fee.user_primary_id)?
                    .is_some()
                {
                    result.updated += 1;
                } else {
                    result.created += 1;
                }
            }
            return Ok(result);
        }

        // a failure part way leaves the previous state, not a half-staled one
        self.repository.in_transaction(|| {
            self.reconciler.mark_all_active_as_stale(user)?;
            for fee in &fees {
                match self.reconciler.upsert(fee)?.1 {
                    UpsertOutcome::Created => result.created += 1,
                    UpsertOutcome::Updated => result.updated += 1,
                }
            }

            let mut run = result.to_sync_run();
            run.finish();
            self.repository.record_sync_run(&run)
        })?;

        Ok(result)
    }

    fn parse_all(
        &self,
        records: &[FeeRecord],
        user: &LocalUser,
        policy: ParseErrorPolicy,
        result: &mut UserSyncResult,
    ) -> Result<Vec<Fee>> {
        let mut fees = Vec::with_capacity(records.len());

        for (index, record) in records.iter().enumerate() {
            match parse_alma_fee(record, user) {
                Ok(fee) => {
                    if let Some(reported) = payload_primary_id(record) {
                        if reported != user.username {
                            result.warnings.push(format!(
                                "Fee {} is reported for '{}', expected '{}'",
                                fee.fee_id, reported, user.username
                            ));
                        }
                    }
                    fees.push(fee);
                }
                Err(e) => {
                    self.log(LogEvent::new("fee_parse_failed").with_error(e.to_string()));
                    let fee_id = get_val(record, "id", None).and_then(|v| v.as_text());
                    if policy == ParseErrorPolicy::Abort {
                        return Err(e).with_context(|| match &fee_id {
                            Some(id) => format!("Failed to parse fee {}", id),
                            None => format!("Failed to parse fee #{}", index),
                        });
                    }
                    result.failed += 1;
                    result.failures.push(FeeFailure {
                        index,
                        fee_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(fees)
    }

    /// Sync every registered patron
    pub fn sync_all(&self, options: SyncOptions) -> Result<SyncResult> {
        let users = self.repository.list_users()?;
        Ok(self.sync_users(&users, options, |_| {}))
    }

    /// Sync the given patrons in order, calling `on_done` after each one
    ///
    /// A patron whose sync fails gets a result with `error` set; the rest
    /// still run.
    pub fn sync_users(
        &self,
        users: &[LocalUser],
        options: SyncOptions,
        mut on_done: impl FnMut(&UserSyncResult),
    ) -> SyncResult {
        let mut sync_result = SyncResult::default();

        for user in users {
            let result = self.sync_user(user, options).unwrap_or_else(|e| {
                let mut failed = UserSyncResult::new(user, self.source.name(), options.dry_run);
                failed.error = Some(format!("{:#}", e));
                failed
            });
            on_done(&result);
            sync_result.results.push(result);
        }

        sync_result
    }

    /// Register a patron by looking them up in the fee source
    ///
    /// The local id comes from the patron's UNIV_ID identifier.
    pub fn register_user_from_source(&self, primary_id: &str) -> Result<LocalUser> {
        if !self.source.can_find_users() {
            return Err(Error::validation(format!(
                "The {} source cannot look up patrons",
                self.source.name()
            ))
            .into());
        }

        let source_user = self
            .source
            .find_user(primary_id)?
            .ok_or_else(|| Error::not_found(format!("Patron {} not found", primary_id)))?;
        let user = source_user.to_local_user().ok_or_else(|| {
            Error::not_found(format!("Patron {} has no UNIV_ID identifier", primary_id))
        })?;

        self.repository.upsert_user(&user)?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::demo::DemoFeeSource;
    use crate::adapters::json_source::JsonFeeSource;
    use crate::domain::FeeStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(source: Arc<dyn FeeSource>) -> (TempDir, Arc<DuckDbRepository>, FeeSyncService) {
        let temp_dir = TempDir::new().unwrap();
        let repo =
            Arc::new(DuckDbRepository::new(&temp_dir.path().join("test.duckdb")).unwrap());
        repo.ensure_schema().unwrap();
        let service = FeeSyncService::new(Arc::clone(&repo), source);
        (temp_dir, repo, service)
    }

    #[test]
    fn test_parse_error_policy_from_str() {
        assert_eq!("skip".parse::<ParseErrorPolicy>().unwrap(), ParseErrorPolicy::Skip);
        assert_eq!("ABORT".parse::<ParseErrorPolicy>().unwrap(), ParseErrorPolicy::Abort);
        assert!("ignore".parse::<ParseErrorPolicy>().is_err());
    }

    #[test]
    fn test_demo_sync_records_run() {
        let (_dir, repo, service) = setup(Arc::new(DemoFeeSource::new()));
        let user = LocalUser::new("900000001", "demo-patron-1");

        let result = service.sync_user(&user, SyncOptions::default()).unwrap();
        assert_eq!(result.seen, 2);
        assert_eq!(result.created, 2);
        assert_eq!(result.staled, 0);

        let runs = repo.get_recent_sync_runs(5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].fees_created, 2);
        assert_eq!(runs[0].source, "demo");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (_dir, repo, service) = setup(Arc::new(DemoFeeSource::new()));
        let user = LocalUser::new("900000001", "demo-patron-1");

        let options = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = service.sync_user(&user, options).unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(repo.get_fee_count().unwrap(), 0);
        assert!(repo.get_recent_sync_runs(5).unwrap().is_empty());
    }

    #[test]
    fn test_skip_and_abort_policies() {
        let source = JsonFeeSource::from_value(json!([
            { "id": "good", "status": { "value": "ACTIVE" }, "balance": 1.0 },
            { "id": "bad", "creation_time": "not a time" }
        ]))
        .unwrap();
        let (_dir, repo, service) = setup(Arc::new(source));
        let user = LocalUser::new("1", "p1");

        let abort = SyncOptions {
            parse_errors: ParseErrorPolicy::Abort,
            ..Default::default()
        };
        let err = service.sync_user(&user, abort).unwrap_err();
        assert!(format!("{:#}", err).contains("bad"));
        assert_eq!(repo.get_fee_count().unwrap(), 0);

        let result = service.sync_user(&user, SyncOptions::default()).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].fee_id.as_deref(), Some("bad"));
        assert_eq!(repo.get_fee_count().unwrap(), 1);
    }

    #[test]
    fn test_primary_id_mismatch_is_a_warning() {
        let source = JsonFeeSource::from_value(json!([
            { "id": "1", "user_primary_id": { "value": "someone-else" } }
        ]))
        .unwrap();
        let (_dir, repo, service) = setup(Arc::new(source));
        let user = LocalUser::new("1", "p1");

        let result = service.sync_user(&user, SyncOptions::default()).unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.warnings.len(), 1);

        let fees = repo.get_fees_for_user(&user, None).unwrap();
        assert_eq!(fees[0].user_primary_id, "p1");
    }

    #[test]
    fn test_empty_source_stales_everything() {
        let (_dir, repo, service) = setup(Arc::new(DemoFeeSource::new()));
        let user = LocalUser::new("900000001", "demo-patron-1");
        service.sync_user(&user, SyncOptions::default()).unwrap();

        let empty = JsonFeeSource::from_value(json!([])).unwrap();
        let service = FeeSyncService::new(Arc::clone(&repo), Arc::new(empty));
        let result = service.sync_user(&user, SyncOptions::default()).unwrap();
        assert_eq!(result.seen, 0);
        assert_eq!(result.staled, 2);
        assert!(repo
            .get_fees_for_user(&user, None)
            .unwrap()
            .iter()
            .all(|f| f.fee_status == FeeStatus::Stale));
    }

    #[test]
    fn test_shared_local_id_only_stales_synced_patron() {
        let source = JsonFeeSource::from_value(json!({
            "users": [
                { "primary_id": "p1", "fees": [ { "id": "A", "status": { "value": "ACTIVE" } } ] },
                { "primary_id": "p2", "fees": [ { "id": "B", "status": { "value": "ACTIVE" } } ] }
            ]
        }))
        .unwrap();
        let (_dir, repo, service) = setup(Arc::new(source));
        let p1 = LocalUser::new("Y", "p1");
        let p2 = LocalUser::new("Y", "p2");

        service.sync_user(&p2, SyncOptions::default()).unwrap();
        let result = service.sync_user(&p1, SyncOptions::default()).unwrap();

        assert_eq!(result.staled, 0);
        assert_eq!(
            repo.find_fee("B", "p2").unwrap().unwrap().fee_status,
            FeeStatus::Active
        );
    }

    #[test]
    fn test_failed_write_rolls_back_stale_marking() {
        let (_dir, repo, service) = setup(Arc::new(DemoFeeSource::new()));
        let user = LocalUser::new("900000001", "demo-patron-1");
        service.sync_user(&user, SyncOptions::default()).unwrap();
        assert_eq!(repo.get_active_fees(&user).unwrap().len(), 2);

        // parses fine but does not fit the amount column
        let oversized = JsonFeeSource::from_value(json!([
            { "id": "new-1", "status": { "value": "ACTIVE" }, "balance": "100000000000000000000" }
        ]))
        .unwrap();
        let failing = FeeSyncService::new(Arc::clone(&repo), Arc::new(oversized));
        assert!(failing.sync_user(&user, SyncOptions::default()).is_err());

        assert_eq!(repo.get_active_fees(&user).unwrap().len(), 2);
        assert!(repo.find_fee("new-1", "demo-patron-1").unwrap().is_none());
        assert_eq!(repo.get_recent_sync_runs(10).unwrap().len(), 1);
    }

    #[test]
    fn test_register_user_from_source() {
        let (_dir, repo, service) = setup(Arc::new(DemoFeeSource::new()));

        let user = service.register_user_from_source("demo-patron-2").unwrap();
        assert_eq!(user.yorku_id, "900000002");
        assert!(repo.get_user_by_username("demo-patron-2").unwrap().is_some());

        assert!(service.register_user_from_source("nobody").is_err());
    }

    #[test]
    fn test_register_needs_lookup_support() {
        let source = JsonFeeSource::from_value(json!([])).unwrap();
        let (_dir, _repo, service) = setup(Arc::new(source));
        assert!(service.register_user_from_source("p1").is_err());
    }

    #[test]
    fn test_sync_all_continues_after_failure() {
        let source = JsonFeeSource::from_value(json!({
            "users": [
                { "primary_id": "a", "fees": [ { "id": "a1" } ] },
                { "primary_id": "b", "fees": [ { "id": "b1", "balance": "lots" } ] },
                { "primary_id": "c", "fees": [ { "id": "c1" }, { "id": "c2" } ] }
            ]
        }))
        .unwrap();
        let (_dir, repo, service) = setup(Arc::new(source));
        for (id, name) in [("1", "a"), ("2", "b"), ("3", "c")] {
            repo.upsert_user(&LocalUser::new(id, name)).unwrap();
        }

        let options = SyncOptions {
            parse_errors: ParseErrorPolicy::Abort,
            ..Default::default()
        };
        let mut done = Vec::new();
        let users = repo.list_users().unwrap();
        let result = service.sync_users(&users, options, |r| done.push(r.username.clone()));

        assert_eq!(done, vec!["a", "b", "c"]);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(result.total_created(), 3);
    }
}
