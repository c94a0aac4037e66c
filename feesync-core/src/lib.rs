//! Feesync Core - mirror Alma patron fees into a local DuckDB store
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Fees, patrons and the Alma payload parser
//! - **ports**: Trait definitions for external dependencies (FeeSource)
//! - **services**: Reconciliation and sync orchestration
//! - **adapters**: Concrete implementations (DuckDB, JSON documents, demo data)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::demo::DemoFeeSource;
use adapters::duckdb::DuckDbRepository;
use adapters::json_source::JsonFeeSource;
use config::{Config, SOURCE_DEMO};
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult};
pub use domain::{get_val, parse_alma_fee, Fee, FeeRecord, FeeStatus, FieldValue, LocalUser};
pub use ports::FeeSource;
pub use services::{EntryPoint, LogEvent, LoggingService};

/// Name of the fee database file in the data directory
pub const DB_FILENAME: &str = "feesync.duckdb";

/// Main context for feesync operations
///
/// Holds the configuration, the database connection and the services that
/// do not depend on a fee source.
pub struct FeeSyncContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub user_service: UserService,
    pub status_service: StatusService,
}

impl FeeSyncContext {
    /// Open the store in `data_dir`, running pending migrations
    pub fn new(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&data_dir.join(DB_FILENAME))?);
        repository.ensure_schema()?;

        let user_service = UserService::new(Arc::clone(&repository));
        let status_service = StatusService::new(Arc::clone(&repository));

        Ok(Self {
            config,
            repository,
            user_service,
            status_service,
        })
    }

    /// Fee source named in settings.json
    pub fn configured_source(&self) -> Result<Arc<dyn FeeSource>> {
        if self.config.default_source == SOURCE_DEMO {
            return Ok(Arc::new(DemoFeeSource::new()));
        }
        let path = self.config.fees_file.as_deref().ok_or_else(|| {
            Error::Config("No fees file configured (set sync.feesFile or FEESYNC_FEES_FILE)".into())
        })?;
        let source = JsonFeeSource::from_path(path)
            .with_context(|| format!("Failed to read fees file {}", path.display()))?;
        Ok(Arc::new(source))
    }

    /// Sync service over the given fee source
    pub fn sync_service(&self, source: Arc<dyn FeeSource>) -> FeeSyncService {
        FeeSyncService::new(Arc::clone(&self.repository), source)
    }

    /// Sync options from configuration
    pub fn sync_options(&self, dry_run: bool) -> SyncOptions {
        SyncOptions {
            dry_run,
            parse_errors: self.config.parse_error_policy,
        }
    }
}
