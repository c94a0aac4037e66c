//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod logging;
pub mod migration;
mod reconcile;
mod status;
mod sync;
mod user;

pub use logging::{EntryPoint, EventCount, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use reconcile::{FeeReconciler, UpsertOutcome};
pub use status::{RunSummary, StatusCount, StatusService, StatusSummary};
pub use sync::{
    FeeFailure, FeeSyncService, ParseErrorPolicy, SyncOptions, SyncResult, UserSyncResult,
};
pub use user::UserService;
