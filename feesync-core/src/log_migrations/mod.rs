//! Event log migrations, applied to logs.duckdb by the logging service
//!
//! Kept apart from the fee database migrations so the log can be deleted or
//! copied without touching patron data.

/// (file name, SQL) in application order
pub const LOG_MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
];
