//! Fee database migrations - embedded SQL files
//!
//! Each entry is (file name, SQL). Entries are applied in list order and
//! recorded by name in sys_migrations; new files go at the end as
//! `NNN_description.sql`.

pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_initial_schema.sql", include_str!("001_initial_schema.sql")),
    ("002_sync_runs.sql", include_str!("002_sync_runs.sql")),
    (
        "003_add_username_to_sync_runs.sql",
        include_str!("003_add_username_to_sync_runs.sql"),
    ),
];
