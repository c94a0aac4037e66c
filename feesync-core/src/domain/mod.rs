//! Core domain entities
//!
//! Fees, patrons and the Alma payload parser. These are pure data structures
//! and transformations - no I/O or external dependencies.

mod fee;
pub mod fee_record;
mod sync_run;
mod user;
pub mod result;

pub use fee::{Fee, FeeStatus, FeeUpdate};
pub use fee_record::{get_val, parse_alma_fee, FeeRecord, FieldValue};
pub use sync_run::SyncRun;
pub use user::{CodeValue, LocalUser, SourceUser, UserIdentifier};
