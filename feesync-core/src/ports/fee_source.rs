//! Upstream fee source port
//!
//! Defines the interface for fetching a patron's fees from Alma (or anything
//! that speaks its payload format: exported response documents, demo data).

use crate::domain::result::Result;
use crate::domain::{FeeRecord, SourceUser};

/// Fees reported for one patron
#[derive(Debug, Default)]
pub struct FetchFeesResult {
    pub fees: Vec<FeeRecord>,
    /// Non-fatal problems encountered while fetching (e.g. entries that were
    /// not JSON objects)
    pub warnings: Vec<String>,
}

/// Fee source trait
///
/// Implementations hand back raw Alma fee records; parsing and reconciling
/// them is the sync service's job.
pub trait FeeSource: Send + Sync {
    /// Source name (e.g., "json", "demo")
    fn name(&self) -> &str;

    /// Fetch every fee Alma currently reports for a patron
    ///
    /// An unknown patron yields an empty result, not an error.
    fn get_user_fees(&self, primary_id: &str) -> Result<FetchFeesResult>;

    /// Whether this source can look patrons up
    fn can_find_users(&self) -> bool {
        false
    }

    /// Look up a patron by Alma primary id
    fn find_user(&self, _primary_id: &str) -> Result<Option<SourceUser>> {
        Ok(None)
    }
}
