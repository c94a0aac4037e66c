//! Fee domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Status of a fee as reported by Alma.
///
/// Alma documents ACTIVE, CLOSED, EXPORTED, INDISPUTE and friends; we only
/// give names to the ones the sync logic cares about and carry every other
/// value through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeeStatus {
    Active,
    Stale,
    Paid,
    Other(String),
}

impl FeeStatus {
    pub const ACTIVE: &'static str = "ACTIVE";
    pub const STALE: &'static str = "STALE";
    pub const PAID: &'static str = "PAID";

    pub fn as_str(&self) -> &str {
        match self {
            FeeStatus::Active => Self::ACTIVE,
            FeeStatus::Stale => Self::STALE,
            FeeStatus::Paid => Self::PAID,
            FeeStatus::Other(s) => s,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, FeeStatus::Active)
    }
}

impl From<&str> for FeeStatus {
    fn from(value: &str) -> Self {
        match value {
            Self::ACTIVE => FeeStatus::Active,
            Self::STALE => FeeStatus::Stale,
            Self::PAID => FeeStatus::Paid,
            other => FeeStatus::Other(other.to_string()),
        }
    }
}

impl FromStr for FeeStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(FeeStatus::from(s))
    }
}

impl fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FeeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FeeStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FeeStatus::from(s.as_str()))
    }
}

/// A patron fee (fine or charge) mirrored from Alma
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    /// Local row id
    pub id: Uuid,
    /// Alma fee id, stable across syncs
    pub fee_id: String,
    /// Alma primary id of the patron (local username)
    pub user_primary_id: String,
    /// Local patron id, denormalized from the owning user
    pub yorku_id: String,

    pub fee_type: Option<String>,
    pub fee_description: Option<String>,
    pub fee_status: FeeStatus,

    pub balance: Option<Decimal>,
    pub remaining_vat_amount: Option<Decimal>,
    pub original_amount: Option<Decimal>,
    pub original_vat_amount: Option<Decimal>,

    pub creation_time: Option<DateTime<Utc>>,
    pub status_time: Option<DateTime<Utc>>,

    pub owner_id: Option<String>,
    pub owner_description: Option<String>,

    pub item_title: Option<String>,
    pub item_barcode: Option<String>,
    /// Free text Alma attaches to the fee (call number, copy, alt id)
    pub comment: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fee {
    /// Create a fee with only its identity filled in
    pub fn new(
        fee_id: impl Into<String>,
        user_primary_id: impl Into<String>,
        yorku_id: impl Into<String>,
        fee_status: FeeStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            fee_id: fee_id.into(),
            user_primary_id: user_primary_id.into(),
            yorku_id: yorku_id.into(),
            fee_type: None,
            fee_description: None,
            fee_status,
            balance: None,
            remaining_vat_amount: None,
            original_amount: None,
            original_vat_amount: None,
            creation_time: None,
            status_time: None,
            owner_id: None,
            owner_description: None,
            item_title: None,
            item_barcode: None,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The subset of this fee that may change after the row exists
    pub fn to_update(&self) -> FeeUpdate {
        FeeUpdate {
            balance: self.balance,
            remaining_vat_amount: self.remaining_vat_amount,
            fee_status: self.fee_status.clone(),
            status_time: self.status_time,
        }
    }
}

/// Mutable fields of a persisted fee.
///
/// Everything else on [`Fee`] is fixed when the row is first inserted, and the
/// repository only accepts this struct when updating an existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeUpdate {
    pub balance: Option<Decimal>,
    pub remaining_vat_amount: Option<Decimal>,
    pub fee_status: FeeStatus,
    pub status_time: Option<DateTime<Utc>>,
}
