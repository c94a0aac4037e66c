//! Demo fee source
//!
//! Serves a fixed set of patrons and fees shaped exactly like Alma's
//! responses, so the whole sync path can be exercised without an Alma tenant:
//! - "demo-patron-1": two active fines at Scott Library
//! - "demo-patron-2": one lost item replacement fee
//! - "demo-patron-3": nothing owed

use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};

use crate::domain::result::Result;
use crate::domain::{FeeRecord, SourceUser};
use crate::ports::{FeeSource, FetchFeesResult};

/// Demo patrons as (primary id, university id)
pub const DEMO_PATRONS: &[(&str, &str)] = &[
    ("demo-patron-1", "900000001"),
    ("demo-patron-2", "900000002"),
    ("demo-patron-3", "900000003"),
];

/// Demo fee source
#[derive(Debug, Default)]
pub struct DemoFeeSource;

impl DemoFeeSource {
    pub fn new() -> Self {
        Self
    }
}

#[allow(clippy::too_many_arguments)]
fn demo_fee(
    id: &str,
    primary_id: &str,
    (fee_type, fee_desc): (&str, &str),
    amount: f64,
    days_ago: i64,
    (owner, owner_desc): (&str, &str),
    title: &str,
    barcode: &str,
) -> JsonValue {
    let created = Utc::now() - Duration::days(days_ago);
    json!({
        "id": id,
        "type": { "value": fee_type, "desc": fee_desc },
        "status": { "value": "ACTIVE", "desc": "Active" },
        "user_primary_id": { "value": primary_id, "link": format!("https://api.example.org/almaws/v1/users/{}", primary_id) },
        "balance": amount,
        "remaining_vat_amount": 0.0,
        "original_amount": amount,
        "original_vat_amount": 0.0,
        "creation_time": created.to_rfc3339_opts(SecondsFormat::Secs, true),
        "status_time": created.to_rfc3339_opts(SecondsFormat::Secs, true),
        "owner": { "value": owner, "desc": owner_desc },
        "title": title,
        "barcode": { "value": barcode, "link": "https://api.example.org/almaws/v1/items" },
        "link": format!("https://api.example.org/almaws/v1/users/{}/fees/{}", primary_id, id)
    })
}

/// Fee records for a demo patron (empty for anyone else)
pub fn generate_demo_fees(primary_id: &str) -> Vec<FeeRecord> {
    let fees = match primary_id {
        "demo-patron-1" => vec![
            demo_fee(
                "demo-fee-0001",
                primary_id,
                ("OVERDUEFINE", "Overdue fine"),
                3.0,
                21,
                ("SCOTT", "Scott Library"),
                "Principles of neural science",
                "39007047016860",
            ),
            demo_fee(
                "demo-fee-0002",
                primary_id,
                ("RECALLEDOVERDUEFINE", "Recalled overdue fine"),
                12.5,
                7,
                ("SCOTT", "Scott Library"),
                "The C programming language",
                "39007051234567",
            ),
        ],
        "demo-patron-2" => vec![demo_fee(
            "demo-fee-0003",
            primary_id,
            ("LOSTITEMREPLACEMENTFEE", "Lost item replacement fee"),
            95.0,
            60,
            ("STEACIE", "Steacie Science and Engineering Library"),
            "Introduction to algorithms",
            "39007049876543",
        )],
        _ => Vec::new(),
    };

    fees.into_iter()
        .filter_map(|f| match f {
            JsonValue::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

impl FeeSource for DemoFeeSource {
    fn name(&self) -> &str {
        "demo"
    }

    fn get_user_fees(&self, primary_id: &str) -> Result<FetchFeesResult> {
        Ok(FetchFeesResult {
            fees: generate_demo_fees(primary_id),
            warnings: Vec::new(),
        })
    }

    fn can_find_users(&self) -> bool {
        true
    }

    fn find_user(&self, primary_id: &str) -> Result<Option<SourceUser>> {
        let user: Option<SourceUser> = DEMO_PATRONS
            .iter()
            .find(|(id, _)| *id == primary_id)
            .map(|(id, univ_id)| {
                serde_json::from_value(json!({
                    "primary_id": id,
                    "user_identifier": [
                        { "id_type": { "value": "UNIV_ID", "desc": "University ID" }, "value": univ_id }
                    ]
                }))
            })
            .transpose()?;
        Ok(user)
    }
}
