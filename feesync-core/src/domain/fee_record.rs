//! Alma fee payloads
//!
//! Alma returns fees as loosely structured JSON: scalars for amounts and
//! timestamps, `{"value", "desc"}` pairs for coded fields, and keys that come
//! and go between API versions. Everything here tolerates missing keys and
//! ignores unknown ones; only values that are present but unusable (a
//! timestamp that does not parse, an amount that is not a number) fail.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value as JsonValue};

use super::fee::{Fee, FeeStatus};
use super::result::{Error, Result};
use super::user::LocalUser;

/// One fee as deserialized from an Alma response
pub type FeeRecord = Map<String, JsonValue>;

/// Placeholder for a coded field whose parent key is missing
pub const NOT_AVAILABLE: &str = "n/a";

/// Sub-key holding the code of a `{"value", "desc"}` pair
pub const VALUE_KEY: &str = "value";

/// Sub-key holding the human readable label of a `{"value", "desc"}` pair
pub const DESC_KEY: &str = "desc";

/// A value pulled out of a fee record by [`get_val`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Value(&'a JsonValue),
    /// A sub-key was asked for but the parent key is missing
    NotAvailable,
}

impl<'a> FieldValue<'a> {
    /// Render as text: strings verbatim, other scalars via their JSON form
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::NotAvailable => Some(NOT_AVAILABLE.to_string()),
            FieldValue::Value(JsonValue::String(s)) => Some(s.clone()),
            FieldValue::Value(JsonValue::Number(n)) => Some(n.to_string()),
            FieldValue::Value(JsonValue::Bool(b)) => Some(b.to_string()),
            FieldValue::Value(_) => None,
        }
    }

    /// Interpret as a decimal amount (JSON number or numeric string)
    pub fn as_decimal(&self) -> Result<Decimal> {
        let text = match self {
            FieldValue::Value(JsonValue::Number(n)) => n.to_string(),
            FieldValue::Value(JsonValue::String(s)) => s.trim().to_string(),
            other => return Err(Error::parse(format!("expected an amount, got {:?}", other))),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| Error::parse(format!("invalid amount '{}': {}", text, e)))
    }

    /// Interpret as an ISO-8601 timestamp; an empty string means no timestamp
    pub fn as_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        match self {
            FieldValue::Value(JsonValue::String(s)) if s.trim().is_empty() => Ok(None),
            FieldValue::Value(JsonValue::String(s)) => parse_timestamp(s).map(Some),
            other => Err(Error::parse(format!("expected a timestamp, got {:?}", other))),
        }
    }
}

/// Look up `key` in a fee record, optionally descending into `sub_key`.
///
/// - key present: the value (or its `sub_key` entry when one is given; a
///   missing entry or a non-object parent yields `None`)
/// - key missing with a `sub_key`: [`FieldValue::NotAvailable`]
/// - key missing without a `sub_key`: `None`
///
/// JSON `null` is treated the same as a missing key.
pub fn get_val<'a>(
    record: &'a FeeRecord,
    key: &str,
    sub_key: Option<&str>,
) -> Option<FieldValue<'a>> {
    match (record.get(key).filter(|v| !v.is_null()), sub_key) {
        (Some(value), None) => Some(FieldValue::Value(value)),
        (Some(value), Some(sub)) => value
            .as_object()
            .and_then(|nested| nested.get(sub))
            .filter(|v| !v.is_null())
            .map(FieldValue::Value),
        (None, Some(_)) => Some(FieldValue::NotAvailable),
        (None, None) => None,
    }
}

/// Text of `key` (or `key.sub_key`), following [`get_val`]'s rules
pub fn get_text(record: &FeeRecord, key: &str, sub_key: Option<&str>) -> Option<String> {
    get_val(record, key, sub_key).and_then(|v| v.as_text())
}

fn get_decimal(record: &FeeRecord, key: &str) -> Result<Option<Decimal>> {
    get_val(record, key, None)
        .map(|v| v.as_decimal())
        .transpose()
        .map_err(|e| Error::parse(format!("{}: {}", key, e)))
}

fn get_timestamp(record: &FeeRecord, key: &str) -> Result<Option<DateTime<Utc>>> {
    match get_val(record, key, None) {
        Some(v) => v
            .as_timestamp()
            .map_err(|e| Error::parse(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::parse(format!("invalid timestamp '{}': {}", s, e)))
}

/// Primary id Alma reports in the fee's user block, if any
pub fn payload_primary_id(record: &FeeRecord) -> Option<String> {
    match get_val(record, "user_primary_id", Some(VALUE_KEY))? {
        FieldValue::NotAvailable => None,
        value => value.as_text(),
    }
}

/// Convert one Alma fee record into a [`Fee`] owned by `user`.
///
/// The patron identity always comes from `user`; the record's own
/// `user_primary_id` block is never used for keying.
pub fn parse_alma_fee(record: &FeeRecord, user: &LocalUser) -> Result<Fee> {
    let fee_id = get_text(record, "id", None)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::parse("fee record has no id"))?;

    let status = get_text(record, "status", Some(VALUE_KEY))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let mut fee = Fee::new(
        fee_id,
        user.username.clone(),
        user.yorku_id.clone(),
        FeeStatus::from(status.as_str()),
    );

    fee.fee_type = get_text(record, "type", Some(VALUE_KEY));
    fee.fee_description = get_text(record, "type", Some(DESC_KEY));

    fee.balance = get_decimal(record, "balance")?;
    fee.remaining_vat_amount = get_decimal(record, "remaining_vat_amount")?;
    fee.original_amount = get_decimal(record, "original_amount")?;
    fee.original_vat_amount = get_decimal(record, "original_vat_amount")?;

    fee.creation_time = get_timestamp(record, "creation_time")?;
    fee.status_time = get_timestamp(record, "status_time")?;

    fee.owner_id = get_text(record, "owner", Some(VALUE_KEY));
    fee.owner_description = get_text(record, "owner", Some(DESC_KEY));

    fee.item_title = get_text(record, "title", None);
    fee.item_barcode = get_text(record, "barcode", Some(VALUE_KEY));
    fee.comment = get_text(record, "comment", None);

    Ok(fee)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    pub(crate) fn fee_sample() -> FeeRecord {
        let value = json!({
            "id": "12345678910",
            "type": { "value": "OVERDUEFINE", "desc": "Overdue fine" },
            "status": { "value": "ACTIVE", "desc": "Active" },
            "user_primary_id": { "value": "12345678910", "link": "https://something.com" },
            "balance": 3.0,
            "remaining_vat_amount": 0.0,
            "original_amount": 3.0,
            "original_vat_amount": 0.0,
            "creation_time": "2010-10-27T10:59:00Z",
            "status_time": "2019-05-30T02:01:11Z",
            "comment": "CALL_ITEMNUM: QP 355.2 P76 2000 | ITEM_COPYNUM: 4 | USER_ALT_ID: 123456789",
            "owner": { "value": "SCOTT", "desc": "Scott Library" },
            "title": "Principles of neural science / edited by Eric R. Kandel, James H. Schwartz, Thomas M. Jessell ; art direction by Sarah Mack and Jane Dodd.",
            "barcode": { "value": "39007047016860", "link": "https://something.com" },
            "link": "https://something.com"
        });
        match value {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_get_val_nested_and_scalar() {
        let record = fee_sample();

        assert_eq!(
            get_text(&record, "status", Some("value")).as_deref(),
            Some("ACTIVE")
        );
        assert_eq!(
            get_val(&record, "balance", None),
            Some(FieldValue::Value(&json!(3.0)))
        );
    }

    #[test]
    fn test_get_val_missing_key() {
        let record = fee_sample();

        assert_eq!(
            get_val(&record, "something_else", Some("value")),
            Some(FieldValue::NotAvailable)
        );
        assert_eq!(
            get_text(&record, "something_else", Some("value")).as_deref(),
            Some("n/a")
        );
        assert_eq!(get_val(&record, "something_else", None), None);
    }

    #[test]
    fn test_get_val_missing_sub_key() {
        let record = fee_sample();
        assert_eq!(get_val(&record, "barcode", Some("desc")), None);
        // scalar parent cannot be descended into
        assert_eq!(get_val(&record, "title", Some("value")), None);
    }

    #[test]
    fn test_get_val_null_is_missing() {
        let mut record = fee_sample();
        record.insert("title".to_string(), JsonValue::Null);
        assert_eq!(get_val(&record, "title", None), None);
    }

    #[test]
    fn test_parse_alma_fee() {
        let record = fee_sample();
        let user = LocalUser::new("10101010", "12345678910");

        let fee = parse_alma_fee(&record, &user).unwrap();

        assert_eq!(fee.yorku_id, user.yorku_id);
        assert_eq!(fee.user_primary_id, user.username);
        assert_eq!(fee.fee_id, "12345678910");
        assert_eq!(fee.fee_type.as_deref(), Some("OVERDUEFINE"));
        assert_eq!(fee.fee_description.as_deref(), Some("Overdue fine"));
        assert_eq!(fee.fee_status, FeeStatus::Active);
        assert_eq!(fee.balance, Some(Decimal::new(3, 0)));
        assert_eq!(fee.remaining_vat_amount, Some(Decimal::ZERO));
        assert_eq!(fee.original_amount, Some(Decimal::new(3, 0)));
        assert_eq!(fee.original_vat_amount, Some(Decimal::ZERO));
        assert_eq!(
            fee.creation_time,
            Some(Utc.with_ymd_and_hms(2010, 10, 27, 10, 59, 0).unwrap())
        );
        assert_eq!(
            fee.status_time,
            Some(Utc.with_ymd_and_hms(2019, 5, 30, 2, 1, 11).unwrap())
        );
        assert_eq!(fee.owner_id.as_deref(), Some("SCOTT"));
        assert_eq!(fee.owner_description.as_deref(), Some("Scott Library"));
        assert!(fee.item_title.as_deref().unwrap().starts_with("Principles of neural science"));
        assert_eq!(fee.item_barcode.as_deref(), Some("39007047016860"));
        assert!(fee.comment.is_some());
    }

    #[test]
    fn test_identity_comes_from_local_user() {
        let record = fee_sample();
        let user = LocalUser::new("555", "someone-else");

        let fee = parse_alma_fee(&record, &user).unwrap();

        assert_eq!(fee.user_primary_id, "someone-else");
        assert_eq!(fee.yorku_id, "555");
        assert_eq!(payload_primary_id(&record).as_deref(), Some("12345678910"));
    }

    #[test]
    fn test_partial_payload() {
        let mut record = FeeRecord::new();
        record.insert("id".to_string(), json!(42));
        let user = LocalUser::new("1", "p");

        let fee = parse_alma_fee(&record, &user).unwrap();

        assert_eq!(fee.fee_id, "42");
        assert_eq!(fee.fee_type.as_deref(), Some("n/a"));
        assert_eq!(fee.owner_id.as_deref(), Some("n/a"));
        assert_eq!(fee.item_barcode.as_deref(), Some("n/a"));
        assert_eq!(fee.fee_status, FeeStatus::Other("n/a".to_string()));
        assert!(fee.item_title.is_none());
        assert!(fee.balance.is_none());
        assert!(fee.creation_time.is_none());
        assert!(payload_primary_id(&record).is_none());
    }

    #[test]
    fn test_malformed_timestamp_fails() {
        let mut record = fee_sample();
        record.insert("status_time".to_string(), json!("yesterday-ish"));
        let user = LocalUser::new("1", "p");

        let err = parse_alma_fee(&record, &user).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("status_time"));
    }

    #[test]
    fn test_malformed_amount_fails() {
        let mut record = fee_sample();
        record.insert("balance".to_string(), json!({ "value": 3 }));
        let user = LocalUser::new("1", "p");

        assert!(parse_alma_fee(&record, &user).is_err());
    }

    #[test]
    fn test_missing_id_fails() {
        let mut record = fee_sample();
        record.remove("id");
        let user = LocalUser::new("1", "p");

        assert!(parse_alma_fee(&record, &user).is_err());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut record = fee_sample();
        record.insert("creation_time_time".to_string(), json!("2019-06-30T02:01:11Z"));
        let user = LocalUser::new("1", "p");

        let fee = parse_alma_fee(&record, &user).unwrap();
        assert_eq!(
            fee.creation_time,
            Some(Utc.with_ymd_and_hms(2010, 10, 27, 10, 59, 0).unwrap())
        );
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(parse_timestamp("2019-05-30T02:01:11Z").is_ok());
        assert!(parse_timestamp("2019-05-30T02:01:11.123-04:00").is_ok());
        assert_eq!(
            parse_timestamp("2019-05-30T02:01:11").unwrap(),
            Utc.with_ymd_and_hms(2019, 5, 30, 2, 1, 11).unwrap()
        );
        assert!(parse_timestamp("30/05/2019").is_err());
    }

    #[test]
    fn test_amount_from_string() {
        let v = json!("12.50");
        assert_eq!(
            FieldValue::Value(&v).as_decimal().unwrap(),
            Decimal::new(1250, 2)
        );
    }
}
