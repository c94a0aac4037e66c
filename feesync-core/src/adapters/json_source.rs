//! JSON document fee source
//!
//! Reads fees from Alma response bodies saved to disk (or piped in). Three
//! shapes are accepted:
//!
//! - a fees response: `{"fee": [...], "total_record_count": N}`
//! - a bare array of fee records: `[...]`
//! - a multi-patron document:
//!   `{"users": [{"primary_id": "..", "user_identifier": [..], "fees": <fees response or array>}]}`
//!
//! The first two describe a single patron and are served for whichever
//! primary id is requested.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde_json::Value as JsonValue;

use crate::domain::result::{Error, Result};
use crate::domain::{FeeRecord, SourceUser};
use crate::ports::{FeeSource, FetchFeesResult};

#[derive(Debug, Clone)]
struct PatronEntry {
    user: SourceUser,
    fees: Vec<JsonValue>,
}

#[derive(Debug, Clone)]
enum Document {
    SinglePatron(Vec<JsonValue>),
    MultiPatron(HashMap<String, PatronEntry>),
}

/// Fee source backed by a parsed JSON document
#[derive(Debug, Clone)]
pub struct JsonFeeSource {
    document: Document,
}

impl JsonFeeSource {
    /// Build from an already parsed JSON value
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let document = match value {
            JsonValue::Object(mut obj) if obj.contains_key("users") => {
                let users = match obj.remove("users") {
                    Some(JsonValue::Array(users)) => users,
                    _ => return Err(Error::validation("'users' must be an array")),
                };
                let mut patrons = HashMap::new();
                for mut entry in users {
                    let fees = entry
                        .as_object_mut()
                        .and_then(|o| o.remove("fees"))
                        .map(fee_list)
                        .transpose()?
                        .unwrap_or_default();
                    let user: SourceUser = serde_json::from_value(entry)?;
                    patrons.insert(user.primary_id.clone(), PatronEntry { user, fees });
                }
                Document::MultiPatron(patrons)
            }
            other => Document::SinglePatron(fee_list(other)?),
        };
        Ok(Self { document })
    }

    /// Parse a JSON document from a string
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Read a JSON document from any reader (e.g. stdin)
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Self::from_value(serde_json::from_reader(reader)?)
    }

    /// Read a JSON document from a file
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Whether the document holds fees for more than one named patron
    pub fn is_multi_patron(&self) -> bool {
        matches!(self.document, Document::MultiPatron(_))
    }

    /// Primary ids of the patrons in a multi-patron document
    pub fn primary_ids(&self) -> Vec<String> {
        match &self.document {
            Document::SinglePatron(_) => Vec::new(),
            Document::MultiPatron(patrons) => {
                let mut ids: Vec<String> = patrons.keys().cloned().collect();
                ids.sort();
                ids
            }
        }
    }
}

/// Pull the list of fee records out of a fees response or bare array
fn fee_list(value: JsonValue) -> Result<Vec<JsonValue>> {
    match value {
        JsonValue::Array(fees) => Ok(fees),
        // Alma leaves out "fee" entirely when the patron owes nothing
        JsonValue::Object(mut obj) => match obj.remove("fee") {
            Some(JsonValue::Array(fees)) => Ok(fees),
            Some(single @ JsonValue::Object(_)) => Ok(vec![single]),
            Some(JsonValue::Null) | None => Ok(Vec::new()),
            Some(_) => Err(Error::validation("'fee' must be an array of objects")),
        },
        JsonValue::Null => Ok(Vec::new()),
        _ => Err(Error::validation(
            "expected a fees response object or an array of fees",
        )),
    }
}

fn to_records(fees: &[JsonValue]) -> FetchFeesResult {
    let mut result = FetchFeesResult::default();
    for (index, fee) in fees.iter().enumerate() {
        match fee {
            JsonValue::Object(record) => result.fees.push(FeeRecord::clone(record)),
            other => result.warnings.push(format!(
                "Skipping fee entry {}: expected an object, got {}",
                index,
                json_kind(other)
            )),
        }
    }
    result
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

impl FeeSource for JsonFeeSource {
    fn name(&self) -> &str {
        "json"
    }

    fn get_user_fees(&self, primary_id: &str) -> Result<FetchFeesResult> {
        match &self.document {
            Document::SinglePatron(fees) => Ok(to_records(fees)),
            Document::MultiPatron(patrons) => Ok(patrons
                .get(primary_id)
                .map(|p| to_records(&p.fees))
                .unwrap_or_default()),
        }
    }

    fn can_find_users(&self) -> bool {
        self.is_multi_patron()
    }

    fn find_user(&self, primary_id: &str) -> Result<Option<SourceUser>> {
        match &self.document {
            Document::SinglePatron(_) => Ok(None),
            Document::MultiPatron(patrons) => Ok(patrons.get(primary_id).map(|p| p.user.clone())),
        }
    }
}
