//! Patron models: the local account and its Alma counterpart

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alma identifier type carrying the university id
pub const UNIV_ID_TYPE: &str = "UNIV_ID";

/// A patron known to the local system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Local patron id
    pub yorku_id: String,
    /// Alma primary id
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl LocalUser {
    pub fn new(yorku_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            yorku_id: yorku_id.into(),
            username: username.into(),
            created_at: Utc::now(),
        }
    }

    /// The id Alma knows this patron by
    pub fn primary_id(&self) -> &str {
        &self.username
    }
}

/// `{"value": .., "desc": ..}` pair used throughout Alma payloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeValue {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
}

/// One entry of an Alma user's `user_identifier` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentifier {
    #[serde(default)]
    pub id_type: CodeValue,
    pub value: String,
}

/// Patron record as returned by Alma
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUser {
    pub primary_id: String,
    #[serde(default)]
    pub user_identifier: Vec<UserIdentifier>,
}

impl SourceUser {
    /// University id from the identifier list, if Alma has one on file
    pub fn univ_id(&self) -> Option<&str> {
        self.user_identifier
            .iter()
            .find(|i| i.id_type.value.as_deref() == Some(UNIV_ID_TYPE))
            .map(|i| i.value.as_str())
    }

    /// Build the local user this patron maps to
    pub fn to_local_user(&self) -> Option<LocalUser> {
        self.univ_id()
            .map(|univ_id| LocalUser::new(univ_id, self.primary_id.clone()))
    }
}
