//! Author model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Author row as exchanged by the import/export pipeline.
///
/// Authors are matched case-insensitively by trimmed name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub is_fictional: Option<bool>,
    pub birth_date: Option<String>,
    pub birth_location: Option<String>,
    pub death_date: Option<String>,
    pub death_location: Option<String>,
    pub job: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Social links, stored as JSON text
    pub socials: Option<Value>,
    pub views_count: Option<i64>,
    pub likes_count: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl AuthorRecord {
    /// Author carrying only a name, used for implicit creation
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}
