//! Reference model
//!
//! A reference is the work a quote comes from (book, film, speech...). The
//! table is named `quote_references`; bundles call the entity `references`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accepted values for `primary_type`
pub const REFERENCE_TYPES: &[&str] = &[
    "book",
    "film",
    "tv_series",
    "music",
    "speech",
    "podcast",
    "interview",
    "documentary",
    "media_stream",
    "writings",
    "video_game",
    "other",
];

pub const DEFAULT_REFERENCE_TYPE: &str = "other";

/// Reference row as exchanged by the import/export pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub primary_type: Option<String>,
    pub secondary_type: Option<String>,
    pub original_language: Option<String>,
    pub release_date: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// External links, stored as JSON text
    pub urls: Option<Value>,
    pub views_count: Option<i64>,
    pub likes_count: Option<i64>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl ReferenceRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn primary_type_or_default(&self) -> &str {
        self.primary_type.as_deref().unwrap_or(DEFAULT_REFERENCE_TYPE)
    }
}
