//! Quote model

use serde::{Deserialize, Serialize};

use super::{AuthorRecord, ReferenceRecord};

/// Accepted values for a quote's `language`
pub const QUOTE_LANGUAGES: &[&str] = &["en", "fr", "es", "de", "it", "pt", "ru", "ja", "zh", "la"];

/// Accepted values for a quote's moderation `status`
pub const QUOTE_STATUSES: &[&str] = &["draft", "pending", "approved", "rejected"];

pub const DEFAULT_QUOTE_LANGUAGE: &str = "en";
pub const DEFAULT_QUOTE_STATUS: &str = "pending";

/// Quote text length bounds, in characters
pub const QUOTE_MIN_LENGTH: usize = 10;
pub const QUOTE_MAX_LENGTH: usize = 3000;

/// Quote row as exchanged by the import/export pipeline.
///
/// `name` holds the quote text. Foreign keys are source ids; `new_author`
/// and `new_reference` name a parent to look up or create when no id
/// resolves. `tags` carries tag names and `tag_ids` source tag ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub language: Option<String>,
    pub status: Option<String>,
    pub author_id: Option<i64>,
    pub new_author: Option<AuthorRecord>,
    pub reference_id: Option<i64>,
    pub new_reference: Option<ReferenceRecord>,
    pub user_id: Option<i64>,
    pub moderator_id: Option<i64>,
    pub moderated_at: Option<String>,
    pub rejection_reason: Option<String>,
    pub is_featured: Option<bool>,
    pub views_count: Option<i64>,
    pub likes_count: Option<i64>,
    pub shares_count: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub tag_ids: Option<Vec<i64>>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl QuoteRecord {
    pub fn language_or_default(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_QUOTE_LANGUAGE)
    }

    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or(DEFAULT_QUOTE_STATUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_record_with_nested_author() {
        let quote: QuoteRecord = serde_json::from_value(serde_json::json!({
            "name": "A quote text long enough",
            "author_id": null,
            "new_author": {"name": "Ada Lovelace"},
            "tags": ["science", "math"]
        }))
        .unwrap();

        assert!(quote.author_id.is_none());
        assert_eq!(
            quote.new_author.and_then(|a| a.name).as_deref(),
            Some("Ada Lovelace")
        );
        assert_eq!(quote.tags.map(|t| t.len()), Some(2));
        assert_eq!(quote.status.as_deref().unwrap_or(DEFAULT_QUOTE_STATUS), "pending");
    }
}
