//! Relation rows
//!
//! Link tables between quotes, tags, users and collections. Every id here is
//! a source id which importers translate before writing.

use serde::{Deserialize, Serialize};

/// Accepted values for `likeable_type`
pub const LIKEABLE_TYPES: &[&str] = &["quote", "author", "reference"];

/// Quote to tag link; the tag may be named instead of referenced by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteTagRecord {
    pub quote_id: Option<i64>,
    pub tag_id: Option<i64>,
    pub tag_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserLikeRecord {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub likeable_type: Option<String>,
    pub likeable_id: Option<i64>,
    pub created_at: Option<String>,
}

/// A user's named collection of quotes, unique per (user, name)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserCollectionRecord {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuoteRecord {
    pub collection_id: Option<i64>,
    pub quote_id: Option<i64>,
    pub added_at: Option<String>,
}

/// One recorded view of a quote, unique per (quote, ip, time)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteViewRecord {
    pub id: Option<i64>,
    pub quote_id: Option<i64>,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub viewed_at: Option<String>,
}
