//! Entity types, records and bundles
//!
//! Every importable table is named by an [`EntityType`]. Codecs produce
//! loosely-typed [`Record`]s which are normalised against the entity's
//! field kinds before importers deserialize them into typed records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One row as produced by a codec: field name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Importable entity types.
///
/// Variants are declared in dependency order, so the derived `Ord` agrees
/// with [`EntityType::IMPORT_ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Users,
    Authors,
    References,
    Tags,
    Quotes,
    UserCollections,
    QuoteTags,
    UserLikes,
    CollectionQuotes,
    QuoteViews,
}

/// How a field's value is coerced during normalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Arrays or objects; text cells are parsed as JSON
    Json,
}

use FieldKind::{Boolean as B, Integer as I, Json as J, Text as T};

const USER_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("email", T),
    ("name", T),
    ("role", T),
    ("language", T),
    ("biography", T),
    ("job", T),
    ("location", T),
    ("avatar_url", T),
    ("is_active", B),
    ("email_verified", B),
    ("created_at", T),
    ("updated_at", T),
];

const AUTHOR_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("name", T),
    ("is_fictional", B),
    ("birth_date", T),
    ("birth_location", T),
    ("death_date", T),
    ("death_location", T),
    ("job", T),
    ("description", T),
    ("image_url", T),
    ("socials", J),
    ("views_count", I),
    ("likes_count", I),
    ("created_at", T),
    ("updated_at", T),
];

const REFERENCE_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("name", T),
    ("primary_type", T),
    ("secondary_type", T),
    ("original_language", T),
    ("release_date", T),
    ("description", T),
    ("image_url", T),
    ("urls", J),
    ("views_count", I),
    ("likes_count", I),
    ("created_at", T),
    ("updated_at", T),
];

const TAG_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("name", T),
    ("description", T),
    ("category", T),
    ("color", T),
    ("created_at", T),
    ("updated_at", T),
];

const QUOTE_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("name", T),
    ("language", T),
    ("status", T),
    ("author_id", I),
    ("new_author", J),
    ("reference_id", I),
    ("new_reference", J),
    ("user_id", I),
    ("moderator_id", I),
    ("moderated_at", T),
    ("rejection_reason", T),
    ("is_featured", B),
    ("views_count", I),
    ("likes_count", I),
    ("shares_count", I),
    ("tags", J),
    ("tag_ids", J),
    ("created_at", T),
    ("updated_at", T),
];

const USER_COLLECTION_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("user_id", I),
    ("name", T),
    ("description", T),
    ("is_public", B),
    ("created_at", T),
    ("updated_at", T),
];

const QUOTE_TAG_FIELDS: &[(&str, FieldKind)] = &[("quote_id", I), ("tag_id", I), ("tag_name", T)];

const USER_LIKE_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("user_id", I),
    ("likeable_type", T),
    ("likeable_id", I),
    ("created_at", T),
];

const COLLECTION_QUOTE_FIELDS: &[(&str, FieldKind)] =
    &[("collection_id", I), ("quote_id", I), ("added_at", T)];

const QUOTE_VIEW_FIELDS: &[(&str, FieldKind)] = &[
    ("id", I),
    ("quote_id", I),
    ("user_id", I),
    ("ip_address", T),
    ("viewed_at", T),
];

impl EntityType {
    /// Dependency order: parents before the rows that reference them.
    pub const IMPORT_ORDER: [EntityType; 10] = [
        EntityType::Users,
        EntityType::Authors,
        EntityType::References,
        EntityType::Tags,
        EntityType::Quotes,
        EntityType::UserCollections,
        EntityType::QuoteTags,
        EntityType::UserLikes,
        EntityType::CollectionQuotes,
        EntityType::QuoteViews,
    ];

    /// Name used in bundles, ZIP entries and URLs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Users => "users",
            EntityType::Authors => "authors",
            EntityType::References => "references",
            EntityType::Tags => "tags",
            EntityType::Quotes => "quotes",
            EntityType::UserCollections => "user_collections",
            EntityType::QuoteTags => "quote_tags",
            EntityType::UserLikes => "user_likes",
            EntityType::CollectionQuotes => "collection_quotes",
            EntityType::QuoteViews => "quote_views",
        }
    }

    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::References => "quote_references",
            other => other.as_str(),
        }
    }

    /// Resolve a table name back to its entity type
    pub fn from_table(table: &str) -> Option<EntityType> {
        Self::IMPORT_ORDER.into_iter().find(|e| e.table() == table)
    }

    /// Relation tables only link rows owned by other entity types
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            EntityType::QuoteTags
                | EntityType::UserLikes
                | EntityType::CollectionQuotes
                | EntityType::QuoteViews
        )
    }

    /// Known fields and how to coerce them
    pub fn fields(&self) -> &'static [(&'static str, FieldKind)] {
        match self {
            EntityType::Users => USER_FIELDS,
            EntityType::Authors => AUTHOR_FIELDS,
            EntityType::References => REFERENCE_FIELDS,
            EntityType::Tags => TAG_FIELDS,
            EntityType::Quotes => QUOTE_FIELDS,
            EntityType::UserCollections => USER_COLLECTION_FIELDS,
            EntityType::QuoteTags => QUOTE_TAG_FIELDS,
            EntityType::UserLikes => USER_LIKE_FIELDS,
            EntityType::CollectionQuotes => COLLECTION_QUOTE_FIELDS,
            EntityType::QuoteViews => QUOTE_VIEW_FIELDS,
        }
    }

    /// Kind of a named field, if the entity declares it
    pub fn field_kind(&self, field: &str) -> Option<FieldKind> {
        self.fields()
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let normalized = match normalized.as_str() {
            "quote_references" => "references",
            other => other,
        };
        Self::IMPORT_ORDER
            .into_iter()
            .find(|e| e.as_str() == normalized)
            .ok_or_else(|| format!("unknown entity type: {}", s))
    }
}

/// Scope of an import or export request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DataType {
    Entity(EntityType),
    All,
}

impl DataType {
    /// Entity types covered, in import order
    pub fn entities(&self) -> Vec<EntityType> {
        match self {
            DataType::Entity(entity) => vec![*entity],
            DataType::All => EntityType::IMPORT_ORDER.to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Entity(entity) => entity.as_str(),
            DataType::All => "all",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(DataType::All)
        } else {
            s.parse().map(DataType::Entity)
        }
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.as_str().to_string()
    }
}

/// Rows grouped by entity type, iterated in import order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bundle {
    entries: BTreeMap<EntityType, Vec<Record>>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle holding rows for a single entity type
    pub fn single(entity: EntityType, records: Vec<Record>) -> Self {
        let mut bundle = Self::new();
        bundle.insert(entity, records);
        bundle
    }

    /// Append rows for an entity type
    pub fn insert(&mut self, entity: EntityType, records: Vec<Record>) {
        self.entries.entry(entity).or_default().extend(records);
    }

    pub fn get(&self, entity: EntityType) -> Option<&[Record]> {
        self.entries.get(&entity).map(Vec::as_slice)
    }

    /// Remove and return the rows for an entity type
    pub fn take(&mut self, entity: EntityType) -> Vec<Record> {
        self.entries.remove(&entity).unwrap_or_default()
    }

    /// Row count per entity type
    pub fn counts(&self) -> BTreeMap<EntityType, usize> {
        self.entries
            .iter()
            .map(|(entity, rows)| (*entity, rows.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Non-empty entries in import order
    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &[Record])> {
        self.entries
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(entity, rows)| (*entity, rows.as_slice()))
    }
}
