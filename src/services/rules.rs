//! Conflict and validation rules
//!
//! Pure functions shared by every importer:
//! - per-entity validation (required fields, enums, length bounds)
//! - the skip / overwrite / merge decision for a row that may match an
//!   existing record

use crate::models::{
    AuthorRecord, CollectionQuoteRecord, ConflictPolicy, QuoteRecord, QuoteTagRecord,
    QuoteViewRecord, ReferenceRecord, TagRecord, UserCollectionRecord, UserLikeRecord, UserRecord,
    LIKEABLE_TYPES, QUOTE_LANGUAGES, QUOTE_MAX_LENGTH, QUOTE_MIN_LENGTH, QUOTE_STATUSES,
    REFERENCE_TYPES, USER_ROLES,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

static COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("color pattern is valid"));

/// Row-level validation. The error is a human-readable reason.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// What an importer should do with one incoming row
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    Insert(T),
    /// Write `record` over the existing row `id`
    Update { id: i64, record: T },
    /// Keep the existing row untouched
    Skip(i64),
    Reject(String),
}

/// Decide how to apply `incoming` given the matched existing row, if any.
///
/// Under `merge` the merged record is validated, so a partial row may
/// complete an existing one. Every other path validates `incoming` as is.
pub fn decide<T>(existing: Option<(i64, &T)>, incoming: &T, policy: ConflictPolicy) -> Decision<T>
where
    T: Validate + Serialize + DeserializeOwned + Clone,
{
    if let (Some((id, current)), ConflictPolicy::Merge) = (existing, policy) {
        return match merge_records(current, incoming) {
            Ok(merged) => match merged.validate() {
                Ok(()) => Decision::Update { id, record: merged },
                Err(reason) => Decision::Reject(reason),
            },
            Err(reason) => Decision::Reject(reason),
        };
    }

    if let Err(reason) = incoming.validate() {
        return Decision::Reject(reason);
    }

    match (existing, policy) {
        (None, _) => Decision::Insert(incoming.clone()),
        (Some((id, _)), ConflictPolicy::Skip) => Decision::Skip(id),
        (Some((id, _)), _) => Decision::Update {
            id,
            record: incoming.clone(),
        },
    }
}

/// Overlay the non-null fields of `incoming` onto `existing`
pub fn merge_records<T>(existing: &T, incoming: &T) -> Result<T, String>
where
    T: Serialize + DeserializeOwned,
{
    let mut base = serde_json::to_value(existing).map_err(|e| e.to_string())?;
    let overlay = serde_json::to_value(incoming).map_err(|e| e.to_string())?;

    if let (Value::Object(base), Value::Object(overlay)) = (&mut base, overlay) {
        for (key, value) in overlay {
            if !value.is_null() {
                base.insert(key, value);
            }
        }
    }

    serde_json::from_value(base).map_err(|e| e.to_string())
}

// ============================================================================
// Field checks
// ============================================================================

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str, String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("{} is required", field)),
    }
}

fn length(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(format!(
            "{} must be between {} and {} characters (got {})",
            field, min, max, len
        ));
    }
    Ok(())
}

fn max_length(field: &str, value: &Option<String>, max: usize) -> Result<(), String> {
    match value {
        Some(v) if v.chars().count() > max => {
            Err(format!("{} must be at most {} characters", field, max))
        }
        _ => Ok(()),
    }
}

fn one_of(field: &str, value: &Option<String>, allowed: &[&str]) -> Result<(), String> {
    match value.as_deref() {
        Some(v) if !allowed.contains(&v) => Err(format!(
            "{} must be one of {} (got '{}')",
            field,
            allowed.join(", "),
            v
        )),
        _ => Ok(()),
    }
}

fn required_id(field: &str, value: Option<i64>) -> Result<i64, String> {
    value.ok_or_else(|| format!("{} is required", field))
}

fn named(name: &Option<String>, max: usize) -> Result<(), String> {
    let name = required("name", name)?;
    length("name", name, 1, max)
}

// ============================================================================
// Entity validators
// ============================================================================

impl Validate for UserRecord {
    fn validate(&self) -> Result<(), String> {
        let email = required("email", &self.email)?;
        if !EMAIL_RE.is_match(email) {
            return Err(format!("email '{}' is not a valid address", email));
        }
        length("email", email, 3, 255)?;
        let name = required("name", &self.name)?;
        length("name", name, 1, 100)?;
        one_of("role", &self.role, USER_ROLES)?;
        max_length("language", &self.language, 10)
    }
}

impl Validate for AuthorRecord {
    fn validate(&self) -> Result<(), String> {
        named(&self.name, 200)
    }
}

impl Validate for ReferenceRecord {
    fn validate(&self) -> Result<(), String> {
        named(&self.name, 200)?;
        one_of("primary_type", &self.primary_type, REFERENCE_TYPES)?;
        max_length("original_language", &self.original_language, 10)
    }
}

impl Validate for TagRecord {
    fn validate(&self) -> Result<(), String> {
        named(&self.name, 50)?;
        match self.color.as_deref() {
            Some(color) if !COLOR_RE.is_match(color) => {
                Err(format!("color '{}' must look like #RRGGBB", color))
            }
            _ => Ok(()),
        }
    }
}

impl Validate for QuoteRecord {
    fn validate(&self) -> Result<(), String> {
        let text = required("name", &self.name)?;
        length("name", text, QUOTE_MIN_LENGTH, QUOTE_MAX_LENGTH)?;
        one_of("language", &self.language, QUOTE_LANGUAGES)?;
        one_of("status", &self.status, QUOTE_STATUSES)?;
        if let Some(author) = &self.new_author {
            author.validate().map_err(|e| format!("new_author: {}", e))?;
        }
        if let Some(reference) = &self.new_reference {
            reference.validate().map_err(|e| format!("new_reference: {}", e))?;
        }
        Ok(())
    }
}

impl Validate for QuoteTagRecord {
    fn validate(&self) -> Result<(), String> {
        required_id("quote_id", self.quote_id)?;
        let has_name = self
            .tag_name
            .as_deref()
            .map_or(false, |n| !n.trim().is_empty());
        if self.tag_id.is_none() && !has_name {
            return Err("tag_id or tag_name is required".to_string());
        }
        Ok(())
    }
}

impl Validate for UserLikeRecord {
    fn validate(&self) -> Result<(), String> {
        required_id("user_id", self.user_id)?;
        required("likeable_type", &self.likeable_type)?;
        one_of("likeable_type", &self.likeable_type, LIKEABLE_TYPES)?;
        required_id("likeable_id", self.likeable_id)?;
        Ok(())
    }
}

impl Validate for UserCollectionRecord {
    fn validate(&self) -> Result<(), String> {
        required_id("user_id", self.user_id)?;
        named(&self.name, 100)
    }
}

impl Validate for CollectionQuoteRecord {
    fn validate(&self) -> Result<(), String> {
        required_id("collection_id", self.collection_id)?;
        required_id("quote_id", self.quote_id)?;
        Ok(())
    }
}

impl Validate for QuoteViewRecord {
    fn validate(&self) -> Result<(), String> {
        required_id("quote_id", self.quote_id)?;
        required("viewed_at", &self.viewed_at)?;
        max_length("ip_address", &self.ip_address, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author(name: &str) -> AuthorRecord {
        AuthorRecord::named(name)
    }

    #[test]
    fn test_insert_when_nothing_matches() {
        let incoming = author("Marcus Aurelius");
        assert_eq!(
            decide(None, &incoming, ConflictPolicy::Skip),
            Decision::Insert(incoming.clone())
        );
    }

    #[test]
    fn test_skip_keeps_existing_id() {
        let existing = author("Marcus Aurelius");
        let incoming = author("marcus aurelius");
        assert_eq!(
            decide(Some((7, &existing)), &incoming, ConflictPolicy::Skip),
            Decision::Skip(7)
        );
    }

    #[test]
    fn test_invalid_row_rejected_under_every_policy() {
        let existing = author("Seneca");
        let incoming = AuthorRecord::default();
        for policy in [ConflictPolicy::Skip, ConflictPolicy::Overwrite] {
            assert!(matches!(
                decide(Some((1, &existing)), &incoming, policy),
                Decision::Reject(_)
            ));
        }
        assert!(matches!(
            decide(None, &incoming, ConflictPolicy::Merge),
            Decision::Reject(_)
        ));
    }

    #[test]
    fn test_overwrite_drops_absent_fields() {
        let existing = AuthorRecord {
            job: Some("Emperor".into()),
            ..author("Marcus Aurelius")
        };
        let incoming = author("Marcus Aurelius");
        match decide(Some((3, &existing)), &incoming, ConflictPolicy::Overwrite) {
            Decision::Update { id, record } => {
                assert_eq!(id, 3);
                assert_eq!(record.job, None);
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let existing = AuthorRecord {
            job: Some("Emperor".into()),
            description: Some("Stoic".into()),
            ..author("Marcus Aurelius")
        };
        let incoming = AuthorRecord {
            description: Some("Stoic philosopher".into()),
            ..author("Marcus Aurelius")
        };
        match decide(Some((3, &existing)), &incoming, ConflictPolicy::Merge) {
            Decision::Update { record, .. } => {
                assert_eq!(record.job.as_deref(), Some("Emperor"));
                assert_eq!(record.description.as_deref(), Some("Stoic philosopher"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_merge_validates_merged_record() {
        let existing = UserRecord {
            email: Some("ada@example.com".into()),
            name: Some("Ada".into()),
            ..UserRecord::default()
        };
        let partial = UserRecord {
            email: Some("ada@example.com".into()),
            job: Some("Mathematician".into()),
            ..UserRecord::default()
        };
        assert!(matches!(
            decide(Some((1, &existing)), &partial, ConflictPolicy::Merge),
            Decision::Update { .. }
        ));
        assert!(matches!(
            decide(None, &partial, ConflictPolicy::Merge),
            Decision::Reject(_)
        ));
    }

    #[test]
    fn test_user_validation() {
        let mut user = UserRecord {
            email: Some("not-an-email".into()),
            name: Some("Ann".into()),
            ..UserRecord::default()
        };
        assert!(user.validate().unwrap_err().contains("email"));

        user.email = Some("ann@example.com".into());
        assert!(user.validate().is_ok());

        user.role = Some("root".into());
        assert!(user.validate().unwrap_err().contains("role"));
    }

    #[test]
    fn test_quote_length_bounds() {
        let short = QuoteRecord {
            name: Some("Too short".into()),
            ..QuoteRecord::default()
        };
        assert!(short.validate().is_err());

        let ok = QuoteRecord {
            name: Some("Long enough to count".into()),
            ..QuoteRecord::default()
        };
        assert!(ok.validate().is_ok());

        let long = QuoteRecord {
            name: Some("x".repeat(QUOTE_MAX_LENGTH + 1)),
            ..QuoteRecord::default()
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_tag_color_format() {
        let mut tag = TagRecord::named("life");
        tag.color = Some("#12ab9F".into());
        assert!(tag.validate().is_ok());
        tag.color = Some("red".into());
        assert!(tag.validate().is_err());
    }

    #[test]
    fn test_relation_validation() {
        let like = UserLikeRecord {
            user_id: Some(1),
            likeable_type: Some("comment".into()),
            likeable_id: Some(2),
            ..UserLikeRecord::default()
        };
        assert!(like.validate().is_err());

        let link = QuoteTagRecord {
            quote_id: Some(1),
            tag_id: None,
            tag_name: Some("  ".into()),
        };
        assert!(link.validate().is_err());

        let view = QuoteViewRecord {
            quote_id: Some(1),
            ..QuoteViewRecord::default()
        };
        assert!(view.validate().unwrap_err().contains("viewed_at"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn opt_text() -> impl Strategy<Value = Option<String>> {
            proptest::option::of("[a-zA-Z ]{1,20}")
        }

        proptest! {
            #[test]
            fn merge_never_nulls_absent_fields(
                job in opt_text(),
                description in opt_text(),
                birth_location in opt_text(),
                new_job in opt_text(),
                new_description in opt_text(),
            ) {
                let existing = AuthorRecord {
                    job: job.clone(),
                    description: description.clone(),
                    birth_location: birth_location.clone(),
                    ..AuthorRecord::named("Hypatia")
                };
                let incoming = AuthorRecord {
                    job: new_job.clone(),
                    description: new_description.clone(),
                    ..AuthorRecord::named("Hypatia")
                };

                let merged = merge_records(&existing, &incoming).unwrap();
                prop_assert_eq!(merged.job, new_job.or(job));
                prop_assert_eq!(merged.description, new_description.or(description));
                prop_assert_eq!(merged.birth_location, birth_location);
            }
        }
    }
}
