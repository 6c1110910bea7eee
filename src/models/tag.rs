//! Tag model
//!
//! Tags label quotes. Names are unique regardless of case; importing a tag
//! named `Wisdom` when `wisdom` exists reuses the existing row.

use serde::{Deserialize, Serialize};

/// Color given to tags that do not specify one
pub const DEFAULT_TAG_COLOR: &str = "#687FE5";

/// Tag row as exchanged by the import/export pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    /// `#RRGGBB`
    pub color: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl TagRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn color_or_default(&self) -> &str {
        self.color.as_deref().unwrap_or(DEFAULT_TAG_COLOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_named_uses_default_color() {
        let tag = TagRecord::named("wisdom");
        assert_eq!(tag.name.as_deref(), Some("wisdom"));
        assert_eq!(tag.color_or_default(), "#687FE5");
    }
}
