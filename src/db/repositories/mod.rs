//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the operations the pipeline needs for one table
//! or group of tables.

pub mod author;
pub mod backup_file;
pub mod export_log;
pub mod import_log;
pub mod quote;
pub mod reference;
pub mod relation;
pub mod snapshot;
pub mod tag;
pub mod user;

pub use author::{AuthorRepository, SqlxAuthorRepository};
pub use backup_file::{BackupFileRepository, SqlxBackupFileRepository};
pub use export_log::{ExportLogRepository, SqlxExportLogRepository};
pub use import_log::{ImportLogRepository, SqlxImportLogRepository};
pub use quote::{QuoteRepository, SqlxQuoteRepository};
pub use reference::{ReferenceRepository, SqlxReferenceRepository};
pub use relation::{RelationRepository, SqlxRelationRepository};
pub use snapshot::{
    resolve_table, RestoreOutcome, SnapshotRepository, SqlxSnapshotRepository, SNAPSHOT_TABLES,
};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{SqlxUserRepository, UserRepository};

use serde_json::Value;

/// Serialize a JSON column value; strings are stored as-is
pub(crate) fn json_text(value: &Option<Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Read a JSON column; text that is not JSON comes back as a string
pub(crate) fn parse_json_text(text: Option<String>) -> Option<Value> {
    text.map(|t| serde_json::from_str(&t).unwrap_or(Value::String(t)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_text_round_trip() {
        let socials = Some(json!({ "twitter": "@seneca" }));
        assert_eq!(parse_json_text(json_text(&socials)), socials);
        assert_eq!(json_text(&Some(Value::Null)), None);
        assert_eq!(
            parse_json_text(Some("not json".to_string())),
            Some(json!("not json"))
        );
    }
}
