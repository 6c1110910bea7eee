//! Stored artifacts
//!
//! A `BackupFile` row tracks one object in blob storage: snapshots, exports
//! and import reports. Rows reference blobs by key, never inline bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
}

impl CompressionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
        }
    }
}

impl FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionType::None),
            "gzip" => Ok(CompressionType::Gzip),
            other => Err(format!("unknown compression type: {}", other)),
        }
    }
}

/// Upload state of the blob behind a backup row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Uploading,
    Stored,
    Failed,
}

impl StorageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStatus::Uploading => "uploading",
            StorageStatus::Stored => "stored",
            StorageStatus::Failed => "failed",
        }
    }
}

impl FromStr for StorageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(StorageStatus::Uploading),
            "stored" => Ok(StorageStatus::Stored),
            "failed" => Ok(StorageStatus::Failed),
            other => Err(format!("unknown storage status: {}", other)),
        }
    }
}

/// What an artifact is, recorded as `metadata.kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Snapshot,
    Export,
    ImportReport,
    PreRollback,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Snapshot => "snapshot",
            BackupKind::Export => "export",
            BackupKind::ImportReport => "import-report",
            BackupKind::PreRollback => "pre-rollback",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `backup_files`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub id: i64,
    pub file_key: String,
    pub filename: String,
    pub file_path: String,
    pub format: String,
    pub data_type: String,
    pub record_count: u64,
    /// Size of the uncompressed content
    pub file_size: u64,
    /// Size as stored, when compressed
    pub compressed_size: Option<u64>,
    /// Hex sha256 of the uncompressed content
    pub content_hash: Option<String>,
    pub compression_type: CompressionType,
    pub storage_status: StorageStatus,
    pub export_log_id: Option<String>,
    pub import_log_id: Option<String>,
    pub metadata: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BackupFile {
    /// `metadata.kind`, if recognised
    pub fn kind(&self) -> Option<BackupKind> {
        self.metadata
            .get("kind")
            .cloned()
            .and_then(|k| serde_json::from_value(k).ok())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Input for inserting a `backup_files` row
#[derive(Debug, Clone, PartialEq)]
pub struct NewBackupFile {
    pub file_key: String,
    pub filename: String,
    pub file_path: String,
    pub format: String,
    pub data_type: String,
    pub record_count: u64,
    pub file_size: u64,
    pub compressed_size: Option<u64>,
    pub content_hash: Option<String>,
    pub compression_type: CompressionType,
    pub storage_status: StorageStatus,
    pub export_log_id: Option<String>,
    pub import_log_id: Option<String>,
    pub metadata: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(BackupKind::ImportReport).unwrap(),
            serde_json::json!("import-report")
        );
        assert_eq!(
            serde_json::from_value::<BackupKind>(serde_json::json!("pre-rollback")).unwrap(),
            BackupKind::PreRollback
        );
    }
}
