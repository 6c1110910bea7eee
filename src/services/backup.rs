//! Backup service
//!
//! Stores artifacts in blob storage with a tracking row in `backup_files`,
//! takes full snapshots of the pipeline tables and rolls the store back to
//! a snapshot.
//!
//! Rollback clears every snapshot table in one transaction, then restores
//! each table in its own transaction, parents first. A row the store
//! rejects is skipped and reported; the rest of its table is kept.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::db::repositories::{
    resolve_table, BackupFileRepository, SnapshotRepository, SNAPSHOT_TABLES,
};
use crate::models::{
    BackupFile, BackupKind, CompressionType, ListParams, NewBackupFile, PagedResult, Record,
    StorageStatus,
};
use crate::services::storage::{
    content_type_for, gunzip, gzip, sha256_hex, BlobStore, CompressionMode, StorageError,
};

/// Snapshot document version
pub const SNAPSHOT_VERSION: u64 = 1;

/// Error types for backup operations
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    NotFound(i64),

    #[error("Backup {0} has no stored content")]
    Unavailable(i64),

    #[error("Rollback must be confirmed with confirmRollback: true")]
    ConfirmationRequired,

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Storage tuning taken from `storage` config
#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub compress_threshold: usize,
    pub backup_ttl: Option<Duration>,
    pub report_ttl: Option<Duration>,
}

impl From<&StorageConfig> for BackupSettings {
    fn from(config: &StorageConfig) -> Self {
        let ttl = |days: i64| (days > 0).then(|| Duration::days(days));
        Self {
            compress_threshold: config.compress_threshold_bytes,
            backup_ttl: ttl(config.backup_ttl_days),
            report_ttl: ttl(config.report_ttl_days),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

/// Result of putting a payload into blob storage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_key: String,
    pub file_path: String,
    /// Name as stored, with `.gz` when compressed
    pub filename: String,
    pub file_size: u64,
    pub compressed_size: Option<u64>,
    pub content_hash: String,
    pub compression_type: CompressionType,
}

/// An artifact to store and track
#[derive(Debug, Clone)]
pub struct Artifact {
    pub content: Vec<u8>,
    pub filename: String,
    pub format: String,
    pub data_type: String,
    pub record_count: u64,
    pub kind: BackupKind,
    pub compression: CompressionMode,
    pub export_log_id: Option<String>,
    pub import_log_id: Option<String>,
    /// Merged into `metadata` next to `kind`
    pub metadata: Map<String, Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Decompressed artifact content
#[derive(Debug, Clone)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub content_hash: Option<String>,
    pub bytes: Vec<u8>,
}

/// Per-table outcome of a rollback
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRestore {
    pub restored: u64,
    pub skipped: u64,
    /// Row count after the restore
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    pub backup_id: i64,
    pub safety_backup_id: Option<i64>,
    pub tables: BTreeMap<String, TableRestore>,
    pub warnings: Vec<String>,
}

/// Backup service
pub struct BackupService {
    files: Arc<dyn BackupFileRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    store: Arc<dyn BlobStore>,
    settings: BackupSettings,
}

impl BackupService {
    pub fn new(
        files: Arc<dyn BackupFileRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        store: Arc<dyn BlobStore>,
        settings: BackupSettings,
    ) -> Self {
        Self {
            files,
            snapshots,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Hash, optionally compress and put a payload into blob storage
    pub async fn upload_backup_file(
        &self,
        content: &[u8],
        filename: &str,
        data_type: &str,
        compression: CompressionMode,
    ) -> Result<UploadedFile, BackupError> {
        let (uploaded, stored) = self.prepare_upload(content, filename, data_type, compression)?;
        self.store.put(&uploaded.file_key, &stored).await?;
        Ok(uploaded)
    }

    /// Insert a tracking row
    pub async fn create_backup_file(&self, file: NewBackupFile) -> Result<BackupFile, BackupError> {
        Ok(self.files.create(&file).await?)
    }

    /// Track and upload an artifact.
    ///
    /// The row is written as `uploading` first and marked `stored` or
    /// `failed` once the blob write finishes.
    pub async fn store_artifact(&self, artifact: Artifact) -> Result<BackupFile, BackupError> {
        let (uploaded, stored) = self.prepare_upload(
            &artifact.content,
            &artifact.filename,
            &artifact.data_type,
            artifact.compression,
        )?;

        let mut metadata = artifact.metadata;
        metadata.insert("kind".to_string(), json!(artifact.kind));

        let mut row = self
            .create_backup_file(NewBackupFile {
                file_key: uploaded.file_key.clone(),
                filename: uploaded.filename.clone(),
                file_path: uploaded.file_path.clone(),
                format: artifact.format,
                data_type: artifact.data_type,
                record_count: artifact.record_count,
                file_size: uploaded.file_size,
                compressed_size: uploaded.compressed_size,
                content_hash: Some(uploaded.content_hash.clone()),
                compression_type: uploaded.compression_type,
                storage_status: StorageStatus::Uploading,
                export_log_id: artifact.export_log_id,
                import_log_id: artifact.import_log_id,
                metadata: Value::Object(metadata),
                expires_at: artifact.expires_at,
            })
            .await?;

        if let Err(e) = self.store.put(&uploaded.file_key, &stored).await {
            tracing::warn!("Upload of {} failed: {}", uploaded.file_key, e);
            if let Err(status_err) = self.files.set_status(row.id, StorageStatus::Failed).await {
                tracing::warn!("Could not mark backup {} failed: {}", row.id, status_err);
            }
            return Err(e.into());
        }

        self.files.set_status(row.id, StorageStatus::Stored).await?;
        row.storage_status = StorageStatus::Stored;
        tracing::info!(
            "Stored {} artifact {} ({} bytes)",
            artifact.kind,
            row.file_key,
            row.file_size
        );
        Ok(row)
    }

    fn prepare_upload(
        &self,
        content: &[u8],
        filename: &str,
        data_type: &str,
        compression: CompressionMode,
    ) -> Result<(UploadedFile, Vec<u8>), BackupError> {
        let content_hash = sha256_hex(content);
        let compression_type = compression.resolve(content.len(), self.settings.compress_threshold);

        let (stored, filename) = match compression_type {
            CompressionType::Gzip => (
                gzip(content).context("Failed to compress payload")?,
                format!("{}.gz", sanitize_filename(filename)),
            ),
            CompressionType::None => (content.to_vec(), sanitize_filename(filename)),
        };

        let file_key = format!(
            "backups/{}/{}/{}-{}",
            sanitize_filename(data_type),
            Utc::now().format("%Y/%m/%d"),
            Uuid::new_v4(),
            filename
        );

        let uploaded = UploadedFile {
            file_path: file_key.clone(),
            file_key,
            filename,
            file_size: content.len() as u64,
            compressed_size: (compression_type == CompressionType::Gzip)
                .then_some(stored.len() as u64),
            content_hash,
            compression_type,
        };
        Ok((uploaded, stored))
    }

    /// Dump every pipeline table into a gzip-compressed snapshot
    pub async fn create_snapshot(&self, note: Option<String>) -> Result<BackupFile, BackupError> {
        self.snapshot(BackupKind::Snapshot, note).await
    }

    async fn snapshot(
        &self,
        kind: BackupKind,
        note: Option<String>,
    ) -> Result<BackupFile, BackupError> {
        let mut tables = Map::new();
        let mut counts = Map::new();
        let mut record_count = 0u64;

        for table in SNAPSHOT_TABLES {
            let rows = self.snapshots.dump_table(table).await?;
            record_count += rows.len() as u64;
            counts.insert(table.to_string(), json!(rows.len()));
            tables.insert(table.to_string(), Value::from(rows));
        }

        let created_at = Utc::now();
        let document = json!({
            "version": SNAPSHOT_VERSION,
            "created_at": created_at.to_rfc3339(),
            "note": note,
            "tables": tables,
        });
        let content = serde_json::to_vec(&document).context("Failed to serialize snapshot")?;

        let mut metadata = Map::new();
        metadata.insert("tables".to_string(), Value::Object(counts));
        if let Some(note) = note {
            metadata.insert("note".to_string(), Value::String(note));
        }

        self.store_artifact(Artifact {
            content,
            filename: format!("{}-{}.json", kind, created_at.format("%Y%m%d-%H%M%S")),
            format: "json".to_string(),
            data_type: "all".to_string(),
            record_count,
            kind,
            compression: CompressionMode::Gzip,
            export_log_id: None,
            import_log_id: None,
            metadata,
            expires_at: self.settings.backup_ttl.map(|ttl| created_at + ttl),
        })
        .await
    }

    pub async fn get(&self, id: i64) -> Result<BackupFile, BackupError> {
        self.files.get(id).await?.ok_or(BackupError::NotFound(id))
    }

    /// Stored report of an import job, if one was uploaded
    pub async fn find_report(&self, import_id: &str) -> Result<Option<BackupFile>, BackupError> {
        Ok(self.files.find_report(import_id).await?)
    }

    /// Decompressed content of a tracked file, counting the access
    pub async fn download(&self, id: i64) -> Result<Download, BackupError> {
        let file = self.get(id).await?;
        let bytes = self.load(&file).await?;
        if let Err(e) = self.files.record_access(id).await {
            tracing::warn!("Failed to record access to backup {}: {}", id, e);
        }

        let filename = match file.compression_type {
            CompressionType::Gzip => file
                .filename
                .strip_suffix(".gz")
                .unwrap_or(&file.filename)
                .to_string(),
            CompressionType::None => file.filename.clone(),
        };

        Ok(Download {
            content_type: content_type_for(&filename),
            filename,
            content_hash: file.content_hash,
            bytes,
        })
    }

    async fn load(&self, file: &BackupFile) -> Result<Vec<u8>, BackupError> {
        if file.storage_status != StorageStatus::Stored {
            return Err(BackupError::Unavailable(file.id));
        }
        let raw = match self.store.get(&file.file_key).await {
            Ok(raw) => raw,
            Err(StorageError::NotFound(_)) => return Err(BackupError::Unavailable(file.id)),
            Err(e) => return Err(e.into()),
        };
        match file.compression_type {
            CompressionType::Gzip => Ok(gunzip(&raw).context("Failed to decompress backup")?),
            CompressionType::None => Ok(raw),
        }
    }

    /// Replace the contents of every snapshot table with a snapshot's rows
    pub async fn rollback(
        &self,
        backup_id: i64,
        confirm: bool,
        create_safety_backup: bool,
    ) -> Result<RollbackSummary, BackupError> {
        if !confirm {
            return Err(BackupError::ConfirmationRequired);
        }

        let file = self.get(backup_id).await?;
        if file.format != "json" {
            return Err(BackupError::InvalidSnapshot(format!(
                "backup {} is {}, not a JSON snapshot",
                backup_id, file.format
            )));
        }
        let content = self.load(&file).await?;
        let (tables, mut warnings) = parse_snapshot(&content)?;

        let safety_backup_id = if create_safety_backup {
            let note = format!("before rollback to backup {}", backup_id);
            Some(self.snapshot(BackupKind::PreRollback, Some(note)).await?.id)
        } else {
            None
        };

        tracing::info!("Rolling back to backup {}", backup_id);
        let mut child_first = SNAPSHOT_TABLES;
        child_first.reverse();
        self.snapshots.clear_tables(&child_first).await?;

        let mut summary = BTreeMap::new();
        for table in SNAPSHOT_TABLES {
            let mut result = TableRestore::default();
            if let Some(rows) = tables.get(table).filter(|rows| !rows.is_empty()) {
                let outcome = self.snapshots.restore_table(table, rows).await?;
                for error in &outcome.errors {
                    tracing::warn!("Rollback skipped row: {}", error);
                }
                result.restored = outcome.restored;
                result.skipped = outcome.skipped;
                warnings.extend(outcome.errors);
            }
            result.count = self.snapshots.count(table).await?;
            summary.insert(table.to_string(), result);
        }

        tracing::info!("Rollback to backup {} finished", backup_id);
        Ok(RollbackSummary {
            backup_id,
            safety_backup_id,
            tables: summary,
            warnings,
        })
    }

    /// Remove a tracked file and its blob
    pub async fn delete_backup(&self, id: i64) -> Result<(), BackupError> {
        let file = self.get(id).await?;
        if let Err(e) = self.store.delete(&file.file_key).await {
            tracing::warn!("Failed to delete blob {}: {}", file.file_key, e);
        }
        self.files.delete(id).await?;
        Ok(())
    }

    pub async fn list_backups(
        &self,
        params: &ListParams,
        kind: Option<BackupKind>,
    ) -> Result<PagedResult<BackupFile>, BackupError> {
        let (items, total) = self
            .files
            .list(params, kind.as_ref().map(BackupKind::as_str))
            .await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Delete every file whose expiry has passed.
    ///
    /// A file that fails to delete is logged and left for the next run.
    pub async fn purge_expired(&self) -> Result<usize, BackupError> {
        let now = Utc::now();
        let mut purged = 0;
        for file in self.files.list_expiring().await? {
            if !file.is_expired(now) {
                continue;
            }
            match self.delete_backup(file.id).await {
                Ok(()) => purged += 1,
                Err(e) => tracing::warn!("Failed to purge expired backup {}: {}", file.id, e),
            }
        }
        if purged > 0 {
            tracing::info!("Purged {} expired backup files", purged);
        }
        Ok(purged)
    }
}

/// Keep names safe as a single path segment
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

type SnapshotTables = BTreeMap<&'static str, Vec<Record>>;

/// Parse a snapshot document into rows per table.
///
/// Accepts `{"version", "tables": {...}}`, an export bundle wrapping rows
/// under `data`, or a bare object keyed by table or entity names.
pub fn parse_snapshot(content: &[u8]) -> Result<(SnapshotTables, Vec<String>), BackupError> {
    let value: Value = serde_json::from_slice(content)
        .map_err(|e| BackupError::InvalidSnapshot(e.to_string()))?;
    let Value::Object(mut document) = value else {
        return Err(BackupError::InvalidSnapshot("expected a JSON object".to_string()));
    };

    if let Some(version) = document.get("version").and_then(Value::as_u64) {
        if version > SNAPSHOT_VERSION {
            return Err(BackupError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                version
            )));
        }
    }

    let body = match (document.remove("tables"), document.remove("data")) {
        (Some(Value::Object(tables)), _) => tables,
        (_, Some(Value::Object(data))) => data,
        _ => document,
    };

    let mut tables = SnapshotTables::new();
    let mut warnings = Vec::new();
    for (key, rows) in body {
        if matches!(key.as_str(), "version" | "created_at" | "exported_at" | "note") {
            continue;
        }
        let Some(table) = resolve_table(&key) else {
            warnings.push(format!("ignored unknown snapshot table '{}'", key));
            continue;
        };
        let Value::Array(rows) = rows else {
            return Err(BackupError::InvalidSnapshot(format!("'{}' must be an array", key)));
        };
        let rows = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(record) => Ok(record),
                _ => Err(BackupError::InvalidSnapshot(format!(
                    "'{}' contains a non-object row",
                    key
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        tables.entry(table).or_default().extend(rows);
    }

    if tables.is_empty() {
        return Err(BackupError::InvalidSnapshot("no known tables".to_string()));
    }
    Ok((tables, warnings))
}
