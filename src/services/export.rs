//! Export service
//!
//! Dumps the requested tables, encodes them and stores the file as a
//! backup artifact linked to an `export_logs` row. Exports run inside the
//! request but are tracked in the progress store like imports.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::repositories::{ExportLogRepository, SnapshotRepository};
use crate::models::{
    BackupFile, BackupKind, BatchDelta, Bundle, DataType, ExportLog, JobKind, JobProgress,
    JobStatus, ListParams, PagedResult, ProgressPatch,
};
use crate::services::backup::{Artifact, BackupError, BackupService};
use crate::services::codec::{self, Format, FormatError};
use crate::services::progress::ProgressStore;
use crate::services::storage::CompressionMode;

/// Error types for export operations
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(alias = "data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub format: Option<String>,
    /// Absent means compress once the file reaches the configured threshold
    #[serde(default)]
    pub compress: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    pub export_id: String,
    pub backup_id: i64,
    pub filename: String,
    pub format: String,
    pub record_count: u64,
    pub file_size: u64,
    pub download_url: String,
}

/// Encoded export before it is stored
struct Encoded {
    content: Vec<u8>,
    format: Format,
}

/// Export service
pub struct ExportService {
    progress: ProgressStore,
    logs: Arc<dyn ExportLogRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    backups: Arc<BackupService>,
}

impl ExportService {
    pub fn new(
        progress: ProgressStore,
        logs: Arc<dyn ExportLogRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        backups: Arc<BackupService>,
    ) -> Self {
        Self {
            progress,
            logs,
            snapshots,
            backups,
        }
    }

    pub async fn export(&self, request: ExportRequest) -> Result<ExportResult, ExportError> {
        let format: Format = request.format.as_deref().unwrap_or("json").parse()?;
        let data_type = request.data_type;
        let compression = request
            .compress
            .map(CompressionMode::from)
            .unwrap_or(CompressionMode::Auto);

        let bundle = self.dump(data_type).await?;
        let total = bundle.total() as u64;

        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut log = ExportLog {
            id: id.clone(),
            filename: String::new(),
            format: format.as_str().to_string(),
            data_type,
            record_count: 0,
            file_size: 0,
            status: JobStatus::Processing,
            error: None,
            started_at,
            completed_at: None,
        };
        self.logs.create(&log).await?;

        let mut job = JobProgress::new(id.clone(), JobKind::Export, data_type, total);
        job.status = JobStatus::Processing;
        if let Err(e) = self.progress.create(job) {
            tracing::warn!("Export {} is not tracked: {}", id, e);
        }

        let stored = match self.encode_and_store(&id, data_type, format, compression, &bundle).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!("Export {} failed: {}", id, e);
                let _ = self.progress.add_error(&id, e.to_string());
                let _ = self
                    .progress
                    .update(&id, &ProgressPatch::status(JobStatus::Failed));
                log.status = JobStatus::Failed;
                log.error = Some(e.to_string());
                log.completed_at = Some(Utc::now());
                if let Err(log_err) = self.logs.finish(&log).await {
                    tracing::warn!("Failed to finalise export log {}: {}", id, log_err);
                }
                return Err(e);
            }
        };

        for (entity, records) in bundle.iter() {
            let delta = BatchDelta {
                successful: records.len() as u64,
                ..BatchDelta::default()
            };
            if let Err(e) = self.progress.apply_batch(&id, &delta) {
                tracing::debug!("Export {} {} progress not recorded: {}", id, entity, e);
            }
        }
        let _ = self
            .progress
            .update(&id, &ProgressPatch::status(JobStatus::Completed));

        log.filename = stored.filename.clone();
        log.record_count = total;
        log.file_size = stored.file_size;
        log.status = JobStatus::Completed;
        log.completed_at = Some(Utc::now());
        if let Err(e) = self.logs.finish(&log).await {
            tracing::warn!("Failed to finalise export log {}: {}", id, e);
        }

        tracing::info!(
            "Export {} completed: {} {} records as {}",
            id,
            total,
            data_type,
            stored.filename
        );

        Ok(ExportResult {
            success: true,
            export_id: id,
            backup_id: stored.id,
            download_url: format!("/api/v1/admin/backups/{}/download", stored.id),
            filename: stored.filename,
            format: log.format,
            record_count: total,
            file_size: stored.file_size,
        })
    }

    pub async fn history(&self, params: &ListParams) -> Result<PagedResult<ExportLog>, ExportError> {
        let (items, total) = self.logs.list(params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Read every requested table, normalised to the entity's field kinds
    async fn dump(&self, data_type: DataType) -> Result<Bundle, ExportError> {
        let mut bundle = Bundle::new();
        for entity in data_type.entities() {
            let rows = self.snapshots.dump_table(entity.table()).await?;
            let records = rows
                .into_iter()
                .map(|row| codec::normalize(entity, row))
                .collect();
            bundle.insert(entity, records);
        }
        Ok(bundle)
    }

    async fn encode_and_store(
        &self,
        id: &str,
        data_type: DataType,
        format: Format,
        compression: CompressionMode,
        bundle: &Bundle,
    ) -> Result<BackupFile, ExportError> {
        let encoded = encode_bundle(data_type, format, bundle)?;
        let filename = format!(
            "verbatims-{}-{}.{}",
            data_type,
            Utc::now().format("%Y%m%d-%H%M%S"),
            encoded.format.extension()
        );

        let mut metadata = Map::new();
        let counts: Map<String, Value> = bundle
            .counts()
            .into_iter()
            .map(|(entity, n)| (entity.as_str().to_string(), Value::from(n)))
            .collect();
        metadata.insert("entities".to_string(), Value::Object(counts));

        let created_at = Utc::now();
        let file = self
            .backups
            .store_artifact(Artifact {
                content: encoded.content,
                filename,
                format: encoded.format.as_str().to_string(),
                data_type: data_type.as_str().to_string(),
                record_count: bundle.total() as u64,
                kind: BackupKind::Export,
                compression,
                export_log_id: Some(id.to_string()),
                import_log_id: None,
                metadata,
                expires_at: self.backups.settings().backup_ttl.map(|ttl| created_at + ttl),
            })
            .await?;
        Ok(file)
    }
}

/// Encode an export.
///
/// One entity is written in the requested format. `all` becomes a JSON
/// bundle for `json` and a ZIP of per-entity files otherwise.
fn encode_bundle(data_type: DataType, format: Format, bundle: &Bundle) -> Result<Encoded, FormatError> {
    let content = match (data_type, format) {
        (_, Format::Zip) => {
            return Ok(Encoded {
                content: codec::encode_zip(bundle, Format::Json)?,
                format: Format::Zip,
            })
        }
        (DataType::Entity(entity), format) => {
            let records = bundle.get(entity).unwrap_or_default();
            codec::encode(entity, format, records)?
        }
        (DataType::All, Format::Json) => codec::encode_bundle_json(bundle)?,
        (DataType::All, inner) => {
            return Ok(Encoded {
                content: codec::encode_zip(bundle, inner)?,
                format: Format::Zip,
            })
        }
    };
    Ok(Encoded { content, format })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;
    use crate::db::repositories::{
        SqlxBackupFileRepository, SqlxExportLogRepository, SqlxSnapshotRepository,
    };
    use crate::db::{create_test_pool, migrations::run_migrations, DynDatabasePool};
    use crate::services::backup::BackupSettings;
    use crate::services::storage::LocalBlobStore;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (DynDatabasePool, Arc<BackupService>, ExportService, TempDir) {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        for sql in [
            "INSERT INTO users (email, name) VALUES ('a@example.com', 'A')",
            "INSERT INTO tags (name, color) VALUES ('life', '#112233')",
            "INSERT INTO tags (name) VALUES ('love')",
        ] {
            pool.execute(sql).await.unwrap();
        }

        let dir = TempDir::new().unwrap();
        let backups = Arc::new(BackupService::new(
            SqlxBackupFileRepository::boxed(pool.clone()),
            SqlxSnapshotRepository::boxed(pool.clone()),
            Arc::new(LocalBlobStore::new(dir.path())),
            BackupSettings::default(),
        ));
        let service = ExportService::new(
            ProgressStore::new(Duration::from_millis(20)),
            SqlxExportLogRepository::boxed(pool.clone()),
            SqlxSnapshotRepository::boxed(pool.clone()),
            backups.clone(),
        );
        (pool, backups, service, dir)
    }

    #[tokio::test]
    async fn test_export_single_entity_csv() {
        let (_pool, backups, service, _dir) = setup().await;
        let result = service
            .export(ExportRequest {
                data_type: DataType::Entity(EntityType::Tags),
                format: Some("csv".into()),
                compress: Some(false),
            })
            .await
            .unwrap();

        assert_eq!(result.record_count, 2);
        assert!(result.filename.ends_with(".csv"));

        let download = backups.download(result.backup_id).await.unwrap();
        let records = codec::decode(EntityType::Tags, Format::Csv, &download.bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "life");

        let file = backups.get(result.backup_id).await.unwrap();
        assert_eq!(file.kind(), Some(BackupKind::Export));
        assert_eq!(file.export_log_id.as_deref(), Some(result.export_id.as_str()));

        let job = service.progress.get(&result.export_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.successful_records, 2);
    }

    #[tokio::test]
    async fn test_export_all_as_zip_reimports() {
        let (_pool, backups, service, _dir) = setup().await;
        let result = service
            .export(ExportRequest {
                data_type: DataType::All,
                format: Some("csv".into()),
                compress: None,
            })
            .await
            .unwrap();
        assert!(result.filename.ends_with(".zip"));
        assert_eq!(result.format, "csv");

        let download = backups.download(result.backup_id).await.unwrap();
        let (bundle, _) = codec::decode_zip(&download.bytes, codec::DEFAULT_MAX_ENTRY_BYTES).unwrap();
        assert_eq!(bundle.get(EntityType::Users).map(|r| r.len()), Some(1));
        assert_eq!(bundle.get(EntityType::Tags).map(|r| r.len()), Some(2));

        let history = service.history(&ListParams::default()).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].status, JobStatus::Completed);
        assert_eq!(history.items[0].record_count, 3);
    }

    #[tokio::test]
    async fn test_export_all_json_is_bundle() {
        let (_pool, backups, service, _dir) = setup().await;
        let result = service
            .export(ExportRequest {
                data_type: DataType::All,
                format: None,
                compress: Some(true),
            })
            .await
            .unwrap();
        let file = backups.get(result.backup_id).await.unwrap();
        assert!(file.filename.ends_with(".json.gz"));

        let download = backups.download(result.backup_id).await.unwrap();
        let value: Value = serde_json::from_slice(&download.bytes).unwrap();
        let (bundle, warnings) = codec::decode_bundle_json(value).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(bundle.total(), 3);
    }

    #[tokio::test]
    async fn test_unknown_format_rejected() {
        let (_pool, _backups, service, _dir) = setup().await;
        let result = service
            .export(ExportRequest {
                data_type: DataType::All,
                format: Some("yaml".into()),
                compress: None,
            })
            .await;
        assert!(matches!(result, Err(ExportError::Format(_))));
    }
}
