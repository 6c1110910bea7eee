//! Import orchestrator
//!
//! `submit` decodes the payload up front so format errors reach the caller
//! before any job exists. The job then runs on a detached task: importers
//! are invoked strictly in dependency order, the report is stored, the
//! durable log finalised, and only then is the terminal status published.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ImportConfig;
use crate::db::repositories::ImportLogRepository;
use crate::models::{
    Bundle, ConflictPolicy, DataType, EntityType, ImportLog, ImportOptions, JobKind, JobProgress,
    JobStatus, ListParams, PagedResult, ProgressPatch, ReportFormat,
};
use crate::services::backup::{BackupError, BackupService};
use crate::services::codec::{self, Format, FormatError};
use crate::services::importers::{
    importer_for, run_entity_import, ImportContext, ImportRepositories, ImportSink,
};
use crate::services::progress::ProgressStore;
use crate::services::report::{convert_report, ImportReport};

/// Error types for import operations
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("Invalid import request: {0}")]
    InvalidRequest(String),

    #[error("Import not found: {0}")]
    NotFound(String),

    #[error("Import {0} has already finished")]
    AlreadyFinished(String),

    #[error("No report stored for import {0}")]
    ReportNotFound(String),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Body of an import request.
///
/// Single entity types send `data` in `format`. `all` sends a base64 ZIP, a
/// JSON bundle, or a JSON bundle under `data`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub options: ImportOptions,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, alias = "zip_base64")]
    pub zip_base64: Option<String>,
    #[serde(default)]
    pub bundle: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportAccepted {
    pub success: bool,
    pub import_id: String,
    pub message: String,
    pub progress_url: String,
}

/// A stored report, in the requested format
#[derive(Debug, Clone)]
pub struct ReportDownload {
    pub filename: String,
    pub format: ReportFormat,
    pub bytes: Vec<u8>,
}

/// Tuning taken from `import` config
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub batch_size: usize,
    pub default_policy: ConflictPolicy,
    /// Decompressed size cap for each archive entry
    pub max_entry_bytes: u64,
}

impl From<&ImportConfig> for ImportSettings {
    fn from(config: &ImportConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            default_policy: config.default_conflict_policy,
            max_entry_bytes: config.max_entry_bytes,
        }
    }
}

/// Payload decoded and ready to run
struct Decoded {
    bundle: Bundle,
    warnings: Vec<String>,
    format: Format,
}

/// Import service
pub struct ImportService {
    progress: ProgressStore,
    logs: Arc<dyn ImportLogRepository>,
    repos: ImportRepositories,
    backups: Arc<BackupService>,
    settings: ImportSettings,
}

impl ImportService {
    pub fn new(
        progress: ProgressStore,
        logs: Arc<dyn ImportLogRepository>,
        repos: ImportRepositories,
        backups: Arc<BackupService>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            progress,
            logs,
            repos,
            backups,
            settings,
        }
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Validate and decode a request, create the job and start it
    pub async fn submit(
        self: &Arc<Self>,
        data_type: DataType,
        request: ImportRequest,
    ) -> Result<ImportAccepted, ImportError> {
        let decoded = decode_request(data_type, &request, self.settings.max_entry_bytes)?;
        if decoded.bundle.is_empty() {
            return Err(ImportError::InvalidRequest("no records to import".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let total = decoded.bundle.total() as u64;
        let mut job = JobProgress::new(id.clone(), JobKind::Import, data_type, total);
        job.warnings = decoded.warnings.clone();

        let log = ImportLog::from_job(
            &job,
            request.filename.clone(),
            decoded.format.as_str(),
            request.options.clone(),
        );
        self.logs.create(&log).await?;
        self.progress
            .create(job)
            .map_err(|e| ImportError::InternalError(e.into()))?;

        tracing::info!(
            "Import {} accepted: {} {} records from {}",
            id,
            total,
            data_type,
            request.filename.as_deref().unwrap_or("request body")
        );

        let service = Arc::clone(self);
        let job_id = id.clone();
        let options = request.options;
        let filename = request.filename;
        tokio::spawn(async move {
            service
                .run(&job_id, decoded.bundle, decoded.warnings, options, filename, decoded.format)
                .await;
        });

        Ok(ImportAccepted {
            success: true,
            message: format!("Import of {} {} records started", total, data_type),
            progress_url: format!("/api/v1/admin/import/progress/{}", id),
            import_id: id,
        })
    }

    /// Run a job created by `submit`
    pub(crate) async fn run(
        &self,
        id: &str,
        mut bundle: Bundle,
        warnings: Vec<String>,
        options: ImportOptions,
        filename: Option<String>,
        format: Format,
    ) {
        if let Err(e) = self
            .progress
            .update(id, &ProgressPatch::status(JobStatus::Processing))
        {
            tracing::warn!("Import {} could not start: {}", id, e);
            return;
        }

        let policy = options.conflict_policy.unwrap_or(self.settings.default_policy);
        let batch_size = options.batch_size.unwrap_or(self.settings.batch_size).max(1);
        let mut ctx = ImportContext::new(self.repos.clone(), policy, options.default_user_id);
        let mut report = ImportReport::new();
        for warning in warnings {
            report.add_warning(warning);
        }

        let mut fatal = false;
        for entity in EntityType::IMPORT_ORDER {
            let rows = bundle.take(entity);
            if rows.is_empty() {
                continue;
            }
            let importer = importer_for(entity);
            let mut sink = ImportSink {
                progress: &self.progress,
                job_id: id,
                report: &mut report,
            };
            let summary =
                run_entity_import(importer.as_ref(), &mut ctx, &rows, batch_size, &mut sink).await;
            tracing::info!(
                "Import {} {}: {} inserted, {} updated, {} skipped, {} failed",
                id,
                entity,
                summary.inserted,
                summary.updated,
                summary.skipped,
                summary.failed
            );
            fatal |= summary.fatal.is_some();
        }

        let status = if fatal {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };

        if !report.is_empty() {
            if let Err(e) = report.finalize(&self.backups, id, options.report_format).await {
                tracing::warn!("Failed to store report for import {}: {}", id, e);
                let _ = self
                    .progress
                    .add_warning(id, format!("import report could not be stored: {}", e));
            }
        }

        if let Some(mut job) = self.progress.get(id) {
            ProgressPatch::status(status).apply_to(&mut job);
            let log = ImportLog::from_job(&job, filename, format.as_str(), options);
            if let Err(e) = self.logs.finish(&log).await {
                tracing::warn!("Failed to finalise import log {}: {}", id, e);
            }
        }

        match self.progress.update(id, &ProgressPatch::status(status)) {
            Ok(job) => tracing::info!(
                "Import {} {}: {} of {} records succeeded",
                id,
                status,
                job.successful_records,
                job.total_records
            ),
            Err(e) => tracing::warn!("Failed to finish import {}: {}", id, e),
        }
    }

    /// Ask a running job to stop after its current batch
    pub fn cancel(&self, id: &str) -> Result<(), ImportError> {
        let job = self
            .progress
            .get(id)
            .ok_or_else(|| ImportError::NotFound(id.to_string()))?;
        if job.is_finished() || !self.progress.request_cancel(id) {
            return Err(ImportError::AlreadyFinished(id.to_string()));
        }
        tracing::info!("Cancellation requested for import {}", id);
        Ok(())
    }

    /// Live progress, or the durable log once the job left memory
    pub async fn status(&self, id: &str) -> Result<JobProgress, ImportError> {
        if let Some(job) = self.progress.get(id) {
            return Ok(job);
        }
        self.logs
            .get(id)
            .await?
            .map(|log| log.to_job())
            .ok_or_else(|| ImportError::NotFound(id.to_string()))
    }

    pub async fn history(&self, params: &ListParams) -> Result<PagedResult<ImportLog>, ImportError> {
        let (items, total) = self.logs.list(params).await?;
        Ok(PagedResult::new(items, total, params))
    }

    /// Stored report of a job, converted when another format is requested
    pub async fn report(
        &self,
        id: &str,
        format: Option<ReportFormat>,
    ) -> Result<ReportDownload, ImportError> {
        let file = self
            .backups
            .find_report(id)
            .await?
            .ok_or_else(|| ImportError::ReportNotFound(id.to_string()))?;
        let download = self.backups.download(file.id).await?;

        let stored = ReportFormat::from_filename(&download.filename).unwrap_or_default();
        let wanted = format.unwrap_or(stored);
        let bytes = convert_report(&download.bytes, stored, wanted)
            .map_err(|e| ImportError::InternalError(e.into()))?;

        Ok(ReportDownload {
            filename: format!("import-report-{}.{}", id, wanted.extension()),
            format: wanted,
            bytes,
        })
    }
}

fn decode_request(
    data_type: DataType,
    request: &ImportRequest,
    max_entry_bytes: u64,
) -> Result<Decoded, ImportError> {
    match data_type {
        DataType::Entity(entity) => decode_entity(entity, request, max_entry_bytes),
        DataType::All => decode_all(request, max_entry_bytes),
    }
}

fn decode_entity(
    entity: EntityType,
    request: &ImportRequest,
    max_entry_bytes: u64,
) -> Result<Decoded, ImportError> {
    let format: Format = request.format.as_deref().unwrap_or("json").parse()?;
    let data = request
        .data
        .as_ref()
        .ok_or_else(|| ImportError::InvalidRequest("data is required".to_string()))?;

    let (records, warnings) = match (format, data) {
        (Format::Json, Value::String(text)) => {
            (codec::decode(entity, Format::Json, text.as_bytes())?, Vec::new())
        }
        (Format::Json, value) => (codec::decode_json_value(entity, value.clone())?, Vec::new()),
        (Format::Zip, Value::String(text)) => {
            let (mut bundle, mut warnings) =
                codec::decode_zip(&codec::decode_base64(text)?, max_entry_bytes)?;
            let records = bundle.take(entity);
            for (other, rows) in bundle.iter() {
                warnings.push(format!(
                    "ignored {} {} rows in a {} import",
                    rows.len(),
                    other,
                    entity
                ));
            }
            (records, warnings)
        }
        (format, Value::String(text)) => (codec::decode(entity, format, text.as_bytes())?, Vec::new()),
        (format, _) => {
            return Err(ImportError::InvalidRequest(format!(
                "{} data must be sent as a string",
                format
            )))
        }
    };

    Ok(Decoded {
        bundle: Bundle::single(entity, records),
        warnings,
        format,
    })
}

fn decode_all(request: &ImportRequest, max_entry_bytes: u64) -> Result<Decoded, ImportError> {
    if let Some(zip) = &request.zip_base64 {
        let (bundle, warnings) = codec::decode_zip(&codec::decode_base64(zip)?, max_entry_bytes)?;
        return Ok(Decoded {
            bundle,
            warnings,
            format: Format::Zip,
        });
    }

    let value = match (&request.bundle, &request.data) {
        (Some(bundle), _) => bundle.clone(),
        (None, Some(Value::String(text))) => {
            serde_json::from_str(text).map_err(|e| FormatError::Json(e.to_string()))?
        }
        (None, Some(data)) => data.clone(),
        (None, None) => {
            return Err(ImportError::InvalidRequest(
                "zipBase64, bundle or data is required".to_string(),
            ))
        }
    };
    let (bundle, warnings) = codec::decode_bundle_json(value)?;
    Ok(Decoded {
        bundle,
        warnings,
        format: Format::Json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{
        SqlxBackupFileRepository, SqlxImportLogRepository, SqlxSnapshotRepository,
    };
    use crate::db::{create_test_pool, migrations::run_migrations, DynDatabasePool};
    use crate::services::backup::BackupSettings;
    use crate::services::storage::LocalBlobStore;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        pool: DynDatabasePool,
        service: Arc<ImportService>,
        _dir: TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool.execute("INSERT INTO users (email, name, role) VALUES ('admin@example.com', 'Admin', 'admin')")
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        let backups = Arc::new(BackupService::new(
            SqlxBackupFileRepository::boxed(pool.clone()),
            SqlxSnapshotRepository::boxed(pool.clone()),
            Arc::new(LocalBlobStore::new(dir.path())),
            BackupSettings::default(),
        ));
        let service = Arc::new(ImportService::new(
            ProgressStore::new(Duration::from_millis(20)),
            SqlxImportLogRepository::boxed(pool.clone()),
            ImportRepositories::sqlx(pool.clone()),
            backups,
            ImportSettings {
                batch_size: 3,
                default_policy: ConflictPolicy::Skip,
                max_entry_bytes: codec::DEFAULT_MAX_ENTRY_BYTES,
            },
        ));
        Fixture {
            pool,
            service,
            _dir: dir,
        }
    }

    async fn wait_finished(service: &ImportService, id: &str) -> JobProgress {
        for _ in 0..200 {
            let job = service.status(id).await.unwrap();
            if job.is_finished() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("import {} did not finish", id);
    }

    async fn count(pool: &DynDatabasePool, table: &str) -> i64 {
        use sqlx::Row;
        sqlx::query(&format!("SELECT COUNT(*) AS c FROM {}", table))
            .fetch_one(pool.sqlite())
            .await
            .unwrap()
            .get("c")
    }

    #[tokio::test]
    async fn test_csv_with_one_invalid_row() {
        let fx = setup().await;
        let mut csv = String::from("name,language\n");
        for i in 1..=10 {
            if i == 4 {
                csv.push_str(",en\n");
            } else {
                csv.push_str(&format!("\"Quote number {}, long enough to import\",en\n", i));
            }
        }

        let accepted = fx
            .service
            .submit(
                DataType::Entity(EntityType::Quotes),
                ImportRequest {
                    data: Some(Value::String(csv)),
                    format: Some("csv".into()),
                    filename: Some("quotes.csv".into()),
                    ..ImportRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(accepted.success);
        assert!(accepted.progress_url.ends_with(&accepted.import_id));

        let job = wait_finished(&fx.service, &accepted.import_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_records, 10);
        assert_eq!(job.successful_records, 9);
        assert_eq!(job.failed_records, 1);
        assert_eq!(count(&fx.pool, "quotes").await, 9);

        let report = fx.service.report(&accepted.import_id, None).await.unwrap();
        assert_eq!(report.format, ReportFormat::Ndjson);
        let text = String::from_utf8(report.bytes).unwrap();
        let lines: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "failure");
        assert_eq!(lines[0]["index"], 4);
        assert_eq!(lines[0]["entity"], "quotes");
        assert!(lines[0]["reason"].as_str().unwrap().contains("name is required"));
        assert_eq!(lines[0]["item"], json!({"language": "en"}));

        let csv_report = fx
            .service
            .report(&accepted.import_id, Some(ReportFormat::Csv))
            .await
            .unwrap();
        assert!(String::from_utf8(csv_report.bytes).unwrap().contains("failure,quotes,4,"));

        let history = fx.service.history(&ListParams::default()).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.items[0].status, JobStatus::Completed);
        assert_eq!(history.items[0].failed_records, 1);
    }

    #[tokio::test]
    async fn test_bundle_imports_in_dependency_order() {
        let fx = setup().await;
        let bundle = json!({
            "quotes": [
                {"id": 500, "name": "First say to yourself what you would be.", "author_id": 70, "user_id": 30}
            ],
            "users": [{"id": 30, "email": "epi@example.com", "name": "Epi"}],
            "authors": [{"id": 70, "name": "Epictetus"}],
            "quote_tags": [{"quote_id": 500, "tag_name": "discipline"}],
            "comments": [{"body": "ignored"}]
        });

        let accepted = fx
            .service
            .submit(
                DataType::All,
                ImportRequest {
                    bundle: Some(bundle),
                    ..ImportRequest::default()
                },
            )
            .await
            .unwrap();
        let job = wait_finished(&fx.service, &accepted.import_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed_records, 0, "{:?}", job.errors);
        assert_eq!(job.successful_records, 4);
        assert!(job.warnings.iter().any(|w| w.contains("comments")));
        assert_eq!(count(&fx.pool, "quote_tags").await, 1);
    }

    #[tokio::test]
    async fn test_format_error_creates_no_job() {
        let fx = setup().await;
        let result = fx
            .service
            .submit(
                DataType::Entity(EntityType::Tags),
                ImportRequest {
                    data: Some(Value::String("{not json".into())),
                    ..ImportRequest::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ImportError::Format(_))));
        assert!(fx.service.progress().is_empty());
        assert_eq!(count(&fx.pool, "import_logs").await, 0);

        let empty = fx
            .service
            .submit(
                DataType::Entity(EntityType::Tags),
                ImportRequest {
                    data: Some(json!([])),
                    ..ImportRequest::default()
                },
            )
            .await;
        assert!(matches!(empty, Err(ImportError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_cancelled_job_counts_every_row() {
        let fx = setup().await;
        let rows: Vec<_> = (0..7).map(|i| json!({"name": format!("tag-{}", i)})).collect();
        let decoded = decode_entity(
            EntityType::Tags,
            &ImportRequest {
                data: Some(Value::Array(rows)),
                ..ImportRequest::default()
            },
            codec::DEFAULT_MAX_ENTRY_BYTES,
        )
        .unwrap();

        let job = JobProgress::new("cancel-me", JobKind::Import, DataType::Entity(EntityType::Tags), 7);
        let log = ImportLog::from_job(&job, None, "json", ImportOptions::default());
        fx.service.logs.create(&log).await.unwrap();
        fx.service.progress.create(job).unwrap();
        fx.service.cancel("cancel-me").unwrap();

        fx.service
            .run("cancel-me", decoded.bundle, Vec::new(), ImportOptions::default(), None, Format::Json)
            .await;

        let job = fx.service.status("cancel-me").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed_records, 7);
        assert!(job.counters_consistent());

        let report = fx.service.report("cancel-me", None).await.unwrap();
        let text = String::from_utf8(report.bytes).unwrap();
        let failures = text
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap())
            .filter(|line| line["kind"] == "failure")
            .count();
        assert_eq!(failures as u64, job.failed_records);
        assert!(matches!(
            fx.service.cancel("cancel-me"),
            Err(ImportError::AlreadyFinished(_))
        ));
        assert!(matches!(fx.service.cancel("nope"), Err(ImportError::NotFound(_))));
    }
}
