//! Import log repository
//!
//! Durable mirror of import jobs (`import_logs`).

use crate::db::DynDatabasePool;
use crate::models::{ImportLog, ListParams};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

/// Import log repository trait
#[async_trait]
pub trait ImportLogRepository: Send + Sync {
    async fn create(&self, log: &ImportLog) -> Result<()>;

    /// Overwrite status, counters, messages and completion time
    async fn finish(&self, log: &ImportLog) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<ImportLog>>;

    /// Newest first, with the total row count
    async fn list(&self, params: &ListParams) -> Result<(Vec<ImportLog>, i64)>;
}

/// SQLx-based import log repository implementation
pub struct SqlxImportLogRepository {
    pool: DynDatabasePool,
}

impl SqlxImportLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ImportLogRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ImportLogRepository for SqlxImportLogRepository {
    async fn create(&self, log: &ImportLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_logs (id, data_type, filename, format, status, total_records,
                                     processed_records, successful_records, failed_records,
                                     errors, warnings, options, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(log.data_type.as_str())
        .bind(&log.filename)
        .bind(&log.format)
        .bind(log.status.as_str())
        .bind(log.total_records as i64)
        .bind(log.processed_records as i64)
        .bind(log.successful_records as i64)
        .bind(log.failed_records as i64)
        .bind(serde_json::to_string(&log.errors)?)
        .bind(serde_json::to_string(&log.warnings)?)
        .bind(serde_json::to_string(&log.options)?)
        .bind(log.started_at)
        .bind(log.completed_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to create import log")?;
        Ok(())
    }

    async fn finish(&self, log: &ImportLog) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE import_logs
            SET status = ?, total_records = ?, processed_records = ?, successful_records = ?,
                failed_records = ?, errors = ?, warnings = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(log.status.as_str())
        .bind(log.total_records as i64)
        .bind(log.processed_records as i64)
        .bind(log.successful_records as i64)
        .bind(log.failed_records as i64)
        .bind(serde_json::to_string(&log.errors)?)
        .bind(serde_json::to_string(&log.warnings)?)
        .bind(log.completed_at)
        .bind(&log.id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to update import log")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Import log {} not found", log.id));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ImportLog>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_IMPORT_LOG))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get import log")?;
        row.as_ref().map(row_to_import_log).transpose()
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<ImportLog>, i64)> {
        let pool = self.pool.sqlite();
        let rows = sqlx::query(&format!(
            "{} ORDER BY started_at DESC, id LIMIT ? OFFSET ?",
            SELECT_IMPORT_LOG
        ))
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list import logs")?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM import_logs")
            .fetch_one(pool)
            .await
            .context("Failed to count import logs")?
            .get("count");

        let logs = rows.iter().map(row_to_import_log).collect::<Result<Vec<_>>>()?;
        Ok((logs, total))
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_IMPORT_LOG: &str = r#"
    SELECT id, data_type, filename, format, status, total_records, processed_records,
           successful_records, failed_records, errors, warnings, options, started_at,
           completed_at
    FROM import_logs
"#;

fn row_to_import_log(row: &SqliteRow) -> Result<ImportLog> {
    let data_type: String = row.get("data_type");
    let status: String = row.get("status");
    let errors: String = row.get("errors");
    let warnings: String = row.get("warnings");
    let options: String = row.get("options");

    Ok(ImportLog {
        id: row.get("id"),
        data_type: data_type.parse().map_err(|e: String| anyhow!(e))?,
        filename: row.get("filename"),
        format: row.get("format"),
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        total_records: row.get::<i64, _>("total_records") as u64,
        processed_records: row.get::<i64, _>("processed_records") as u64,
        successful_records: row.get::<i64, _>("successful_records") as u64,
        failed_records: row.get::<i64, _>("failed_records") as u64,
        errors: serde_json::from_str(&errors).context("Corrupt errors column")?,
        warnings: serde_json::from_str(&warnings).context("Corrupt warnings column")?,
        options: serde_json::from_str(&options).unwrap_or_default(),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}
