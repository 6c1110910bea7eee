//! Export log repository

use crate::db::DynDatabasePool;
use crate::models::{ExportLog, ListParams};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

/// Export log repository trait
#[async_trait]
pub trait ExportLogRepository: Send + Sync {
    async fn create(&self, log: &ExportLog) -> Result<()>;

    async fn finish(&self, log: &ExportLog) -> Result<()>;

    async fn list(&self, params: &ListParams) -> Result<(Vec<ExportLog>, i64)>;
}

/// SQLx-based export log repository implementation
pub struct SqlxExportLogRepository {
    pool: DynDatabasePool,
}

impl SqlxExportLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ExportLogRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ExportLogRepository for SqlxExportLogRepository {
    async fn create(&self, log: &ExportLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO export_logs (id, filename, format, data_type, record_count, file_size,
                                     status, error, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.filename)
        .bind(&log.format)
        .bind(log.data_type.as_str())
        .bind(log.record_count as i64)
        .bind(log.file_size as i64)
        .bind(log.status.as_str())
        .bind(&log.error)
        .bind(log.started_at)
        .bind(log.completed_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to create export log")?;
        Ok(())
    }

    async fn finish(&self, log: &ExportLog) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE export_logs
            SET filename = ?, record_count = ?, file_size = ?, status = ?, error = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&log.filename)
        .bind(log.record_count as i64)
        .bind(log.file_size as i64)
        .bind(log.status.as_str())
        .bind(&log.error)
        .bind(log.completed_at)
        .bind(&log.id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to update export log")?;
        Ok(())
    }

    async fn list(&self, params: &ListParams) -> Result<(Vec<ExportLog>, i64)> {
        let pool = self.pool.sqlite();
        let rows = sqlx::query(
            r#"
            SELECT id, filename, format, data_type, record_count, file_size, status, error,
                   started_at, completed_at
            FROM export_logs
            ORDER BY started_at DESC, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list export logs")?;

        let total: i64 = sqlx::query("SELECT COUNT(*) AS count FROM export_logs")
            .fetch_one(pool)
            .await
            .context("Failed to count export logs")?
            .get("count");

        let logs = rows.iter().map(row_to_export_log).collect::<Result<Vec<_>>>()?;
        Ok((logs, total))
    }
}

fn row_to_export_log(row: &SqliteRow) -> Result<ExportLog> {
    let data_type: String = row.get("data_type");
    let status: String = row.get("status");

    Ok(ExportLog {
        id: row.get("id"),
        filename: row.get("filename"),
        format: row.get("format"),
        data_type: data_type.parse().map_err(|e: String| anyhow!(e))?,
        record_count: row.get::<i64, _>("record_count") as u64,
        file_size: row.get::<i64, _>("file_size") as u64,
        status: status.parse().map_err(|e: String| anyhow!(e))?,
        error: row.get("error"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}
