//! Backup file repository
//!
//! Metadata rows for stored artifacts (`backup_files`). The blobs
//! themselves live in blob storage under `file_key`.

use crate::db::DynDatabasePool;
use crate::models::{BackupFile, ListParams, NewBackupFile, StorageStatus};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Backup file repository trait
#[async_trait]
pub trait BackupFileRepository: Send + Sync {
    async fn create(&self, file: &NewBackupFile) -> Result<BackupFile>;

    async fn set_status(&self, id: i64, status: StorageStatus) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<BackupFile>>;

    /// Newest first, optionally filtered by `metadata.kind`
    async fn list(&self, params: &ListParams, kind: Option<&str>)
        -> Result<(Vec<BackupFile>, i64)>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Bump `access_count` and stamp `last_accessed_at`
    async fn record_access(&self, id: i64) -> Result<()>;

    /// Latest stored report for an import job
    async fn find_report(&self, import_log_id: &str) -> Result<Option<BackupFile>>;

    /// Rows that carry an expiry, oldest expiry first
    async fn list_expiring(&self) -> Result<Vec<BackupFile>>;
}

/// SQLx-based backup file repository implementation
pub struct SqlxBackupFileRepository {
    pool: DynDatabasePool,
}

impl SqlxBackupFileRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn BackupFileRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl BackupFileRepository for SqlxBackupFileRepository {
    async fn create(&self, file: &NewBackupFile) -> Result<BackupFile> {
        let pool = self.pool.sqlite();
        let id = insert_backup_file(pool, file).await?;
        get_backup_file(pool, id)
            .await?
            .ok_or_else(|| anyhow!("Backup file {} vanished after insert", id))
    }

    async fn set_status(&self, id: i64, status: StorageStatus) -> Result<()> {
        sqlx::query("UPDATE backup_files SET storage_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to update backup status")?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<BackupFile>> {
        get_backup_file(self.pool.sqlite(), id).await
    }

    async fn list(
        &self,
        params: &ListParams,
        kind: Option<&str>,
    ) -> Result<(Vec<BackupFile>, i64)> {
        let pool = self.pool.sqlite();
        let rows = sqlx::query(&format!(
            "{} WHERE (? IS NULL OR json_extract(metadata, '$.kind') = ?) \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_BACKUP_FILE
        ))
        .bind(kind)
        .bind(kind)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(pool)
        .await
        .context("Failed to list backup files")?;

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM backup_files \
             WHERE (? IS NULL OR json_extract(metadata, '$.kind') = ?)",
        )
        .bind(kind)
        .bind(kind)
        .fetch_one(pool)
        .await
        .context("Failed to count backup files")?
        .get("count");

        let files = rows.iter().map(row_to_backup_file).collect::<Result<Vec<_>>>()?;
        Ok((files, total))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backup_files WHERE id = ?")
            .bind(id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to delete backup file")?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_access(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE backup_files SET access_count = access_count + 1, last_accessed_at = ? \
             WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to record backup access")?;
        Ok(())
    }

    async fn find_report(&self, import_log_id: &str) -> Result<Option<BackupFile>> {
        let row = sqlx::query(&format!(
            "{} WHERE import_log_id = ? AND json_extract(metadata, '$.kind') = 'import-report' \
             AND storage_status = 'stored' ORDER BY id DESC LIMIT 1",
            SELECT_BACKUP_FILE
        ))
        .bind(import_log_id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to find import report")?;
        row.as_ref().map(row_to_backup_file).transpose()
    }

    async fn list_expiring(&self) -> Result<Vec<BackupFile>> {
        let rows = sqlx::query(&format!(
            "{} WHERE expires_at IS NOT NULL ORDER BY expires_at",
            SELECT_BACKUP_FILE
        ))
        .fetch_all(self.pool.sqlite())
        .await
        .context("Failed to list expiring backup files")?;
        rows.iter().map(row_to_backup_file).collect()
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_BACKUP_FILE: &str = r#"
    SELECT id, file_key, filename, file_path, format, data_type, record_count, file_size,
           compressed_size, content_hash, compression_type, storage_status, export_log_id,
           import_log_id, metadata, expires_at, access_count, last_accessed_at, created_at
    FROM backup_files
"#;

async fn insert_backup_file(pool: &SqlitePool, file: &NewBackupFile) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO backup_files (file_key, filename, file_path, format, data_type,
                                  record_count, file_size, compressed_size, content_hash,
                                  compression_type, storage_status, export_log_id,
                                  import_log_id, metadata, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file.file_key)
    .bind(&file.filename)
    .bind(&file.file_path)
    .bind(&file.format)
    .bind(&file.data_type)
    .bind(file.record_count as i64)
    .bind(file.file_size as i64)
    .bind(file.compressed_size.map(|s| s as i64))
    .bind(&file.content_hash)
    .bind(file.compression_type.as_str())
    .bind(file.storage_status.as_str())
    .bind(&file.export_log_id)
    .bind(&file.import_log_id)
    .bind(file.metadata.to_string())
    .bind(file.expires_at)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("Failed to insert backup file")?;

    Ok(result.last_insert_rowid())
}

async fn get_backup_file(pool: &SqlitePool, id: i64) -> Result<Option<BackupFile>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_BACKUP_FILE))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get backup file")?;
    row.as_ref().map(row_to_backup_file).transpose()
}

fn row_to_backup_file(row: &SqliteRow) -> Result<BackupFile> {
    let compression: String = row.get("compression_type");
    let status: String = row.get("storage_status");
    let metadata: String = row.get("metadata");

    Ok(BackupFile {
        id: row.get("id"),
        file_key: row.get("file_key"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        format: row.get("format"),
        data_type: row.get("data_type"),
        record_count: row.get::<i64, _>("record_count") as u64,
        file_size: row.get::<i64, _>("file_size") as u64,
        compressed_size: row.get::<Option<i64>, _>("compressed_size").map(|s| s as u64),
        content_hash: row.get("content_hash"),
        compression_type: compression.parse().map_err(|e: String| anyhow!(e))?,
        storage_status: status.parse().map_err(|e: String| anyhow!(e))?,
        export_log_id: row.get("export_log_id"),
        import_log_id: row.get("import_log_id"),
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        expires_at: row.get("expires_at"),
        access_count: row.get("access_count"),
        last_accessed_at: row.get("last_accessed_at"),
        created_at: row.get("created_at"),
    })
}
