//! Reference repository
//!
//! Database operations for `quote_references`.

use crate::db::DynDatabasePool;
use crate::models::ReferenceRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use super::{json_text, parse_json_text};

/// Reference repository trait
#[async_trait]
pub trait ReferenceRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<ReferenceRecord>>;

    async fn exists(&self, id: i64) -> Result<bool>;

    /// Case-insensitive lookup by trimmed name
    async fn find_by_name(&self, name: &str) -> Result<Option<ReferenceRecord>>;

    async fn insert(&self, reference: &ReferenceRecord) -> Result<i64>;

    async fn update(&self, id: i64, reference: &ReferenceRecord) -> Result<()>;
}

/// SQLx-based reference repository implementation
pub struct SqlxReferenceRepository {
    pool: DynDatabasePool,
}

impl SqlxReferenceRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ReferenceRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ReferenceRepository for SqlxReferenceRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<ReferenceRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_REFERENCE))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get reference by ID")?;
        Ok(row.as_ref().map(row_to_reference))
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM quote_references WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to check reference existence")?;
        Ok(row.is_some())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ReferenceRecord>> {
        let row = sqlx::query(&format!(
            "{} WHERE trim(name) = ? COLLATE NOCASE ORDER BY id LIMIT 1",
            SELECT_REFERENCE
        ))
        .bind(name.trim())
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get reference by name")?;
        Ok(row.as_ref().map(row_to_reference))
    }

    async fn insert(&self, reference: &ReferenceRecord) -> Result<i64> {
        insert_reference(self.pool.sqlite(), reference).await
    }

    async fn update(&self, id: i64, reference: &ReferenceRecord) -> Result<()> {
        update_reference(self.pool.sqlite(), id, reference).await
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_REFERENCE: &str = r#"
    SELECT id, name, primary_type, secondary_type, original_language, release_date,
           description, image_url, urls, views_count, likes_count, created_at, updated_at
    FROM quote_references
"#;

async fn insert_reference(pool: &SqlitePool, reference: &ReferenceRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO quote_references (name, primary_type, secondary_type, original_language,
                                      release_date, description, image_url, urls,
                                      views_count, likes_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP),
                COALESCE(?, CURRENT_TIMESTAMP))
        "#,
    )
    .bind(reference.name.as_deref().map(str::trim))
    .bind(reference.primary_type_or_default())
    .bind(&reference.secondary_type)
    .bind(&reference.original_language)
    .bind(&reference.release_date)
    .bind(&reference.description)
    .bind(&reference.image_url)
    .bind(json_text(&reference.urls))
    .bind(reference.views_count.unwrap_or(0))
    .bind(reference.likes_count.unwrap_or(0))
    .bind(&reference.created_at)
    .bind(&reference.updated_at)
    .execute(pool)
    .await
    .context("Failed to insert reference")?;

    Ok(result.last_insert_rowid())
}

async fn update_reference(pool: &SqlitePool, id: i64, reference: &ReferenceRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE quote_references
        SET name = ?, primary_type = ?, secondary_type = ?, original_language = ?,
            release_date = ?, description = ?, image_url = ?, urls = ?, views_count = ?,
            likes_count = ?, created_at = COALESCE(?, created_at),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(reference.name.as_deref().map(str::trim))
    .bind(reference.primary_type_or_default())
    .bind(&reference.secondary_type)
    .bind(&reference.original_language)
    .bind(&reference.release_date)
    .bind(&reference.description)
    .bind(&reference.image_url)
    .bind(json_text(&reference.urls))
    .bind(reference.views_count.unwrap_or(0))
    .bind(reference.likes_count.unwrap_or(0))
    .bind(&reference.created_at)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update reference")?;

    Ok(())
}

fn row_to_reference(row: &SqliteRow) -> ReferenceRecord {
    ReferenceRecord {
        id: Some(row.get("id")),
        name: Some(row.get("name")),
        primary_type: Some(row.get("primary_type")),
        secondary_type: row.get("secondary_type"),
        original_language: row.get("original_language"),
        release_date: row.get("release_date"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        urls: parse_json_text(row.get("urls")),
        views_count: Some(row.get("views_count")),
        likes_count: Some(row.get("likes_count")),
        created_at: Some(row.get("created_at")),
        updated_at: Some(row.get("updated_at")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations::run_migrations};

    #[tokio::test]
    async fn test_insert_defaults_primary_type() {
        let pool = create_test_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repo = SqlxReferenceRepository::boxed(pool);

        let id = repo.insert(&ReferenceRecord::named("Meditations")).await.unwrap();
        let stored = repo.find_by_name("MEDITATIONS").await.unwrap().unwrap();

        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.primary_type.as_deref(), Some("other"));
        assert!(stored.urls.is_none());
    }
}
