//! Tag repository
//!
//! Database operations for tags.
//!
//! This module provides:
//! - `TagRepository` trait defining the interface for tag data access
//! - `SqlxTagRepository` implementing the trait for SQLite

use crate::db::DynDatabasePool;
use crate::models::TagRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Tag repository trait
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Get tag by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<TagRecord>>;

    async fn exists(&self, id: i64) -> Result<bool>;

    /// Get tag by name, ignoring case
    async fn find_by_name(&self, name: &str) -> Result<Option<TagRecord>>;

    /// Insert a tag, returning the new ID
    async fn insert(&self, tag: &TagRecord) -> Result<i64>;

    async fn update(&self, id: i64, tag: &TagRecord) -> Result<()>;

    /// Reuse the tag with this name or create it.
    ///
    /// Returns the tag ID and whether it was created.
    async fn find_or_create(&self, name: &str) -> Result<(i64, bool)>;
}

/// SQLx-based tag repository implementation
pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    /// Create a new SQLx tag repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<TagRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_TAG))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get tag by ID")?;
        Ok(row.as_ref().map(row_to_tag))
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM tags WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to check tag existence")?;
        Ok(row.is_some())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<TagRecord>> {
        get_tag_by_name(self.pool.sqlite(), name).await
    }

    async fn insert(&self, tag: &TagRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO tags (name, description, category, color, created_at, updated_at)
            VALUES (?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP), COALESCE(?, CURRENT_TIMESTAMP))
            "#,
        )
        .bind(tag.name.as_deref().map(str::trim))
        .bind(&tag.description)
        .bind(&tag.category)
        .bind(tag.color_or_default())
        .bind(&tag.created_at)
        .bind(&tag.updated_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to insert tag")?;

        Ok(result.last_insert_rowid())
    }

    async fn update(&self, id: i64, tag: &TagRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tags
            SET name = ?, description = ?, category = ?, color = ?,
                created_at = COALESCE(?, created_at), updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(tag.name.as_deref().map(str::trim))
        .bind(&tag.description)
        .bind(&tag.category)
        .bind(tag.color_or_default())
        .bind(&tag.created_at)
        .bind(id)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to update tag")?;

        Ok(())
    }

    async fn find_or_create(&self, name: &str) -> Result<(i64, bool)> {
        find_or_create_tag(self.pool.sqlite(), name).await
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_TAG: &str =
    "SELECT id, name, description, category, color, created_at, updated_at FROM tags";

async fn get_tag_by_name(pool: &SqlitePool, name: &str) -> Result<Option<TagRecord>> {
    let row = sqlx::query(&format!("{} WHERE name = ? COLLATE NOCASE", SELECT_TAG))
        .bind(name.trim())
        .fetch_optional(pool)
        .await
        .context("Failed to get tag by name")?;
    Ok(row.as_ref().map(row_to_tag))
}

async fn find_or_create_tag(pool: &SqlitePool, name: &str) -> Result<(i64, bool)> {
    let name = name.trim();
    let inserted = sqlx::query("INSERT OR IGNORE INTO tags (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .context("Failed to create tag")?;

    if inserted.rows_affected() > 0 {
        return Ok((inserted.last_insert_rowid(), true));
    }

    let row = sqlx::query("SELECT id FROM tags WHERE name = ? COLLATE NOCASE")
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to load existing tag")?;
    Ok((row.get("id"), false))
}

fn row_to_tag(row: &SqliteRow) -> TagRecord {
    TagRecord {
        id: Some(row.get("id")),
        name: Some(row.get("name")),
        description: row.get("description"),
        category: row.get("category"),
        color: Some(row.get("color")),
        created_at: Some(row.get("created_at")),
        updated_at: Some(row.get("updated_at")),
    }
}
