//! Quote repository
//!
//! Database operations for quotes and their tag links. Records passed to
//! `insert`/`update` must already carry store ids for every foreign key.

use crate::db::DynDatabasePool;
use crate::models::QuoteRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Quote repository trait
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<QuoteRecord>>;

    async fn exists(&self, id: i64) -> Result<bool>;

    /// Quote with the same text (ignoring case and surrounding whitespace)
    /// attributed to the same author, or to no author when `author_id` is None
    async fn find_duplicate(&self, text: &str, author_id: Option<i64>)
        -> Result<Option<QuoteRecord>>;

    async fn insert(&self, quote: &QuoteRecord) -> Result<i64>;

    async fn update(&self, id: i64, quote: &QuoteRecord) -> Result<()>;

    /// Link a tag; returns false when the link already existed
    async fn link_tag(&self, quote_id: i64, tag_id: i64) -> Result<bool>;
}

/// SQLx-based quote repository implementation
pub struct SqlxQuoteRepository {
    pool: DynDatabasePool,
}

impl SqlxQuoteRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn QuoteRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl QuoteRepository for SqlxQuoteRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<QuoteRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_QUOTE))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get quote by ID")?;
        Ok(row.as_ref().map(row_to_quote))
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM quotes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to check quote existence")?;
        Ok(row.is_some())
    }

    async fn find_duplicate(
        &self,
        text: &str,
        author_id: Option<i64>,
    ) -> Result<Option<QuoteRecord>> {
        let row = sqlx::query(&format!(
            "{} WHERE trim(name) = ? COLLATE NOCASE AND author_id IS ? ORDER BY id LIMIT 1",
            SELECT_QUOTE
        ))
        .bind(text.trim())
        .bind(author_id)
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to look up duplicate quote")?;
        Ok(row.as_ref().map(row_to_quote))
    }

    async fn insert(&self, quote: &QuoteRecord) -> Result<i64> {
        insert_quote(self.pool.sqlite(), quote).await
    }

    async fn update(&self, id: i64, quote: &QuoteRecord) -> Result<()> {
        update_quote(self.pool.sqlite(), id, quote).await
    }

    async fn link_tag(&self, quote_id: i64, tag_id: i64) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO quote_tags (quote_id, tag_id) VALUES (?, ?)")
            .bind(quote_id)
            .bind(tag_id)
            .execute(self.pool.sqlite())
            .await
            .context("Failed to link tag to quote")?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_QUOTE: &str = r#"
    SELECT id, name, language, status, author_id, reference_id, user_id, moderator_id,
           moderated_at, rejection_reason, is_featured, views_count, likes_count,
           shares_count, created_at, updated_at
    FROM quotes
"#;

async fn insert_quote(pool: &SqlitePool, quote: &QuoteRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO quotes (name, language, status, author_id, reference_id, user_id,
                            moderator_id, moderated_at, rejection_reason, is_featured,
                            views_count, likes_count, shares_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP),
                COALESCE(?, CURRENT_TIMESTAMP))
        "#,
    )
    .bind(quote.name.as_deref().map(str::trim))
    .bind(quote.language_or_default())
    .bind(quote.status_or_default())
    .bind(quote.author_id)
    .bind(quote.reference_id)
    .bind(quote.user_id)
    .bind(quote.moderator_id)
    .bind(&quote.moderated_at)
    .bind(&quote.rejection_reason)
    .bind(quote.is_featured.unwrap_or(false))
    .bind(quote.views_count.unwrap_or(0))
    .bind(quote.likes_count.unwrap_or(0))
    .bind(quote.shares_count.unwrap_or(0))
    .bind(&quote.created_at)
    .bind(&quote.updated_at)
    .execute(pool)
    .await
    .context("Failed to insert quote")?;

    Ok(result.last_insert_rowid())
}

async fn update_quote(pool: &SqlitePool, id: i64, quote: &QuoteRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE quotes
        SET name = ?, language = ?, status = ?, author_id = ?, reference_id = ?, user_id = ?,
            moderator_id = ?, moderated_at = ?, rejection_reason = ?, is_featured = ?,
            views_count = ?, likes_count = ?, shares_count = ?,
            created_at = COALESCE(?, created_at), updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(quote.name.as_deref().map(str::trim))
    .bind(quote.language_or_default())
    .bind(quote.status_or_default())
    .bind(quote.author_id)
    .bind(quote.reference_id)
    .bind(quote.user_id)
    .bind(quote.moderator_id)
    .bind(&quote.moderated_at)
    .bind(&quote.rejection_reason)
    .bind(quote.is_featured.unwrap_or(false))
    .bind(quote.views_count.unwrap_or(0))
    .bind(quote.likes_count.unwrap_or(0))
    .bind(quote.shares_count.unwrap_or(0))
    .bind(&quote.created_at)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update quote")?;

    Ok(())
}

fn row_to_quote(row: &SqliteRow) -> QuoteRecord {
    QuoteRecord {
        id: Some(row.get("id")),
        name: Some(row.get("name")),
        language: Some(row.get("language")),
        status: Some(row.get("status")),
        author_id: row.get("author_id"),
        new_author: None,
        reference_id: row.get("reference_id"),
        new_reference: None,
        user_id: Some(row.get("user_id")),
        moderator_id: row.get("moderator_id"),
        moderated_at: row.get("moderated_at"),
        rejection_reason: row.get("rejection_reason"),
        is_featured: Some(row.get("is_featured")),
        views_count: Some(row.get("views_count")),
        likes_count: Some(row.get("likes_count")),
        shares_count: Some(row.get("shares_count")),
        tags: None,
        tag_ids: None,
        created_at: Some(row.get("created_at")),
        updated_at: Some(row.get("updated_at")),
    }
}
