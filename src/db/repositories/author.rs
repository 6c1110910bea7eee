//! Author repository
//!
//! Database operations for authors. Name lookups ignore case and
//! surrounding whitespace.

use crate::db::DynDatabasePool;
use crate::models::AuthorRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use super::{json_text, parse_json_text};

/// Author repository trait
#[async_trait]
pub trait AuthorRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<AuthorRecord>>;

    async fn exists(&self, id: i64) -> Result<bool>;

    /// Case-insensitive lookup by trimmed name
    async fn find_by_name(&self, name: &str) -> Result<Option<AuthorRecord>>;

    async fn insert(&self, author: &AuthorRecord) -> Result<i64>;

    async fn update(&self, id: i64, author: &AuthorRecord) -> Result<()>;
}

/// SQLx-based author repository implementation
pub struct SqlxAuthorRepository {
    pool: DynDatabasePool,
}

impl SqlxAuthorRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn AuthorRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl AuthorRepository for SqlxAuthorRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<AuthorRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_AUTHOR))
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get author by ID")?;
        Ok(row.as_ref().map(row_to_author))
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM authors WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to check author existence")?;
        Ok(row.is_some())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<AuthorRecord>> {
        let row = sqlx::query(&format!(
            "{} WHERE trim(name) = ? COLLATE NOCASE ORDER BY id LIMIT 1",
            SELECT_AUTHOR
        ))
        .bind(name.trim())
        .fetch_optional(self.pool.sqlite())
        .await
        .context("Failed to get author by name")?;
        Ok(row.as_ref().map(row_to_author))
    }

    async fn insert(&self, author: &AuthorRecord) -> Result<i64> {
        insert_author(self.pool.sqlite(), author).await
    }

    async fn update(&self, id: i64, author: &AuthorRecord) -> Result<()> {
        update_author(self.pool.sqlite(), id, author).await
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_AUTHOR: &str = r#"
    SELECT id, name, is_fictional, birth_date, birth_location, death_date, death_location,
           job, description, image_url, socials, views_count, likes_count, created_at, updated_at
    FROM authors
"#;

async fn insert_author(pool: &SqlitePool, author: &AuthorRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO authors (name, is_fictional, birth_date, birth_location, death_date,
                             death_location, job, description, image_url, socials,
                             views_count, likes_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP),
                COALESCE(?, CURRENT_TIMESTAMP))
        "#,
    )
    .bind(author.name.as_deref().map(str::trim))
    .bind(author.is_fictional.unwrap_or(false))
    .bind(&author.birth_date)
    .bind(&author.birth_location)
    .bind(&author.death_date)
    .bind(&author.death_location)
    .bind(&author.job)
    .bind(&author.description)
    .bind(&author.image_url)
    .bind(json_text(&author.socials))
    .bind(author.views_count.unwrap_or(0))
    .bind(author.likes_count.unwrap_or(0))
    .bind(&author.created_at)
    .bind(&author.updated_at)
    .execute(pool)
    .await
    .context("Failed to insert author")?;

    Ok(result.last_insert_rowid())
}

async fn update_author(pool: &SqlitePool, id: i64, author: &AuthorRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE authors
        SET name = ?, is_fictional = ?, birth_date = ?, birth_location = ?, death_date = ?,
            death_location = ?, job = ?, description = ?, image_url = ?, socials = ?,
            views_count = ?, likes_count = ?, created_at = COALESCE(?, created_at),
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(author.name.as_deref().map(str::trim))
    .bind(author.is_fictional.unwrap_or(false))
    .bind(&author.birth_date)
    .bind(&author.birth_location)
    .bind(&author.death_date)
    .bind(&author.death_location)
    .bind(&author.job)
    .bind(&author.description)
    .bind(&author.image_url)
    .bind(json_text(&author.socials))
    .bind(author.views_count.unwrap_or(0))
    .bind(author.likes_count.unwrap_or(0))
    .bind(&author.created_at)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update author")?;

    Ok(())
}

fn row_to_author(row: &SqliteRow) -> AuthorRecord {
    AuthorRecord {
        id: Some(row.get("id")),
        name: Some(row.get("name")),
        is_fictional: Some(row.get("is_fictional")),
        birth_date: row.get("birth_date"),
        birth_location: row.get("birth_location"),
        death_date: row.get("death_date"),
        death_location: row.get("death_location"),
        job: row.get("job"),
        description: row.get("description"),
        image_url: row.get("image_url"),
        socials: parse_json_text(row.get("socials")),
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

    async fn setup() -> Arc<dyn AuthorRepository> {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        SqlxAuthorRepository::boxed(pool)
    }

    #[tokio::test]
    async fn test_find_by_name_ignores_case_and_whitespace() {
        let repo = setup().await;
        let id = repo.insert(&AuthorRecord::named("Ada Lovelace")).await.unwrap();

        let found = repo.find_by_name("  ada LOVELACE ").await.unwrap().unwrap();
        assert_eq!(found.id, Some(id));
        assert!(repo.find_by_name("Ada").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_socials_stored_as_json() {
        let repo = setup().await;
        let mut author = AuthorRecord::named("Marcus Aurelius");
        author.socials = Some(serde_json::json!({"wikipedia": "https://example.org/ma"}));
        let id = repo.insert(&author).await.unwrap();

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.socials, author.socials);
        assert_eq!(stored.is_fictional, Some(false));
        assert_eq!(stored.views_count, Some(0));
    }
}
