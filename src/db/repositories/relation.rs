//! Relation repository
//!
//! Idempotent writes for link tables (likes, collections, collection
//! membership, views). Every insert is `INSERT OR IGNORE`, so replaying
//! the same rows leaves the tables unchanged.

use crate::db::DynDatabasePool;
use crate::models::{QuoteViewRecord, UserCollectionRecord, UserLikeRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

/// Relation repository trait
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Record a like; returns false if it already existed
    async fn add_like(&self, like: &UserLikeRecord) -> Result<bool>;

    async fn collection_exists(&self, id: i64) -> Result<bool>;

    /// Create the collection unless `(user_id, name)` exists; returns its ID
    /// and whether it was created
    async fn upsert_collection(&self, collection: &UserCollectionRecord) -> Result<(i64, bool)>;

    async fn add_collection_quote(
        &self,
        collection_id: i64,
        quote_id: i64,
        added_at: Option<&str>,
    ) -> Result<bool>;

    async fn add_view(&self, view: &QuoteViewRecord) -> Result<bool>;
}

/// SQLx-based relation repository implementation
pub struct SqlxRelationRepository {
    pool: DynDatabasePool,
}

impl SqlxRelationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn RelationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl RelationRepository for SqlxRelationRepository {
    async fn add_like(&self, like: &UserLikeRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_likes (user_id, likeable_type, likeable_id, created_at)
            VALUES (?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP))
            "#,
        )
        .bind(like.user_id)
        .bind(&like.likeable_type)
        .bind(like.likeable_id)
        .bind(&like.created_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to insert like")?;
        Ok(result.rows_affected() > 0)
    }

    async fn collection_exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM user_collections WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to check collection existence")?;
        Ok(row.is_some())
    }

    async fn upsert_collection(&self, collection: &UserCollectionRecord) -> Result<(i64, bool)> {
        let pool = self.pool.sqlite();
        let name = collection.name.as_deref().map(str::trim);

        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO user_collections (user_id, name, description, is_public,
                                                    created_at, updated_at)
            VALUES (?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP), COALESCE(?, CURRENT_TIMESTAMP))
            "#,
        )
        .bind(collection.user_id)
        .bind(name)
        .bind(&collection.description)
        .bind(collection.is_public.unwrap_or(false))
        .bind(&collection.created_at)
        .bind(&collection.updated_at)
        .execute(pool)
        .await
        .context("Failed to insert collection")?
        .rows_affected();

        let row = sqlx::query("SELECT id FROM user_collections WHERE user_id = ? AND name = ?")
            .bind(collection.user_id)
            .bind(name)
            .fetch_one(pool)
            .await
            .context("Failed to load collection")?;
        Ok((row.get("id"), inserted > 0))
    }

    async fn add_collection_quote(
        &self,
        collection_id: i64,
        quote_id: i64,
        added_at: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO collection_quotes (collection_id, quote_id, added_at)
            VALUES (?, ?, COALESCE(?, CURRENT_TIMESTAMP))
            "#,
        )
        .bind(collection_id)
        .bind(quote_id)
        .bind(added_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to add quote to collection")?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_view(&self, view: &QuoteViewRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO quote_views (quote_id, user_id, ip_address, viewed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(view.quote_id)
        .bind(view.user_id)
        .bind(view.ip_address.as_deref().unwrap_or(""))
        .bind(&view.viewed_at)
        .execute(self.pool.sqlite())
        .await
        .context("Failed to record quote view")?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations::run_migrations};

    async fn setup() -> Arc<dyn RelationRepository> {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool.execute("INSERT INTO users (email, name) VALUES ('r@example.com', 'Reader')")
            .await
            .unwrap();
        pool.execute("INSERT INTO quotes (name, user_id) VALUES ('Knowledge is power indeed', 1)")
            .await
            .unwrap();
        SqlxRelationRepository::boxed(pool)
    }

    #[tokio::test]
    async fn test_upsert_collection_returns_same_id() {
        let repo = setup().await;
        let collection = UserCollectionRecord {
            user_id: Some(1),
            name: Some("Favorites".to_string()),
            ..UserCollectionRecord::default()
        };

        let (first, created) = repo.upsert_collection(&collection).await.unwrap();
        let (second, created_again) = repo.upsert_collection(&collection).await.unwrap();
        assert_eq!(first, second);
        assert!(created);
        assert!(!created_again);
        assert!(repo.collection_exists(first).await.unwrap());

        assert!(repo.add_collection_quote(first, 1, None).await.unwrap());
        assert!(!repo.add_collection_quote(first, 1, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_view_deduplicates() {
        let repo = setup().await;
        let view = QuoteViewRecord {
            quote_id: Some(1),
            viewed_at: Some("2024-01-01 10:00:00".to_string()),
            ..QuoteViewRecord::default()
        };

        assert!(repo.add_view(&view).await.unwrap());
        assert!(!repo.add_view(&view).await.unwrap());
    }
}
