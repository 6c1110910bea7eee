//! User repository
//!
//! Database operations for users.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite

use crate::db::DynDatabasePool;
use crate::models::UserRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Get user by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    /// Check whether a user with this ID exists
    async fn exists(&self, id: i64) -> Result<bool>;

    /// Get user by exact email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Lowest-id user with the admin role
    async fn first_admin_id(&self) -> Result<Option<i64>>;

    /// Insert a user, returning the new ID
    async fn insert(&self, user: &UserRecord) -> Result<i64>;

    /// Replace the stored fields of a user
    async fn update(&self, id: i64, user: &UserRecord) -> Result<()>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        get_user_by_id(self.pool.sqlite(), id).await
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to check user existence")?;
        Ok(row.is_some())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(&format!("{} WHERE email = ?", SELECT_USER))
            .bind(email.trim())
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to get user by email")?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn first_admin_id(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM users WHERE role = 'admin' ORDER BY id LIMIT 1")
            .fetch_optional(self.pool.sqlite())
            .await
            .context("Failed to find admin user")?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn insert(&self, user: &UserRecord) -> Result<i64> {
        insert_user(self.pool.sqlite(), user).await
    }

    async fn update(&self, id: i64, user: &UserRecord) -> Result<()> {
        update_user(self.pool.sqlite(), id, user).await
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

const SELECT_USER: &str = r#"
    SELECT id, email, name, role, language, biography, job, location, avatar_url,
           is_active, email_verified, created_at, updated_at
    FROM users
"#;

async fn get_user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<UserRecord>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_USER))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;
    Ok(row.as_ref().map(row_to_user))
}

async fn insert_user(pool: &SqlitePool, user: &UserRecord) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO users (email, name, role, language, biography, job, location, avatar_url,
                           is_active, email_verified, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, COALESCE(?, CURRENT_TIMESTAMP),
                COALESCE(?, CURRENT_TIMESTAMP))
        "#,
    )
    .bind(user.email.as_deref().map(str::trim))
    .bind(user.name.as_deref().map(str::trim))
    .bind(user.role_or_default())
    .bind(&user.language)
    .bind(&user.biography)
    .bind(&user.job)
    .bind(&user.location)
    .bind(&user.avatar_url)
    .bind(user.is_active.unwrap_or(true))
    .bind(user.email_verified.unwrap_or(false))
    .bind(&user.created_at)
    .bind(&user.updated_at)
    .execute(pool)
    .await
    .context("Failed to insert user")?;

    Ok(result.last_insert_rowid())
}

async fn update_user(pool: &SqlitePool, id: i64, user: &UserRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = ?, name = ?, role = ?, language = ?, biography = ?, job = ?,
            location = ?, avatar_url = ?, is_active = ?, email_verified = ?,
            created_at = COALESCE(?, created_at), updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(user.email.as_deref().map(str::trim))
    .bind(user.name.as_deref().map(str::trim))
    .bind(user.role_or_default())
    .bind(&user.language)
    .bind(&user.biography)
    .bind(&user.job)
    .bind(&user.location)
    .bind(&user.avatar_url)
    .bind(user.is_active.unwrap_or(true))
    .bind(user.email_verified.unwrap_or(false))
    .bind(&user.created_at)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update user")?;

    Ok(())
}

fn row_to_user(row: &SqliteRow) -> UserRecord {
    UserRecord {
        id: Some(row.get("id")),
        email: Some(row.get("email")),
        name: Some(row.get("name")),
        role: Some(row.get("role")),
        language: row.get("language"),
        biography: row.get("biography"),
        job: row.get("job"),
        location: row.get("location"),
        avatar_url: row.get("avatar_url"),
        is_active: Some(row.get("is_active")),
        email_verified: Some(row.get("email_verified")),
        created_at: Some(row.get("created_at")),
        updated_at: Some(row.get("updated_at")),
    }
}
