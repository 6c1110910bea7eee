//! Database migrations module
//!
//! Code-based migrations for the Verbatims store. All migrations are embedded
//! directly in Rust code as SQL strings so the binary carries its own schema.
//!
//! # Usage
//!
//! ```ignore
//! use verbatims::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! Each migration is a `Migration` struct containing:
//! - `version`: Unique version number for ordering
//! - `name`: Human-readable migration name
//! - `up`: SQL statements separated by `;`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::DynDatabasePool;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements
    pub up: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, embedded in the binary.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                role VARCHAR(20) NOT NULL DEFAULT 'user',
                language VARCHAR(10),
                biography TEXT,
                job TEXT,
                location TEXT,
                avatar_url TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                email_verified INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
        "#,
    },
    Migration {
        version: 2,
        name: "create_authors_and_references",
        up: r#"
            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(200) NOT NULL,
                is_fictional INTEGER NOT NULL DEFAULT 0,
                birth_date TEXT,
                birth_location TEXT,
                death_date TEXT,
                death_location TEXT,
                job TEXT,
                description TEXT,
                image_url TEXT,
                socials TEXT,
                views_count INTEGER NOT NULL DEFAULT 0,
                likes_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_authors_name ON authors(name COLLATE NOCASE);
            CREATE TABLE IF NOT EXISTS quote_references (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(200) NOT NULL,
                primary_type VARCHAR(20) NOT NULL DEFAULT 'other',
                secondary_type TEXT,
                original_language VARCHAR(10),
                release_date TEXT,
                description TEXT,
                image_url TEXT,
                urls TEXT,
                views_count INTEGER NOT NULL DEFAULT 0,
                likes_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_references_name ON quote_references(name COLLATE NOCASE);
        "#,
    },
    Migration {
        version: 3,
        name: "create_tags_and_quotes",
        up: r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name VARCHAR(50) NOT NULL UNIQUE COLLATE NOCASE,
                description TEXT,
                category TEXT,
                color VARCHAR(7) NOT NULL DEFAULT '#687FE5',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS quotes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                language VARCHAR(5) NOT NULL DEFAULT 'en',
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                author_id INTEGER,
                reference_id INTEGER,
                user_id INTEGER NOT NULL,
                moderator_id INTEGER,
                moderated_at TEXT,
                rejection_reason TEXT,
                is_featured INTEGER NOT NULL DEFAULT 0,
                views_count INTEGER NOT NULL DEFAULT 0,
                likes_count INTEGER NOT NULL DEFAULT 0,
                shares_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (author_id) REFERENCES authors(id) ON DELETE SET NULL,
                FOREIGN KEY (reference_id) REFERENCES quote_references(id) ON DELETE SET NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (moderator_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_quotes_author_id ON quotes(author_id);
            CREATE INDEX IF NOT EXISTS idx_quotes_user_id ON quotes(user_id);
            CREATE INDEX IF NOT EXISTS idx_quotes_status ON quotes(status);
        "#,
    },
    Migration {
        version: 4,
        name: "create_relation_tables",
        up: r#"
            CREATE TABLE IF NOT EXISTS quote_tags (
                quote_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (quote_id, tag_id),
                FOREIGN KEY (quote_id) REFERENCES quotes(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS user_likes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                likeable_type VARCHAR(20) NOT NULL,
                likeable_id INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, likeable_type, likeable_id),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS user_collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name VARCHAR(100) NOT NULL,
                description TEXT,
                is_public INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS collection_quotes (
                collection_id INTEGER NOT NULL,
                quote_id INTEGER NOT NULL,
                added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection_id, quote_id),
                FOREIGN KEY (collection_id) REFERENCES user_collections(id) ON DELETE CASCADE,
                FOREIGN KEY (quote_id) REFERENCES quotes(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS quote_views (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                quote_id INTEGER NOT NULL,
                user_id INTEGER,
                ip_address VARCHAR(64) NOT NULL DEFAULT '',
                viewed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (quote_id, ip_address, viewed_at),
                FOREIGN KEY (quote_id) REFERENCES quotes(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
            );
        "#,
    },
    Migration {
        version: 5,
        name: "create_pipeline_logs",
        up: r#"
            CREATE TABLE IF NOT EXISTS import_logs (
                id VARCHAR(36) PRIMARY KEY,
                data_type VARCHAR(20) NOT NULL,
                filename TEXT,
                format VARCHAR(10) NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                total_records INTEGER NOT NULL DEFAULT 0,
                processed_records INTEGER NOT NULL DEFAULT 0,
                successful_records INTEGER NOT NULL DEFAULT 0,
                failed_records INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                warnings TEXT NOT NULL DEFAULT '[]',
                options TEXT NOT NULL DEFAULT '{}',
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_import_logs_started_at ON import_logs(started_at);
            CREATE TABLE IF NOT EXISTS export_logs (
                id VARCHAR(36) PRIMARY KEY,
                filename TEXT NOT NULL,
                format VARCHAR(10) NOT NULL,
                data_type VARCHAR(20) NOT NULL,
                record_count INTEGER NOT NULL DEFAULT 0,
                file_size INTEGER NOT NULL DEFAULT 0,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_export_logs_started_at ON export_logs(started_at);
            CREATE TABLE IF NOT EXISTS backup_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_key TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                file_path TEXT NOT NULL,
                format VARCHAR(10) NOT NULL,
                data_type VARCHAR(20) NOT NULL,
                record_count INTEGER NOT NULL DEFAULT 0,
                file_size INTEGER NOT NULL DEFAULT 0,
                compressed_size INTEGER,
                content_hash VARCHAR(64),
                compression_type VARCHAR(10) NOT NULL DEFAULT 'none',
                storage_status VARCHAR(20) NOT NULL DEFAULT 'uploading',
                export_log_id VARCHAR(36),
                import_log_id VARCHAR(36),
                metadata TEXT NOT NULL DEFAULT '{}',
                expires_at TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (export_log_id) REFERENCES export_logs(id) ON DELETE SET NULL,
                FOREIGN KEY (import_log_id) REFERENCES import_logs(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_backup_files_created_at ON backup_files(created_at);
            CREATE INDEX IF NOT EXISTS idx_backup_files_import_log_id ON backup_files(import_log_id);
        "#,
    },
];

/// Run all pending migrations
///
/// Creates the `_migrations` tracking table if needed, then applies every
/// migration whose version is not recorded yet, in order.
///
/// # Returns
///
/// Number of migrations applied
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool.sqlite()).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool.sqlite(), migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;
    Ok(())
}

async fn get_applied_migrations(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;

    for statement in split_sql_statements(migration.up) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, dropping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = get_applied_migrations(pool.sqlite()).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn migrated_pool() -> DynDatabasePool {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tag_names_unique_case_insensitive() {
        let pool = migrated_pool().await;
        let db = pool.sqlite();

        sqlx::query("INSERT INTO tags (name) VALUES ('Wisdom')")
            .execute(db)
            .await
            .expect("Failed to insert tag");
        let dup = sqlx::query("INSERT INTO tags (name) VALUES ('wisdom')")
            .execute(db)
            .await;
        assert!(dup.is_err());

        let row = sqlx::query("SELECT color FROM tags WHERE name = 'WISDOM'")
            .fetch_one(db)
            .await
            .expect("Failed to fetch tag");
        assert_eq!(row.get::<String, _>("color"), "#687FE5");
    }

    #[tokio::test]
    async fn test_quote_requires_existing_user() {
        let pool = migrated_pool().await;
        let result = sqlx::query("INSERT INTO quotes (name, user_id) VALUES (?, ?)")
            .bind("A quote that is long enough")
            .bind(999i64)
            .execute(pool.sqlite())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_relation_insert_or_ignore_is_idempotent() {
        let pool = migrated_pool().await;
        let db = pool.sqlite();

        sqlx::query("INSERT INTO users (email, name) VALUES ('a@b.co', 'A')")
            .execute(db)
            .await
            .unwrap();
        for _ in 0..2 {
            sqlx::query(
                "INSERT OR IGNORE INTO user_likes (user_id, likeable_type, likeable_id) VALUES (1, 'quote', 7)",
            )
            .execute(db)
            .await
            .unwrap();
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_likes")
            .fetch_one(db)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);\n-- trailing";
        assert_eq!(split_sql_statements(sql_with_comments).len(), 1);
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }
}
