//! Snapshot repository
//!
//! Whole-table dump, clear and restore used by snapshots, exports and
//! rollback. Only tables listed in `SNAPSHOT_TABLES` are accepted, and
//! restore only writes columns the live schema declares.

use crate::db::DynDatabasePool;
use crate::models::{EntityType, Record};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use data_encoding::BASE64;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::sync::Arc;

/// Snapshot tables in parent-to-child order
pub const SNAPSHOT_TABLES: [&str; 10] = [
    "users",
    "authors",
    "quote_references",
    "tags",
    "quotes",
    "user_collections",
    "quote_tags",
    "user_likes",
    "collection_quotes",
    "quote_views",
];

/// Result of restoring one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreOutcome {
    pub restored: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
}

/// Snapshot repository trait
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// All rows of a table, keyed by column name, in rowid order
    async fn dump_table(&self, table: &str) -> Result<Vec<Record>>;

    async fn count(&self, table: &str) -> Result<u64>;

    /// Delete every row of the given tables in one transaction, in the
    /// order given
    async fn clear_tables(&self, tables: &[&str]) -> Result<()>;

    /// Insert rows into an empty table in one transaction. Rows the store
    /// rejects are skipped and reported in the outcome.
    async fn restore_table(&self, table: &str, rows: &[Record]) -> Result<RestoreOutcome>;
}

/// SQLx-based snapshot repository implementation
pub struct SqlxSnapshotRepository {
    pool: DynDatabasePool,
}

impl SqlxSnapshotRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SnapshotRepository> {
        Arc::new(Self::new(pool))
    }
}

/// Map a table name or entity name onto a snapshot table
pub fn resolve_table(name: &str) -> Option<&'static str> {
    if let Some(table) = SNAPSHOT_TABLES.iter().find(|t| **t == name) {
        return Some(table);
    }
    name.parse::<EntityType>().ok().map(|e| e.table())
}

fn checked_table(table: &str) -> Result<&'static str> {
    SNAPSHOT_TABLES
        .iter()
        .copied()
        .find(|t| *t == table)
        .ok_or_else(|| anyhow!("Unknown table: {}", table))
}

#[async_trait]
impl SnapshotRepository for SqlxSnapshotRepository {
    async fn dump_table(&self, table: &str) -> Result<Vec<Record>> {
        let table = checked_table(table)?;
        let rows = sqlx::query(&format!("SELECT * FROM \"{}\" ORDER BY rowid", table))
            .fetch_all(self.pool.sqlite())
            .await
            .with_context(|| format!("Failed to dump table {}", table))?;
        rows.iter().map(row_to_record).collect()
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let table = checked_table(table)?;
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM \"{}\"", table))
            .fetch_one(self.pool.sqlite())
            .await
            .with_context(|| format!("Failed to count table {}", table))?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn clear_tables(&self, tables: &[&str]) -> Result<()> {
        let tables = tables
            .iter()
            .map(|t| checked_table(t))
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.sqlite().begin().await?;
        for table in tables {
            sqlx::query(&format!("DELETE FROM \"{}\"", table))
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to clear table {}", table))?;
        }
        tx.commit().await.context("Failed to commit table clear")?;
        Ok(())
    }

    async fn restore_table(&self, table: &str, rows: &[Record]) -> Result<RestoreOutcome> {
        let table = checked_table(table)?;
        let pool = self.pool.sqlite();
        let columns = table_columns(pool, table).await?;

        let mut outcome = RestoreOutcome::default();
        let mut tx = pool.begin().await?;

        for (index, row) in rows.iter().enumerate() {
            let fields: Vec<(&String, &Value)> =
                row.iter().filter(|(k, _)| columns.contains(k.as_str())).collect();
            if fields.is_empty() {
                outcome.skipped += 1;
                outcome
                    .errors
                    .push(format!("{} row {}: no known columns", table, index + 1));
                continue;
            }

            let names = fields
                .iter()
                .map(|(k, _)| format!("\"{}\"", k))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; fields.len()].join(", ");
            let sql = format!("INSERT INTO \"{}\" ({}) VALUES ({})", table, names, placeholders);

            let mut query = sqlx::query(&sql);
            for (_, value) in &fields {
                query = bind_value(query, value);
            }

            match query.execute(&mut *tx).await {
                Ok(_) => outcome.restored += 1,
                Err(e) => {
                    outcome.skipped += 1;
                    outcome.errors.push(format!("{} row {}: {}", table, index + 1, e));
                }
            }
        }

        tx.commit()
            .await
            .with_context(|| format!("Failed to commit restore of {}", table))?;
        Ok(outcome)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn table_columns(pool: &SqlitePool, table: &str) -> Result<HashSet<String>> {
    let rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", table))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to read columns of {}", table))?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => {
                    Value::String(BASE64.encode(&row.try_get_unchecked::<Vec<u8>, _>(index)?))
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations::run_migrations};
    use serde_json::json;

    async fn setup() -> (DynDatabasePool, Arc<dyn SnapshotRepository>) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool.execute("INSERT INTO users (email, name, role) VALUES ('a@example.com', 'Ada', 'admin')")
            .await
            .unwrap();
        pool.execute("INSERT INTO tags (name) VALUES ('science')").await.unwrap();
        (pool.clone(), SqlxSnapshotRepository::boxed(pool))
    }

    #[test]
    fn test_resolve_table_accepts_entity_names() {
        assert_eq!(resolve_table("quote_references"), Some("quote_references"));
        assert_eq!(resolve_table("references"), Some("quote_references"));
        assert_eq!(resolve_table("sessions"), None);
    }

    #[tokio::test]
    async fn test_dump_preserves_column_types() {
        let (_pool, repo) = setup().await;
        let users = repo.dump_table("users").await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["id"], json!(1));
        assert_eq!(users[0]["email"], json!("a@example.com"));
        assert_eq!(users[0]["is_active"], json!(1));
    }

    #[tokio::test]
    async fn test_dump_rejects_unknown_table() {
        let (_pool, repo) = setup().await;
        assert!(repo.dump_table("_migrations").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_then_restore_round_trip() {
        let (_pool, repo) = setup().await;
        let users = repo.dump_table("users").await.unwrap();
        let tags = repo.dump_table("tags").await.unwrap();

        repo.clear_tables(&["tags", "users"]).await.unwrap();
        assert_eq!(repo.count("users").await.unwrap(), 0);

        let outcome = repo.restore_table("users", &users).await.unwrap();
        assert_eq!(outcome.restored, 1);
        repo.restore_table("tags", &tags).await.unwrap();

        assert_eq!(repo.dump_table("users").await.unwrap(), users);
        assert_eq!(repo.dump_table("tags").await.unwrap(), tags);
    }

    #[tokio::test]
    async fn test_restore_skips_bad_rows_and_unknown_columns() {
        let (_pool, repo) = setup().await;
        repo.clear_tables(&["tags"]).await.unwrap();

        let mut good = Record::new();
        good.insert("name".into(), json!("history"));
        good.insert("bogus".into(), json!("ignored"));
        let mut dup = Record::new();
        dup.insert("name".into(), json!("HISTORY"));
        let mut empty = Record::new();
        empty.insert("bogus".into(), json!(1));

        let outcome = repo.restore_table("tags", &[good, dup, empty]).await.unwrap();
        assert_eq!(outcome.restored, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.errors.len(), 2);
    }
}
