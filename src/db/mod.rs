//! Database layer
//!
//! SQLite-backed persistence for the Verbatims pipeline: the content tables
//! imports write into, plus the durable `import_logs`, `export_logs` and
//! `backup_files` tables.
//!
//! # Usage
//!
//! ```ignore
//! use verbatims::config::DatabaseConfig;
//! use verbatims::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool, SqliteDatabase};
