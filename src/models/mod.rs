//! Data models
//!
//! This module contains the data structures of the Verbatims pipeline:
//! - Entity types, loosely-typed records and bundles
//! - Typed rows for each importable entity
//! - Job progress, durable logs and stored artifacts

mod author;
mod backup;
mod entity;
mod job;
mod logs;
mod options;
mod page;
mod quote;
mod reference;
mod relation;
mod tag;
mod user;

pub use author::AuthorRecord;
pub use backup::{BackupFile, BackupKind, CompressionType, NewBackupFile, StorageStatus};
pub use entity::{Bundle, DataType, EntityType, FieldKind, Record};
pub use job::{BatchDelta, JobKind, JobProgress, JobStatus, ProgressPatch};
pub use logs::{ExportLog, ImportLog};
pub use options::{ConflictPolicy, ImportOptions, ReportFormat};
pub use page::{ListParams, PagedResult};
pub use quote::{
    QuoteRecord, DEFAULT_QUOTE_LANGUAGE, DEFAULT_QUOTE_STATUS, QUOTE_LANGUAGES, QUOTE_MAX_LENGTH,
    QUOTE_MIN_LENGTH, QUOTE_STATUSES,
};
pub use reference::{ReferenceRecord, DEFAULT_REFERENCE_TYPE, REFERENCE_TYPES};
pub use relation::{
    CollectionQuoteRecord, QuoteTagRecord, QuoteViewRecord, UserCollectionRecord, UserLikeRecord,
    LIKEABLE_TYPES,
};
pub use tag::{TagRecord, DEFAULT_TAG_COLOR};
pub use user::{UserRecord, DEFAULT_USER_ROLE, USER_ROLES};
