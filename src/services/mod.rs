//! Services layer - Business logic
//!
//! This module contains the pipeline services of Verbatims.
//! Services are responsible for:
//! - Decoding and encoding payloads
//! - Applying validation and conflict rules while importing
//! - Tracking job progress
//! - Storing, restoring and expiring artifacts

pub mod backup;
pub mod codec;
pub mod export;
pub mod import;
pub mod importers;
pub mod progress;
pub mod report;
pub mod rules;
pub mod storage;

pub use backup::{BackupError, BackupService, BackupSettings, RollbackSummary};
pub use export::{ExportError, ExportRequest, ExportResult, ExportService};
pub use import::{ImportAccepted, ImportError, ImportRequest, ImportService, ImportSettings};
pub use progress::{ProgressError, ProgressStore};
pub use report::{convert_report, ImportReport};
pub use storage::{BlobStore, LocalBlobStore, StorageError};
