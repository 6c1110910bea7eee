//! Durable job logs
//!
//! `import_logs` and `export_logs` keep one row per job so history survives
//! process restarts after the in-memory progress entry is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DataType, ImportOptions, JobKind, JobProgress, JobStatus};

/// One row of `import_logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLog {
    /// Same id as the import job
    pub id: String,
    pub data_type: DataType,
    pub filename: Option<String>,
    pub format: String,
    pub status: JobStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub options: ImportOptions,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportLog {
    /// Mirror a job snapshot into a log row
    pub fn from_job(
        job: &JobProgress,
        filename: Option<String>,
        format: impl Into<String>,
        options: ImportOptions,
    ) -> Self {
        Self {
            id: job.id.clone(),
            data_type: job.data_type,
            filename,
            format: format.into(),
            status: job.status,
            total_records: job.total_records,
            processed_records: job.processed_records,
            successful_records: job.successful_records,
            failed_records: job.failed_records,
            errors: job.errors.clone(),
            warnings: job.warnings.clone(),
            options,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }

    /// Rebuild a job view for jobs no longer held in memory
    pub fn to_job(&self) -> JobProgress {
        JobProgress {
            id: self.id.clone(),
            kind: JobKind::Import,
            data_type: self.data_type,
            status: self.status,
            total_records: self.total_records,
            processed_records: self.processed_records,
            successful_records: self.successful_records,
            failed_records: self.failed_records,
            errors: self.errors.clone(),
            warnings: self.warnings.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// One row of `export_logs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportLog {
    pub id: String,
    pub filename: String,
    pub format: String,
    pub data_type: DataType,
    pub record_count: u64,
    pub file_size: u64,
    pub status: JobStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    #[test]
    fn test_import_log_round_trips_job() {
        let mut job = JobProgress::new("abc", JobKind::Import, DataType::All, 5);
        job.processed_records = 2;
        job.successful_records = 2;
        job.warnings.push("zip: skipped readme.txt".into());

        let log = ImportLog::from_job(&job, Some("dump.zip".into()), "zip", ImportOptions::default());
        assert_eq!(log.to_job(), job);

        let single = DataType::Entity(EntityType::Tags);
        assert_eq!(single.to_string(), "tags");
    }
}
