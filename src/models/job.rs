//! Import/export job progress
//!
//! `JobProgress` is the live view of a running job held by the progress
//! store. Counters always satisfy `processed == successful + failed` and
//! `processed <= total`; once `completed_at` is set the job is frozen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Import,
    Export,
}

/// Job lifecycle: `pending -> processing -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Live state of one import or export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub id: String,
    pub kind: JobKind,
    pub data_type: DataType,
    pub status: JobStatus,
    pub total_records: u64,
    pub processed_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    pub fn new(id: impl Into<String>, kind: JobKind, data_type: DataType, total: u64) -> Self {
        Self {
            id: id.into(),
            kind,
            data_type,
            status: JobStatus::Pending,
            total_records: total,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Whether the counters are mutually consistent
    pub fn counters_consistent(&self) -> bool {
        self.processed_records == self.successful_records + self.failed_records
            && self.processed_records <= self.total_records
    }

    /// Last `n` errors, oldest first
    pub fn recent_errors(&self, n: usize) -> &[String] {
        tail(&self.errors, n)
    }

    /// Last `n` warnings, oldest first
    pub fn recent_warnings(&self, n: usize) -> &[String] {
        tail(&self.warnings, n)
    }
}

fn tail(items: &[String], n: usize) -> &[String] {
    &items[items.len().saturating_sub(n)..]
}

/// Partial update merged into a job by the progress store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressPatch {
    pub status: Option<JobStatus>,
    pub total_records: Option<u64>,
    pub processed_records: Option<u64>,
    pub successful_records: Option<u64>,
    pub failed_records: Option<u64>,
}

impl ProgressPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply the patch, setting `completed_at` on a terminal transition
    pub fn apply_to(&self, job: &mut JobProgress) {
        if let Some(total) = self.total_records {
            job.total_records = total;
        }
        if let Some(processed) = self.processed_records {
            job.processed_records = processed;
        }
        if let Some(successful) = self.successful_records {
            job.successful_records = successful;
        }
        if let Some(failed) = self.failed_records {
            job.failed_records = failed;
        }
        if let Some(status) = self.status {
            job.status = status;
            if status.is_terminal() && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        }
    }
}

/// Counter increments for one processed batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchDelta {
    pub successful: u64,
    pub failed: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BatchDelta {
    pub fn processed(&self) -> u64 {
        self.successful + self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0 && self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn apply_to(&self, job: &mut JobProgress) {
        job.successful_records += self.successful;
        job.failed_records += self.failed;
        job.processed_records += self.processed();
        job.errors.extend(self.errors.iter().cloned());
        job.warnings.extend(self.warnings.iter().cloned());
    }
}
