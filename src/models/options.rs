//! Import options

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an importer treats a row that matches an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the existing row untouched
    #[default]
    Skip,
    /// Replace every field of the existing row
    Overwrite,
    /// Overwrite only the fields present in the incoming row
    Merge,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "merge" => Ok(ConflictPolicy::Merge),
            other => Err(format!("unknown conflict policy: {}", other)),
        }
    }
}

/// Serialisation of an import report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Ndjson,
    Csv,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Ndjson => "ndjson",
            ReportFormat::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Ndjson => "application/x-ndjson",
            ReportFormat::Csv => "text/csv",
        }
    }

    /// Detect the format from a stored report filename
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_ascii_lowercase();
        let lower = lower.strip_suffix(".gz").unwrap_or(&lower);
        if lower.ends_with(".ndjson") {
            Some(ReportFormat::Ndjson)
        } else if lower.ends_with(".csv") {
            Some(ReportFormat::Csv)
        } else {
            None
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ndjson" | "jsonl" => Ok(ReportFormat::Ndjson),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(format!("unknown report format: {}", other)),
        }
    }
}

/// Caller-supplied options for one import job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Falls back to the configured default when absent
    #[serde(default, alias = "conflict_policy")]
    pub conflict_policy: Option<ConflictPolicy>,
    /// Owner assigned to quotes that carry no `user_id`
    #[serde(default, alias = "default_user_id")]
    pub default_user_id: Option<i64>,
    /// Rows per batch; falls back to the configured batch size
    #[serde(default, alias = "batch_size")]
    pub batch_size: Option<usize>,
    #[serde(default, alias = "report_format")]
    pub report_format: ReportFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!("MERGE".parse::<ConflictPolicy>(), Ok(ConflictPolicy::Merge));
        assert!("replace".parse::<ConflictPolicy>().is_err());
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Skip);
    }

    #[test]
    fn test_report_format_from_filename() {
        assert_eq!(ReportFormat::from_filename("r.ndjson"), Some(ReportFormat::Ndjson));
        assert_eq!(ReportFormat::from_filename("r.CSV.gz"), Some(ReportFormat::Csv));
        assert_eq!(ReportFormat::from_filename("r.json"), None);
    }

    #[test]
    fn test_import_options_accepts_both_casings() {
        let camel: ImportOptions =
            serde_json::from_str(r#"{"conflictPolicy":"merge","defaultUserId":3}"#).unwrap();
        let snake: ImportOptions =
            serde_json::from_str(r#"{"conflict_policy":"merge","default_user_id":3}"#).unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.conflict_policy, Some(ConflictPolicy::Merge));
        assert_eq!(camel.report_format, ReportFormat::Ndjson);
    }
}
