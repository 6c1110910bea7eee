//! Import report
//!
//! Collects the rows an import could not apply and the warnings it raised,
//! serialises them as NDJSON or CSV and stores the result as a backup file
//! linked to the import log.

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{BackupFile, BackupKind, EntityType, ReportFormat};
use crate::services::backup::{Artifact, BackupError, BackupService};
use crate::services::storage::CompressionMode;

/// Error types for report handling
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Malformed report line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("Failed to write report: {0}")]
    Write(String),
}

/// One line of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReportLine {
    Failure {
        entity: EntityType,
        /// 1-based position of the row inside its entity list
        index: u64,
        reason: String,
        item: Value,
    },
    Warning {
        message: String,
    },
}

/// CSV row shape; every line kind shares the same columns
#[derive(Debug, Default, Serialize, Deserialize)]
struct CsvLine {
    kind: String,
    entity: String,
    index: String,
    reason: String,
    message: String,
    item: String,
}

impl From<&ReportLine> for CsvLine {
    fn from(line: &ReportLine) -> Self {
        match line {
            ReportLine::Failure {
                entity,
                index,
                reason,
                item,
            } => CsvLine {
                kind: "failure".to_string(),
                entity: entity.to_string(),
                index: index.to_string(),
                reason: reason.clone(),
                item: item.to_string(),
                ..CsvLine::default()
            },
            ReportLine::Warning { message } => CsvLine {
                kind: "warning".to_string(),
                message: message.clone(),
                ..CsvLine::default()
            },
        }
    }
}

impl CsvLine {
    fn into_line(self, line: usize) -> Result<ReportLine, ReportError> {
        let malformed = |message: String| ReportError::Malformed { line, message };
        match self.kind.as_str() {
            "warning" => Ok(ReportLine::Warning {
                message: self.message,
            }),
            "failure" => Ok(ReportLine::Failure {
                entity: self.entity.parse().map_err(malformed)?,
                index: self
                    .index
                    .parse()
                    .map_err(|_| malformed(format!("invalid index '{}'", self.index)))?,
                reason: self.reason,
                item: if self.item.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(&self.item)
                        .unwrap_or_else(|_| Value::String(self.item.clone()))
                },
            }),
            other => Err(malformed(format!("unknown line kind '{}'", other))),
        }
    }
}

/// Failures and warnings of one import job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    lines: Vec<ReportLine>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_failure(&mut self, entity: EntityType, index: u64, reason: impl Into<String>, item: Value) {
        self.lines.push(ReportLine::Failure {
            entity,
            index,
            reason: reason.into(),
            item,
        });
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.lines.push(ReportLine::Warning {
            message: message.into(),
        });
    }

    pub fn lines(&self) -> &[ReportLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, ReportLine::Failure { .. }))
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.lines.len() - self.failure_count()
    }

    pub fn render(&self, format: ReportFormat) -> Result<Vec<u8>, ReportError> {
        match format {
            ReportFormat::Ndjson => {
                let mut out = Vec::new();
                for line in &self.lines {
                    serde_json::to_writer(&mut out, line)
                        .map_err(|e| ReportError::Write(e.to_string()))?;
                    out.push(b'\n');
                }
                Ok(out)
            }
            ReportFormat::Csv => {
                let mut writer = csv::Writer::from_writer(Vec::new());
                // Write the header even for an empty report
                if self.lines.is_empty() {
                    writer
                        .write_record(["kind", "entity", "index", "reason", "message", "item"])
                        .map_err(|e| ReportError::Write(e.to_string()))?;
                }
                for line in &self.lines {
                    writer
                        .serialize(CsvLine::from(line))
                        .map_err(|e| ReportError::Write(e.to_string()))?;
                }
                writer
                    .into_inner()
                    .map_err(|e| ReportError::Write(e.to_string()))
            }
        }
    }

    pub fn parse(bytes: &[u8], format: ReportFormat) -> Result<Self, ReportError> {
        let mut lines = Vec::new();
        match format {
            ReportFormat::Ndjson => {
                let text = std::str::from_utf8(bytes).map_err(|e| ReportError::Malformed {
                    line: 0,
                    message: e.to_string(),
                })?;
                for (i, raw) in text.lines().enumerate() {
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let line = serde_json::from_str(raw).map_err(|e| ReportError::Malformed {
                        line: i + 1,
                        message: e.to_string(),
                    })?;
                    lines.push(line);
                }
            }
            ReportFormat::Csv => {
                let mut reader = csv::Reader::from_reader(bytes);
                for (i, row) in reader.deserialize::<CsvLine>().enumerate() {
                    // Header is line 1
                    let line = i + 2;
                    let row = row.map_err(|e| ReportError::Malformed {
                        line,
                        message: e.to_string(),
                    })?;
                    lines.push(row.into_line(line)?);
                }
            }
        }
        Ok(Self { lines })
    }

    /// Serialise and store the report, linked to its import log
    pub async fn finalize(
        &self,
        backups: &BackupService,
        import_id: &str,
        format: ReportFormat,
    ) -> Result<BackupFile, BackupError> {
        let content = self
            .render(format)
            .context("Failed to render import report")?;

        let mut metadata = Map::new();
        metadata.insert("failures".to_string(), Value::from(self.failure_count()));
        metadata.insert("warnings".to_string(), Value::from(self.warning_count()));

        let created_at = Utc::now();
        backups
            .store_artifact(Artifact {
                content,
                filename: format!("import-report-{}.{}", import_id, format.extension()),
                format: format.extension().to_string(),
                data_type: "import-report".to_string(),
                record_count: self.lines.len() as u64,
                kind: BackupKind::ImportReport,
                compression: CompressionMode::Auto,
                export_log_id: None,
                import_log_id: Some(import_id.to_string()),
                metadata,
                expires_at: backups.settings().report_ttl.map(|ttl| created_at + ttl),
            })
            .await
    }
}

/// Re-encode a stored report in another format
pub fn convert_report(
    bytes: &[u8],
    from: ReportFormat,
    to: ReportFormat,
) -> Result<Vec<u8>, ReportError> {
    if from == to {
        return Ok(bytes.to_vec());
    }
    ImportReport::parse(bytes, from)?.render(to)
}
