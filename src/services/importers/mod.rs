//! Entity importers
//!
//! One importer per entity type turns decoded records into rows. Every
//! importer goes through [`run_entity_import`], which walks the rows in
//! input order, in batches, polling for cancellation between batches and
//! pushing counters to the progress store after each one.
//!
//! A row the importer cannot apply is a [`RowOutcome::Failed`] and lands in
//! the import report. An `Err` from an importer is fatal for the entity
//! type: the remaining rows are counted as failed.

mod authors;
mod quotes;
mod references;
mod relations;
mod tags;
mod users;

pub use authors::AuthorImporter;
pub use quotes::QuoteImporter;
pub use references::ReferenceImporter;
pub use relations::{
    CollectionQuoteImporter, QuoteTagImporter, QuoteViewImporter, UserCollectionImporter,
    UserLikeImporter,
};
pub use tags::TagImporter;
pub use users::UserImporter;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::db::repositories::{
    AuthorRepository, QuoteRepository, ReferenceRepository, RelationRepository,
    SqlxAuthorRepository, SqlxQuoteRepository, SqlxReferenceRepository, SqlxRelationRepository,
    SqlxTagRepository, SqlxUserRepository, TagRepository, UserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::{BatchDelta, ConflictPolicy, EntityType, Record};
use crate::services::progress::ProgressStore;
use crate::services::report::ImportReport;
use crate::services::rules::Validate;

/// Why a row could not be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The row itself is invalid
    Validation,
    /// A referenced row could not be found or created
    Resolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl RowFailure {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            reason: reason.into(),
        }
    }

    pub fn resolution(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Resolution,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Result of importing one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Inserted,
    Updated,
    /// Matched an existing row that was left untouched
    Skipped,
    Failed(RowFailure),
}

impl RowOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RowOutcome::Failed(_))
    }
}

impl From<RowFailure> for RowOutcome {
    fn from(failure: RowFailure) -> Self {
        RowOutcome::Failed(failure)
    }
}

/// Repositories the importers write through
#[derive(Clone)]
pub struct ImportRepositories {
    pub users: Arc<dyn UserRepository>,
    pub authors: Arc<dyn AuthorRepository>,
    pub references: Arc<dyn ReferenceRepository>,
    pub tags: Arc<dyn TagRepository>,
    pub quotes: Arc<dyn QuoteRepository>,
    pub relations: Arc<dyn RelationRepository>,
}

impl ImportRepositories {
    pub fn sqlx(pool: DynDatabasePool) -> Self {
        Self {
            users: SqlxUserRepository::boxed(pool.clone()),
            authors: SqlxAuthorRepository::boxed(pool.clone()),
            references: SqlxReferenceRepository::boxed(pool.clone()),
            tags: SqlxTagRepository::boxed(pool.clone()),
            quotes: SqlxQuoteRepository::boxed(pool.clone()),
            relations: SqlxRelationRepository::boxed(pool),
        }
    }
}

/// Source id to stored id, per entity type, for one job
#[derive(Debug, Default)]
pub struct IdMaps {
    maps: HashMap<EntityType, HashMap<i64, i64>>,
}

impl IdMaps {
    pub fn insert(&mut self, entity: EntityType, source: i64, stored: i64) {
        self.maps.entry(entity).or_default().insert(source, stored);
    }

    pub fn get(&self, entity: EntityType, source: i64) -> Option<i64> {
        self.maps.get(&entity).and_then(|m| m.get(&source)).copied()
    }

    pub fn len(&self, entity: EntityType) -> usize {
        self.maps.get(&entity).map_or(0, HashMap::len)
    }
}

/// Mutable state shared by the importers of one job
pub struct ImportContext {
    pub repos: ImportRepositories,
    pub ids: IdMaps,
    pub policy: ConflictPolicy,
    pub default_user_id: Option<i64>,
    warnings: Vec<String>,
}

impl ImportContext {
    pub fn new(repos: ImportRepositories, policy: ConflictPolicy, default_user_id: Option<i64>) -> Self {
        Self {
            repos,
            ids: IdMaps::default(),
            policy,
            default_user_id,
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Remember where a source id ended up
    pub fn map_id(&mut self, entity: EntityType, source: Option<i64>, stored: i64) {
        if let Some(source) = source {
            self.ids.insert(entity, source, stored);
        }
    }

    /// Resolve a referenced id: this job's id map first, then an existing
    /// row with that id.
    pub async fn resolve_id(&self, entity: EntityType, id: i64) -> anyhow::Result<Option<i64>> {
        if let Some(mapped) = self.ids.get(entity, id) {
            return Ok(Some(mapped));
        }
        let exists = match entity {
            EntityType::Users => self.repos.users.exists(id).await?,
            EntityType::Authors => self.repos.authors.exists(id).await?,
            EntityType::References => self.repos.references.exists(id).await?,
            EntityType::Tags => self.repos.tags.exists(id).await?,
            EntityType::Quotes => self.repos.quotes.exists(id).await?,
            EntityType::UserCollections => self.repos.relations.collection_exists(id).await?,
            _ => false,
        };
        Ok(exists.then_some(id))
    }

    /// Like [`resolve_id`](Self::resolve_id), failing the row when nothing matches
    pub async fn require_id(
        &self,
        entity: EntityType,
        field: &str,
        id: i64,
    ) -> anyhow::Result<Result<i64, RowFailure>> {
        Ok(self
            .resolve_id(entity, id)
            .await?
            .ok_or_else(|| RowFailure::resolution(format!("{} {} does not exist", field, id))))
    }
}

/// Imports rows of one entity type
#[async_trait]
pub trait EntityImporter: Send + Sync {
    fn entity(&self) -> EntityType;

    /// Apply one row. `index` is the 1-based row position.
    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome>;
}

/// Importer for an entity type
pub fn importer_for(entity: EntityType) -> Box<dyn EntityImporter> {
    match entity {
        EntityType::Users => Box::new(UserImporter),
        EntityType::Authors => Box::new(AuthorImporter),
        EntityType::References => Box::new(ReferenceImporter),
        EntityType::Tags => Box::new(TagImporter),
        EntityType::Quotes => Box::new(QuoteImporter),
        EntityType::UserCollections => Box::new(UserCollectionImporter),
        EntityType::QuoteTags => Box::new(QuoteTagImporter),
        EntityType::UserLikes => Box::new(UserLikeImporter),
        EntityType::CollectionQuotes => Box::new(CollectionQuoteImporter),
        EntityType::QuoteViews => Box::new(QuoteViewImporter),
    }
}

/// Deserialize and validate a record into its typed form
pub(crate) fn parse_record<T>(record: &Record) -> Result<T, RowFailure>
where
    T: DeserializeOwned + Validate,
{
    let typed: T = parse_unchecked(record)?;
    typed.validate().map_err(RowFailure::validation)?;
    Ok(typed)
}

/// Deserialize without validating, for rows validated after merging
pub(crate) fn parse_unchecked<T: DeserializeOwned>(record: &Record) -> Result<T, RowFailure> {
    serde_json::from_value(Value::Object(record.clone()))
        .map_err(|e| RowFailure::validation(e.to_string()))
}

/// Unwrap a row-level result inside an importer
macro_rules! row_try {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(failure) => return Ok(RowOutcome::Failed(failure)),
        }
    };
}
pub(crate) use row_try;

/// Counters for one entity type of a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
    /// Set when the importer hit a fatal error
    pub fatal: Option<String>,
}

impl EntitySummary {
    pub fn successful(&self) -> u64 {
        self.inserted + self.updated + self.skipped
    }

    pub fn processed(&self) -> u64 {
        self.successful() + self.failed
    }
}

/// Where a run reports its progress
pub struct ImportSink<'a> {
    pub progress: &'a ProgressStore,
    pub job_id: &'a str,
    pub report: &'a mut ImportReport,
}

impl ImportSink<'_> {
    /// Report every row from `rows[from..]` as failed with `reason`
    fn abandon(&mut self, entity: EntityType, rows: &[Record], from: u64, reason: &str) {
        for (i, record) in rows.iter().enumerate().skip(from as usize) {
            self.report.add_failure(
                entity,
                i as u64 + 1,
                reason,
                Value::Object(record.clone()),
            );
        }
    }

    fn flush(&mut self, delta: BatchDelta) {
        if delta.is_empty() {
            return;
        }
        for warning in &delta.warnings {
            self.report.add_warning(warning.clone());
        }
        if let Err(e) = self.progress.apply_batch(self.job_id, &delta) {
            tracing::warn!("Failed to record progress for job {}: {}", self.job_id, e);
        }
    }
}

/// Import `rows` in order, in batches of `batch_size`
pub async fn run_entity_import(
    importer: &dyn EntityImporter,
    ctx: &mut ImportContext,
    rows: &[Record],
    batch_size: usize,
    sink: &mut ImportSink<'_>,
) -> EntitySummary {
    let entity = importer.entity();
    let total = rows.len() as u64;
    let mut summary = EntitySummary::default();

    for (batch_no, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        let offset = (batch_no * batch_size.max(1)) as u64;

        if sink.progress.is_cancelled(sink.job_id) {
            let remaining = total - offset;
            summary.failed += remaining;
            summary.cancelled = true;
            sink.abandon(entity, rows, offset, "import cancelled before this row");
            sink.flush(BatchDelta {
                failed: remaining,
                warnings: vec![format!(
                    "{}: import cancelled, {} rows not processed",
                    entity, remaining
                )],
                ..BatchDelta::default()
            });
            tracing::info!("Import {} cancelled during {}", sink.job_id, entity);
            return summary;
        }

        let mut delta = BatchDelta::default();
        for (i, record) in batch.iter().enumerate() {
            let index = offset + i as u64 + 1;
            match importer.import_row(ctx, index, record).await {
                Ok(RowOutcome::Inserted) => summary.inserted += 1,
                Ok(RowOutcome::Updated) => summary.updated += 1,
                Ok(RowOutcome::Skipped) => summary.skipped += 1,
                Ok(RowOutcome::Failed(failure)) => {
                    summary.failed += 1;
                    delta.failed += 1;
                    delta
                        .errors
                        .push(format!("{} row {}: {}", entity, index, failure));
                    sink.report.add_failure(
                        entity,
                        index,
                        failure.reason,
                        Value::Object(record.clone()),
                    );
                    continue;
                }
                Err(e) => {
                    let remaining = total - index + 1;
                    let message = format!("{}: import aborted at row {}: {:#}", entity, index, e);
                    tracing::warn!("{}", message);
                    summary.failed += remaining;
                    summary.fatal = Some(message.clone());
                    sink.report.add_failure(
                        entity,
                        index,
                        format!("{:#}", e),
                        Value::Object(record.clone()),
                    );
                    sink.abandon(entity, rows, index, "import aborted before this row");
                    delta.failed += remaining;
                    delta.errors.push(message);
                    delta.warnings.extend(ctx.take_warnings());
                    sink.flush(delta);
                    return summary;
                }
            }
            delta.successful += 1;
        }

        delta.warnings.extend(ctx.take_warnings());
        tracing::debug!(
            "Import {} {}: {} of {} rows processed",
            sink.job_id,
            entity,
            summary.processed(),
            total
        );
        sink.flush(delta);
    }

    summary
}
