//! References are matched by name, ignoring case and surrounding whitespace

use async_trait::async_trait;

use super::{parse_unchecked, row_try, EntityImporter, ImportContext, RowFailure, RowOutcome};
use crate::models::{EntityType, Record, ReferenceRecord};
use crate::services::rules::{decide, Decision};

pub struct ReferenceImporter;

#[async_trait]
impl EntityImporter for ReferenceImporter {
    fn entity(&self) -> EntityType {
        EntityType::References
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let incoming: ReferenceRecord = row_try!(parse_unchecked(record));

        let existing = match incoming.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => ctx.repos.references.find_by_name(name).await?,
            _ => None,
        };
        let matched = existing.as_ref().and_then(|r| r.id.map(|id| (id, r)));

        let outcome = match decide(matched, &incoming, ctx.policy) {
            Decision::Insert(reference) => {
                let id = ctx.repos.references.insert(&reference).await?;
                ctx.map_id(EntityType::References, incoming.id, id);
                RowOutcome::Inserted
            }
            Decision::Update { id, record } => {
                ctx.repos.references.update(id, &record).await?;
                ctx.map_id(EntityType::References, incoming.id, id);
                RowOutcome::Updated
            }
            Decision::Skip(id) => {
                ctx.map_id(EntityType::References, incoming.id, id);
                RowOutcome::Skipped
            }
            Decision::Reject(reason) => RowFailure::validation(reason).into(),
        };
        Ok(outcome)
    }
}
