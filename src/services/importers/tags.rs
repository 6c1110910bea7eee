//! Tags are matched by name, ignoring case

use async_trait::async_trait;

use super::{parse_unchecked, row_try, EntityImporter, ImportContext, RowFailure, RowOutcome};
use crate::models::{EntityType, Record, TagRecord};
use crate::services::rules::{decide, Decision};

pub struct TagImporter;

#[async_trait]
impl EntityImporter for TagImporter {
    fn entity(&self) -> EntityType {
        EntityType::Tags
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let incoming: TagRecord = row_try!(parse_unchecked(record));

        let existing = match incoming.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => ctx.repos.tags.find_by_name(name).await?,
            _ => None,
        };
        let matched = existing.as_ref().and_then(|t| t.id.map(|id| (id, t)));

        let outcome = match decide(matched, &incoming, ctx.policy) {
            Decision::Insert(tag) => {
                let id = ctx.repos.tags.insert(&tag).await?;
                ctx.map_id(EntityType::Tags, incoming.id, id);
                RowOutcome::Inserted
            }
            Decision::Update { id, record } => {
                ctx.repos.tags.update(id, &record).await?;
                ctx.map_id(EntityType::Tags, incoming.id, id);
                RowOutcome::Updated
            }
            Decision::Skip(id) => {
                ctx.map_id(EntityType::Tags, incoming.id, id);
                RowOutcome::Skipped
            }
            Decision::Reject(reason) => RowFailure::validation(reason).into(),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, count, record};
    use super::*;
    use crate::models::ConflictPolicy;
    use serde_json::json;

    #[tokio::test]
    async fn test_names_match_ignoring_case() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        TagImporter
            .import_row(&mut ctx, 1, &record(json!({"name": "Wisdom"})))
            .await
            .unwrap();
        let outcome = TagImporter
            .import_row(&mut ctx, 2, &record(json!({"name": "wisdom", "color": "#000000"})))
            .await
            .unwrap();
        assert_eq!(outcome, RowOutcome::Skipped);
        assert_eq!(count(&pool, "tags").await, 1);
    }

    #[tokio::test]
    async fn test_bad_color_fails() {
        let (_pool, mut ctx) = context(ConflictPolicy::Skip).await;
        let outcome = TagImporter
            .import_row(&mut ctx, 1, &record(json!({"name": "x", "color": "blue"})))
            .await
            .unwrap();
        assert!(!outcome.is_success());
    }
}
