//! Authors are matched by name, ignoring case and surrounding whitespace

use async_trait::async_trait;

use super::{parse_unchecked, row_try, EntityImporter, ImportContext, RowFailure, RowOutcome};
use crate::models::{AuthorRecord, EntityType, Record};
use crate::services::rules::{decide, Decision};

pub struct AuthorImporter;

#[async_trait]
impl EntityImporter for AuthorImporter {
    fn entity(&self) -> EntityType {
        EntityType::Authors
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let incoming: AuthorRecord = row_try!(parse_unchecked(record));

        let existing = match incoming.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => ctx.repos.authors.find_by_name(name).await?,
            _ => None,
        };
        let matched = existing.as_ref().and_then(|a| a.id.map(|id| (id, a)));

        let outcome = match decide(matched, &incoming, ctx.policy) {
            Decision::Insert(author) => {
                let id = ctx.repos.authors.insert(&author).await?;
                ctx.map_id(EntityType::Authors, incoming.id, id);
                RowOutcome::Inserted
            }
            Decision::Update { id, record } => {
                ctx.repos.authors.update(id, &record).await?;
                ctx.map_id(EntityType::Authors, incoming.id, id);
                RowOutcome::Updated
            }
            Decision::Skip(id) => {
                ctx.map_id(EntityType::Authors, incoming.id, id);
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
    async fn test_case_insensitive_match_reuses_author() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        let first = record(json!({"id": 5, "name": "Marcus Aurelius"}));
        let second = record(json!({"id": 6, "name": "  marcus AURELIUS "}));

        AuthorImporter.import_row(&mut ctx, 1, &first).await.unwrap();
        assert_eq!(
            AuthorImporter.import_row(&mut ctx, 2, &second).await.unwrap(),
            RowOutcome::Skipped
        );
        assert_eq!(count(&pool, "authors").await, 1);
        assert_eq!(ctx.ids.get(EntityType::Authors, 6), ctx.ids.get(EntityType::Authors, 5));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_fields() {
        let (_pool, mut ctx) = context(ConflictPolicy::Overwrite).await;
        let first = record(json!({"name": "Seneca", "job": "Senator"}));
        let second = record(json!({"name": "Seneca", "description": "Stoic"}));

        AuthorImporter.import_row(&mut ctx, 1, &first).await.unwrap();
        assert_eq!(
            AuthorImporter.import_row(&mut ctx, 2, &second).await.unwrap(),
            RowOutcome::Updated
        );
        let author = ctx.repos.authors.find_by_name("seneca").await.unwrap().unwrap();
        assert_eq!(author.job, None);
        assert_eq!(author.description.as_deref(), Some("Stoic"));
    }

    #[tokio::test]
    async fn test_missing_name_fails() {
        let (_pool, mut ctx) = context(ConflictPolicy::Skip).await;
        let row = record(json!({"job": "Poet"}));
        assert!(!AuthorImporter.import_row(&mut ctx, 1, &row).await.unwrap().is_success());
    }
}
