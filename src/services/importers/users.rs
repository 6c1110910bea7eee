//! Users are matched by exact (trimmed) email address

use async_trait::async_trait;

use super::{parse_unchecked, row_try, EntityImporter, ImportContext, RowFailure, RowOutcome};
use crate::models::{EntityType, Record, UserRecord};
use crate::services::rules::{decide, Decision};

pub struct UserImporter;

#[async_trait]
impl EntityImporter for UserImporter {
    fn entity(&self) -> EntityType {
        EntityType::Users
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let mut incoming: UserRecord = row_try!(parse_unchecked(record));
        incoming.email = incoming.match_key();

        let existing = match incoming.email.as_deref() {
            Some(email) => ctx.repos.users.find_by_email(email).await?,
            None => None,
        };
        let matched = existing.as_ref().and_then(|u| u.id.map(|id| (id, u)));

        let outcome = match decide(matched, &incoming, ctx.policy) {
            Decision::Insert(user) => {
                let id = ctx.repos.users.insert(&user).await?;
                ctx.map_id(EntityType::Users, incoming.id, id);
                RowOutcome::Inserted
            }
            Decision::Update { id, record } => {
                ctx.repos.users.update(id, &record).await?;
                ctx.map_id(EntityType::Users, incoming.id, id);
                RowOutcome::Updated
            }
            Decision::Skip(id) => {
                ctx.map_id(EntityType::Users, incoming.id, id);
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
    async fn test_insert_then_skip_same_email() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        let row = record(json!({"id": 40, "email": "ada@example.com", "name": "Ada"}));

        assert_eq!(UserImporter.import_row(&mut ctx, 1, &row).await.unwrap(), RowOutcome::Inserted);
        assert_eq!(UserImporter.import_row(&mut ctx, 2, &row).await.unwrap(), RowOutcome::Skipped);
        assert_eq!(count(&pool, "users").await, 1);
        assert_eq!(ctx.ids.get(EntityType::Users, 40), Some(1));
    }

    #[tokio::test]
    async fn test_merge_keeps_existing_fields() {
        let (_pool, mut ctx) = context(ConflictPolicy::Merge).await;
        let full = record(json!({"email": "ada@example.com", "name": "Ada", "job": "Analyst"}));
        UserImporter.import_row(&mut ctx, 1, &full).await.unwrap();

        let partial = record(json!({"email": "ada@example.com", "location": "London"}));
        assert_eq!(
            UserImporter.import_row(&mut ctx, 2, &partial).await.unwrap(),
            RowOutcome::Updated
        );

        let user = ctx.repos.users.find_by_email("ada@example.com").await.unwrap().unwrap();
        assert_eq!(user.job.as_deref(), Some("Analyst"));
        assert_eq!(user.location.as_deref(), Some("London"));
        assert_eq!(user.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_invalid_email_fails_row() {
        let (_pool, mut ctx) = context(ConflictPolicy::Skip).await;
        let row = record(json!({"email": "not-an-email", "name": "X"}));
        assert!(matches!(
            UserImporter.import_row(&mut ctx, 1, &row).await.unwrap(),
            RowOutcome::Failed(RowFailure { kind: super::super::FailureKind::Validation, .. })
        ));
    }
}
