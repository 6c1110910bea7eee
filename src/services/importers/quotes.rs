//! Quotes
//!
//! Authors and references resolve through this job's id map, then an
//! existing row with the same id, then `new_author` / `new_reference`
//! looked up by name or created. Quotes without an owner fall back to the
//! job's default user, then to the first admin.

use async_trait::async_trait;
use serde_json::Value;

use super::{parse_record, row_try, EntityImporter, ImportContext, RowFailure, RowOutcome};
use crate::models::{EntityType, QuoteRecord, Record};
use crate::services::rules::{decide, Decision};

pub struct QuoteImporter;

/// Accept `tags` given as delimited text ("love; life") as well as an array
fn split_tag_text(record: &mut Record) {
    let names: Vec<Value> = match record.get("tags") {
        Some(Value::String(text)) => text
            .split([',', ';', '|'])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| Value::String(name.to_string()))
            .collect(),
        _ => return,
    };
    record.insert("tags".to_string(), Value::Array(names));
}

async fn resolve_author(
    ctx: &ImportContext,
    quote: &QuoteRecord,
) -> anyhow::Result<Result<Option<i64>, RowFailure>> {
    if let Some(id) = quote.author_id {
        if let Some(found) = ctx.resolve_id(EntityType::Authors, id).await? {
            return Ok(Ok(Some(found)));
        }
    }
    if let Some(author) = &quote.new_author {
        if let Some(name) = author.name.as_deref() {
            if let Some(existing) = ctx.repos.authors.find_by_name(name).await? {
                return Ok(Ok(existing.id));
            }
        }
        return Ok(Ok(Some(ctx.repos.authors.insert(author).await?)));
    }
    Ok(match quote.author_id {
        Some(id) => Err(RowFailure::resolution(format!("author_id {} does not exist", id))),
        None => Ok(None),
    })
}

async fn resolve_reference(
    ctx: &ImportContext,
    quote: &QuoteRecord,
) -> anyhow::Result<Result<Option<i64>, RowFailure>> {
    if let Some(id) = quote.reference_id {
        if let Some(found) = ctx.resolve_id(EntityType::References, id).await? {
            return Ok(Ok(Some(found)));
        }
    }
    if let Some(reference) = &quote.new_reference {
        if let Some(name) = reference.name.as_deref() {
            if let Some(existing) = ctx.repos.references.find_by_name(name).await? {
                return Ok(Ok(existing.id));
            }
        }
        return Ok(Ok(Some(ctx.repos.references.insert(reference).await?)));
    }
    Ok(match quote.reference_id {
        Some(id) => Err(RowFailure::resolution(format!("reference_id {} does not exist", id))),
        None => Ok(None),
    })
}

async fn resolve_owner(
    ctx: &ImportContext,
    quote: &QuoteRecord,
) -> anyhow::Result<Result<i64, RowFailure>> {
    if let Some(id) = quote.user_id {
        return ctx.require_id(EntityType::Users, "user_id", id).await;
    }
    if let Some(id) = ctx.default_user_id {
        return ctx.require_id(EntityType::Users, "default_user_id", id).await;
    }
    Ok(ctx
        .repos
        .users
        .first_admin_id()
        .await?
        .ok_or_else(|| RowFailure::resolution("quote has no user_id and no admin user exists")))
}

impl QuoteImporter {
    async fn link_tags(
        ctx: &mut ImportContext,
        index: u64,
        quote_id: i64,
        quote: &QuoteRecord,
    ) -> anyhow::Result<()> {
        for name in quote.tags.iter().flatten() {
            if name.trim().is_empty() {
                continue;
            }
            let (tag_id, _) = ctx.repos.tags.find_or_create(name).await?;
            ctx.repos.quotes.link_tag(quote_id, tag_id).await?;
        }
        for &id in quote.tag_ids.iter().flatten() {
            match ctx.resolve_id(EntityType::Tags, id).await? {
                Some(tag_id) => {
                    ctx.repos.quotes.link_tag(quote_id, tag_id).await?;
                }
                None => ctx.warn(format!("quotes row {}: tag {} does not exist", index, id)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EntityImporter for QuoteImporter {
    fn entity(&self) -> EntityType {
        EntityType::Quotes
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let mut record = record.clone();
        split_tag_text(&mut record);
        let mut incoming: QuoteRecord = row_try!(parse_record(&record));
        let source_id = incoming.id;

        incoming.author_id = row_try!(resolve_author(ctx, &incoming).await?);
        incoming.reference_id = row_try!(resolve_reference(ctx, &incoming).await?);
        incoming.user_id = Some(row_try!(resolve_owner(ctx, &incoming).await?));
        if let Some(id) = incoming.moderator_id {
            incoming.moderator_id = ctx.resolve_id(EntityType::Users, id).await?;
            if incoming.moderator_id.is_none() {
                ctx.warn(format!("quotes row {}: moderator {} does not exist, cleared", index, id));
            }
        }

        let text = incoming.name.as_deref().unwrap_or_default();
        let existing = ctx.repos.quotes.find_duplicate(text, incoming.author_id).await?;
        let matched = existing.as_ref().and_then(|q| q.id.map(|id| (id, q)));

        let outcome = match decide(matched, &incoming, ctx.policy) {
            Decision::Insert(quote) => {
                let id = ctx.repos.quotes.insert(&quote).await?;
                ctx.map_id(EntityType::Quotes, source_id, id);
                Self::link_tags(ctx, index, id, &incoming).await?;
                RowOutcome::Inserted
            }
            Decision::Update { id, record } => {
                ctx.repos.quotes.update(id, &record).await?;
                ctx.map_id(EntityType::Quotes, source_id, id);
                Self::link_tags(ctx, index, id, &incoming).await?;
                RowOutcome::Updated
            }
            Decision::Skip(id) => {
                ctx.map_id(EntityType::Quotes, source_id, id);
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
    use super::super::FailureKind;
    use super::*;
    use crate::models::ConflictPolicy;
    use serde_json::json;

    async fn seed_admin(ctx: &mut ImportContext) -> i64 {
        let admin = crate::models::UserRecord {
            email: Some("admin@example.com".into()),
            name: Some("Admin".into()),
            role: Some("admin".into()),
            ..Default::default()
        };
        ctx.repos.users.insert(&admin).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_author_reused_case_insensitively() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed_admin(&mut ctx).await;

        let first = record(json!({
            "name": "The happiness of your life depends upon your thoughts.",
            "new_author": {"name": "Marcus Aurelius"}
        }));
        let second = record(json!({
            "name": "Waste no more time arguing what a good man should be.",
            "new_author": {"name": "marcus aurelius"}
        }));

        assert_eq!(QuoteImporter.import_row(&mut ctx, 1, &first).await.unwrap(), RowOutcome::Inserted);
        assert_eq!(QuoteImporter.import_row(&mut ctx, 2, &second).await.unwrap(), RowOutcome::Inserted);
        assert_eq!(count(&pool, "authors").await, 1);
        assert_eq!(count(&pool, "quotes").await, 2);
    }

    #[tokio::test]
    async fn test_author_id_resolves_through_id_map() {
        let (_pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed_admin(&mut ctx).await;
        let author_id = ctx
            .repos
            .authors
            .insert(&crate::models::AuthorRecord::named("Seneca"))
            .await
            .unwrap();
        ctx.ids.insert(EntityType::Authors, 900, author_id);

        let row = record(json!({"id": 77, "name": "Luck is what happens when preparation meets opportunity.", "author_id": 900}));
        QuoteImporter.import_row(&mut ctx, 1, &row).await.unwrap();

        let quote_id = ctx.ids.get(EntityType::Quotes, 77).unwrap();
        let quote = ctx.repos.quotes.get_by_id(quote_id).await.unwrap().unwrap();
        assert_eq!(quote.author_id, Some(author_id));
    }

    #[tokio::test]
    async fn test_unknown_author_id_is_resolution_failure() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed_admin(&mut ctx).await;
        let row = record(json!({"name": "A quote whose author is missing.", "author_id": 12}));

        match QuoteImporter.import_row(&mut ctx, 1, &row).await.unwrap() {
            RowOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Resolution);
                assert!(failure.reason.contains("author_id 12"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(count(&pool, "quotes").await, 0);
    }

    #[tokio::test]
    async fn test_owner_fallbacks() {
        let (_pool, mut ctx) = context(ConflictPolicy::Skip).await;
        let row = record(json!({"name": "Nobody owns this quote yet."}));
        assert!(matches!(
            QuoteImporter.import_row(&mut ctx, 1, &row).await.unwrap(),
            RowOutcome::Failed(RowFailure { kind: FailureKind::Resolution, .. })
        ));

        let admin = seed_admin(&mut ctx).await;
        QuoteImporter.import_row(&mut ctx, 2, &row).await.unwrap();
        let quote = ctx.repos.quotes.find_duplicate("Nobody owns this quote yet.", None).await.unwrap().unwrap();
        assert_eq!(quote.user_id, Some(admin));
    }

    #[tokio::test]
    async fn test_tags_by_name_linked_once() {
        let (pool, mut ctx) = context(ConflictPolicy::Overwrite).await;
        seed_admin(&mut ctx).await;
        let row = record(json!({
            "name": "We suffer more often in imagination than in reality.",
            "tags": "stoicism; Fear, stoicism"
        }));

        QuoteImporter.import_row(&mut ctx, 1, &row).await.unwrap();
        assert_eq!(QuoteImporter.import_row(&mut ctx, 2, &row).await.unwrap(), RowOutcome::Updated);
        assert_eq!(count(&pool, "tags").await, 2);
        assert_eq!(count(&pool, "quote_tags").await, 2);
        assert_eq!(count(&pool, "quotes").await, 1);
    }

    #[tokio::test]
    async fn test_short_quote_fails_validation() {
        let (_pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed_admin(&mut ctx).await;
        let outcome = QuoteImporter
            .import_row(&mut ctx, 4, &record(json!({"name": "too short"})))
            .await
            .unwrap();
        assert!(matches!(outcome, RowOutcome::Failed(RowFailure { kind: FailureKind::Validation, .. })));
    }
}
