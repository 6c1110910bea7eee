//! Relation importers
//!
//! Link rows only point at rows owned by other entity types. Every write is
//! idempotent, so re-importing the same file reports the rows as skipped
//! and leaves the tables unchanged.

use async_trait::async_trait;

use super::{parse_record, row_try, EntityImporter, ImportContext, RowFailure, RowOutcome};
use crate::models::{
    CollectionQuoteRecord, EntityType, QuoteTagRecord, QuoteViewRecord, Record,
    UserCollectionRecord, UserLikeRecord,
};

fn linked(created: bool) -> RowOutcome {
    if created {
        RowOutcome::Inserted
    } else {
        RowOutcome::Skipped
    }
}

/// Entity a like points at
fn likeable_entity(likeable_type: &str) -> Option<EntityType> {
    match likeable_type {
        "quote" => Some(EntityType::Quotes),
        "author" => Some(EntityType::Authors),
        "reference" => Some(EntityType::References),
        _ => None,
    }
}

pub struct UserCollectionImporter;

#[async_trait]
impl EntityImporter for UserCollectionImporter {
    fn entity(&self) -> EntityType {
        EntityType::UserCollections
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let mut collection: UserCollectionRecord = row_try!(parse_record(record));
        let source_id = collection.id;
        let user_id = collection.user_id.unwrap_or_default();
        collection.user_id =
            Some(row_try!(ctx.require_id(EntityType::Users, "user_id", user_id).await?));

        let (id, created) = ctx.repos.relations.upsert_collection(&collection).await?;
        ctx.map_id(EntityType::UserCollections, source_id, id);
        Ok(linked(created))
    }
}

pub struct QuoteTagImporter;

#[async_trait]
impl EntityImporter for QuoteTagImporter {
    fn entity(&self) -> EntityType {
        EntityType::QuoteTags
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let link: QuoteTagRecord = row_try!(parse_record(record));
        let quote_id = row_try!(
            ctx.require_id(EntityType::Quotes, "quote_id", link.quote_id.unwrap_or_default())
                .await?
        );

        let tag_id = match (link.tag_id, link.tag_name.as_deref()) {
            (Some(id), name) => match ctx.resolve_id(EntityType::Tags, id).await? {
                Some(found) => found,
                None => match name.filter(|n| !n.trim().is_empty()) {
                    Some(name) => ctx.repos.tags.find_or_create(name).await?.0,
                    None => {
                        return Ok(RowFailure::resolution(format!("tag_id {} does not exist", id))
                            .into())
                    }
                },
            },
            (None, Some(name)) => ctx.repos.tags.find_or_create(name).await?.0,
            (None, None) => return Ok(RowFailure::validation("tag_id or tag_name is required").into()),
        };

        Ok(linked(ctx.repos.quotes.link_tag(quote_id, tag_id).await?))
    }
}

pub struct UserLikeImporter;

#[async_trait]
impl EntityImporter for UserLikeImporter {
    fn entity(&self) -> EntityType {
        EntityType::UserLikes
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let mut like: UserLikeRecord = row_try!(parse_record(record));
        let user_id = like.user_id.unwrap_or_default();
        like.user_id = Some(row_try!(ctx.require_id(EntityType::Users, "user_id", user_id).await?));

        let likeable_type = like.likeable_type.as_deref().unwrap_or_default();
        let Some(target) = likeable_entity(likeable_type) else {
            return Ok(RowFailure::validation(format!(
                "likeable_type '{}' is not supported",
                likeable_type
            ))
            .into());
        };
        let likeable_id = like.likeable_id.unwrap_or_default();
        like.likeable_id = Some(row_try!(
            ctx.require_id(target, "likeable_id", likeable_id).await?
        ));

        Ok(linked(ctx.repos.relations.add_like(&like).await?))
    }
}

pub struct CollectionQuoteImporter;

#[async_trait]
impl EntityImporter for CollectionQuoteImporter {
    fn entity(&self) -> EntityType {
        EntityType::CollectionQuotes
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        _index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let entry: CollectionQuoteRecord = row_try!(parse_record(record));
        let collection_id = row_try!(
            ctx.require_id(
                EntityType::UserCollections,
                "collection_id",
                entry.collection_id.unwrap_or_default()
            )
            .await?
        );
        let quote_id = row_try!(
            ctx.require_id(EntityType::Quotes, "quote_id", entry.quote_id.unwrap_or_default())
                .await?
        );

        let created = ctx
            .repos
            .relations
            .add_collection_quote(collection_id, quote_id, entry.added_at.as_deref())
            .await?;
        Ok(linked(created))
    }
}

pub struct QuoteViewImporter;

#[async_trait]
impl EntityImporter for QuoteViewImporter {
    fn entity(&self) -> EntityType {
        EntityType::QuoteViews
    }

    async fn import_row(
        &self,
        ctx: &mut ImportContext,
        index: u64,
        record: &Record,
    ) -> anyhow::Result<RowOutcome> {
        let mut view: QuoteViewRecord = row_try!(parse_record(record));
        let quote_id = view.quote_id.unwrap_or_default();
        view.quote_id = Some(row_try!(ctx.require_id(EntityType::Quotes, "quote_id", quote_id).await?));

        // Anonymous views are valid, so an unknown viewer is dropped from the row
        if let Some(user_id) = view.user_id {
            view.user_id = ctx.resolve_id(EntityType::Users, user_id).await?;
            if view.user_id.is_none() {
                ctx.warn(format!("quote_views row {}: user {} does not exist, cleared", index, user_id));
            }
        }

        Ok(linked(ctx.repos.relations.add_view(&view).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, count, record};
    use super::super::importer_for;
    use super::*;
    use crate::db::DynDatabasePool;
    use crate::models::ConflictPolicy;
    use serde_json::json;

    async fn seed(pool: &DynDatabasePool) {
        for sql in [
            "INSERT INTO users (email, name) VALUES ('a@example.com', 'A')",
            "INSERT INTO authors (name) VALUES ('Epictetus')",
            "INSERT INTO quotes (name, user_id, author_id) VALUES ('No man is free who is not master of himself.', 1, 1)",
            "INSERT INTO tags (name) VALUES ('freedom')",
        ] {
            pool.execute(sql).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed(&pool).await;

        let rows = [
            (EntityType::QuoteTags, json!({"quote_id": 1, "tag_id": 1})),
            (EntityType::UserLikes, json!({"user_id": 1, "likeable_type": "author", "likeable_id": 1})),
            (EntityType::UserCollections, json!({"id": 9, "user_id": 1, "name": "Favourites"})),
            (EntityType::CollectionQuotes, json!({"collection_id": 9, "quote_id": 1})),
            (
                EntityType::QuoteViews,
                json!({"quote_id": 1, "ip_address": "10.0.0.1", "viewed_at": "2024-01-01T00:00:00Z"}),
            ),
        ];

        for (pass, expected) in [RowOutcome::Inserted, RowOutcome::Skipped].into_iter().enumerate() {
            for (entity, row) in &rows {
                let outcome = importer_for(*entity)
                    .import_row(&mut ctx, 1, &record(row.clone()))
                    .await
                    .unwrap();
                assert_eq!(outcome, expected, "{} pass {}", entity, pass);
            }
        }

        for table in ["quote_tags", "user_likes", "user_collections", "collection_quotes", "quote_views"] {
            assert_eq!(count(&pool, table).await, 1, "{}", table);
        }
    }

    #[tokio::test]
    async fn test_quote_tag_by_name_creates_tag() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed(&pool).await;
        let outcome = QuoteTagImporter
            .import_row(&mut ctx, 1, &record(json!({"quote_id": 1, "tag_name": "Virtue"})))
            .await
            .unwrap();
        assert_eq!(outcome, RowOutcome::Inserted);
        assert_eq!(count(&pool, "tags").await, 2);
    }

    #[tokio::test]
    async fn test_missing_targets_fail_resolution() {
        let (pool, mut ctx) = context(ConflictPolicy::Skip).await;
        seed(&pool).await;

        let like = record(json!({"user_id": 1, "likeable_type": "quote", "likeable_id": 99}));
        let outcome = UserLikeImporter.import_row(&mut ctx, 1, &like).await.unwrap();
        assert!(matches!(outcome, RowOutcome::Failed(f) if f.reason.contains("likeable_id 99")));

        let view = record(json!({"quote_id": 42, "viewed_at": "2024-01-01T00:00:00Z"}));
        assert!(!QuoteViewImporter.import_row(&mut ctx, 1, &view).await.unwrap().is_success());
        assert_eq!(count(&pool, "user_likes").await, 0);
    }
}
