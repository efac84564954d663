use super::{to_i64, CatalogRepository, CatalogScope, PgStore, PresentationQuery};
use crate::error::{AppError, Result};
use crate::models::{InteractionRecord, PresentationId, PresentationRecord, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{error, warn};

const PRESENTATION_COLUMNS: &str = r#"
    p.id, p.owner_id, p.categories, p.keywords, p.description,
    p.quality_score, p.is_ingested,
    (p.published_at IS NOT NULL) AS is_published,
    (p.deleted_at IS NOT NULL) AS is_deleted,
    p.created_at, p.likes_count, p.comments_count, p.follows_count, p.bookmarks_count
"#;

#[derive(sqlx::FromRow)]
struct PresentationRow {
    id: i64,
    owner_id: i64,
    categories: Vec<String>,
    keywords: Vec<String>,
    description: Option<String>,
    quality_score: f64,
    is_ingested: bool,
    is_published: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    likes_count: i64,
    comments_count: i64,
    follows_count: i64,
    bookmarks_count: i64,
}

impl From<PresentationRow> for PresentationRecord {
    fn from(row: PresentationRow) -> Self {
        PresentationRecord {
            id: row.id,
            owner_id: row.owner_id,
            categories: row.categories,
            keywords: row.keywords,
            description: row.description,
            quality_score: row.quality_score,
            is_ingested: row.is_ingested,
            is_published: row.is_published,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            likes_count: row.likes_count,
            comments_count: row.comments_count,
            follows_count: row.follows_count,
            bookmarks_count: row.bookmarks_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct InteractionRow {
    user_id: i64,
    presentation_id: i64,
    interaction_type: String,
    created_at: DateTime<Utc>,
    categories: Vec<String>,
    keywords: Vec<String>,
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn find_presentations(
        &self,
        query: &PresentationQuery,
    ) -> Result<Vec<PresentationRecord>> {
        let sql = format!(
            r#"
            SELECT {PRESENTATION_COLUMNS}
            FROM presentations p
            LEFT JOIN subject_embeddings e
                ON e.subject_type = 'presentation' AND e.subject_id = p.id AND e.model = $1
            WHERE ($2::BIGINT[] IS NULL OR p.id = ANY($2))
              AND ($3 OR p.published_at IS NOT NULL)
              AND ($4 OR p.deleted_at IS NULL)
              AND (NOT $5 OR e.subject_id IS NULL)
            ORDER BY e.updated_at ASC NULLS FIRST, p.id ASC
            LIMIT $6
            "#
        );

        let rows = sqlx::query_as::<_, PresentationRow>(&sql)
            .bind(&query.model)
            .bind(query.ids.as_deref())
            .bind(query.scope.include_unpublished)
            .bind(query.scope.include_deleted)
            .bind(query.missing_only)
            .bind(query.limit.map(to_i64))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to query presentations: {}", e);
                AppError::Database(e.to_string())
            })?;

        Ok(rows.into_iter().map(PresentationRecord::from).collect())
    }

    async fn presentation_ids_in_scope(
        &self,
        scope: CatalogScope,
    ) -> Result<HashSet<PresentationId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM presentations
            WHERE ($1 OR published_at IS NOT NULL)
              AND ($2 OR deleted_at IS NULL)
            "#,
        )
        .bind(scope.include_unpublished)
        .bind(scope.include_deleted)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn recent_published(
        &self,
        limit: usize,
        exclude_owner: Option<UserId>,
    ) -> Result<Vec<PresentationRecord>> {
        let sql = format!(
            r#"
            SELECT {PRESENTATION_COLUMNS}
            FROM presentations p
            WHERE p.published_at IS NOT NULL
              AND p.deleted_at IS NULL
              AND ($2::BIGINT IS NULL OR p.owner_id <> $2)
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT $1
            "#
        );

        let rows = sqlx::query_as::<_, PresentationRow>(&sql)
            .bind(to_i64(limit))
            .bind(exclude_owner)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PresentationRecord::from).collect())
    }

    async fn recent_owned(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PresentationRecord>> {
        let sql = format!(
            r#"
            SELECT {PRESENTATION_COLUMNS}
            FROM presentations p
            WHERE p.owner_id = $1 AND p.deleted_at IS NULL
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, PresentationRow>(&sql)
            .bind(user_id)
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PresentationRecord::from).collect())
    }

    async fn recently_followed(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PresentationRecord>> {
        let sql = format!(
            r#"
            SELECT {PRESENTATION_COLUMNS}
            FROM presentation_interactions i
            JOIN presentations p ON p.id = i.presentation_id
            WHERE i.user_id = $1
              AND i.interaction_type = 'follow'
              AND p.deleted_at IS NULL
            ORDER BY i.created_at DESC, p.id DESC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, PresentationRow>(&sql)
            .bind(user_id)
            .bind(to_i64(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PresentationRecord::from).collect())
    }

    async fn user_interactions(&self, user_id: UserId) -> Result<Vec<InteractionRecord>> {
        let rows = sqlx::query_as::<_, InteractionRow>(
            r#"
            SELECT i.user_id, i.presentation_id, i.interaction_type, i.created_at,
                   p.categories, p.keywords
            FROM presentation_interactions i
            JOIN presentations p ON p.id = i.presentation_id
            WHERE i.user_id = $1 AND p.deleted_at IS NULL
            ORDER BY i.created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .filter_map(|row| match row.interaction_type.parse() {
                Ok(kind) => Some(InteractionRecord {
                    user_id: row.user_id,
                    presentation_id: row.presentation_id,
                    kind,
                    occurred_at: row.created_at,
                    categories: row.categories,
                    keywords: row.keywords,
                }),
                Err(e) => {
                    warn!(user_id = user_id, error = %e, "Skipping interaction");
                    None
                }
            })
            .collect();

        Ok(records)
    }
}
