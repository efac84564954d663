// ============================================
// Persistence layer
// ============================================
//
// Repository traits consumed by the services and jobs, with two
// implementations:
// - PgStore: PostgreSQL via sqlx (catalog tables are owned by the catalog
//   service and only read here)
// - InMemoryStore: process-local tables for tests and dry runs

mod catalog;
mod embeddings;
pub mod memory;
mod neighbors;
mod preferences;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::models::{
    InteractionRecord, Neighbor, PresentationId, PresentationRecord, ScoredNeighbor,
    SubjectEmbedding, SubjectKey, SubjectKind, UserId, UserPreference,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashSet;

/// Which catalog rows a batch may touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogScope {
    pub include_unpublished: bool,
    pub include_deleted: bool,
}

impl CatalogScope {
    pub fn contains(&self, presentation: &PresentationRecord) -> bool {
        (self.include_unpublished || presentation.is_published)
            && (self.include_deleted || !presentation.is_deleted)
    }
}

/// Selection of presentations for an embedding pass.
///
/// Results are ordered stalest first: presentations without an embedding
/// for `model`, then by embedding `updated_at` ascending, then by id.
#[derive(Debug, Clone, Default)]
pub struct PresentationQuery {
    pub ids: Option<Vec<PresentationId>>,
    pub scope: CatalogScope,
    pub model: String,
    /// Only presentations that have no embedding for `model`
    pub missing_only: bool,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    async fn find_embedding(
        &self,
        subject: SubjectKey,
        model: &str,
    ) -> Result<Option<SubjectEmbedding>>;

    /// Upsert all rows in a single transaction.
    async fn save_embeddings(&self, rows: &[SubjectEmbedding]) -> Result<()>;

    /// Every row for `(kind, model, dims)`, ordered by subject id.
    async fn load_embeddings(
        &self,
        kind: SubjectKind,
        model: &str,
        dims: usize,
    ) -> Result<Vec<SubjectEmbedding>>;
}

#[async_trait]
pub trait NeighborRepository: Send + Sync {
    /// Replace the whole neighbor list of `(presentation_id, model)`.
    ///
    /// Deletes existing rows and inserts `neighbors` with dense ranks
    /// `1..=len` in one transaction, serialized per key.
    async fn replace_neighbors(
        &self,
        presentation_id: PresentationId,
        model: &str,
        neighbors: &[ScoredNeighbor],
    ) -> Result<usize>;

    async fn list_neighbors(
        &self,
        presentation_id: PresentationId,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Neighbor>>;

    /// Drop every neighbor list of a deleted presentation.
    async fn delete_for_presentation(&self, presentation_id: PresentationId) -> Result<u64>;
}

#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn find_preference(&self, user_id: UserId) -> Result<Option<UserPreference>>;

    async fn save_preference(&self, preference: &UserPreference) -> Result<()>;

    /// Users with interactions whose profile is missing or older than
    /// `updated_before`, most recently active first.
    async fn users_due_for_refresh(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserId>>;

    /// Users with a non-empty profile, stalest user embedding for `model`
    /// first.
    async fn users_with_preferences(&self, model: &str, limit: usize) -> Result<Vec<UserId>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_presentations(&self, query: &PresentationQuery)
        -> Result<Vec<PresentationRecord>>;

    async fn presentation_ids_in_scope(&self, scope: CatalogScope)
        -> Result<HashSet<PresentationId>>;

    /// Newest published, non-deleted presentations (created_at desc, id desc).
    async fn recent_published(
        &self,
        limit: usize,
        exclude_owner: Option<UserId>,
    ) -> Result<Vec<PresentationRecord>>;

    async fn recent_owned(&self, user_id: UserId, limit: usize)
        -> Result<Vec<PresentationRecord>>;

    async fn recently_followed(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PresentationRecord>>;

    async fn user_interactions(&self, user_id: UserId) -> Result<Vec<InteractionRecord>>;
}

/// PostgreSQL-backed implementation of every repository
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_scope() {
        let mut p = PresentationRecord {
            id: 1,
            owner_id: 1,
            categories: vec![],
            keywords: vec![],
            description: None,
            quality_score: 0.0,
            is_ingested: false,
            is_published: false,
            is_deleted: false,
            created_at: Utc::now(),
            likes_count: 0,
            comments_count: 0,
            follows_count: 0,
            bookmarks_count: 0,
        };
        assert!(!CatalogScope::default().contains(&p));
        assert!(CatalogScope {
            include_unpublished: true,
            include_deleted: false
        }
        .contains(&p));

        p.is_published = true;
        p.is_deleted = true;
        assert!(!CatalogScope::default().contains(&p));
        assert!(CatalogScope {
            include_unpublished: false,
            include_deleted: true
        }
        .contains(&p));
    }
}
