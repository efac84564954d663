//! Process-local implementation of every repository trait.
//!
//! Mirrors the ordering and scoping rules of the SQL queries so jobs and
//! services behave the same against either store.

use super::{
    CatalogRepository, CatalogScope, EmbeddingRepository, NeighborRepository,
    PreferenceRepository, PresentationQuery,
};
use crate::error::Result;
use crate::models::{
    InteractionRecord, InteractionType, Neighbor, PresentationId, PresentationRecord,
    ScoredNeighbor, SubjectEmbedding, SubjectKey, SubjectKind, UserId, UserPreference,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredInteraction {
    user_id: UserId,
    presentation_id: PresentationId,
    kind: InteractionType,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    presentations: BTreeMap<PresentationId, PresentationRecord>,
    interactions: Vec<StoredInteraction>,
    embeddings: HashMap<(SubjectKey, String), SubjectEmbedding>,
    neighbors: HashMap<(PresentationId, String), Vec<Neighbor>>,
    preferences: HashMap<UserId, UserPreference>,
    embedding_commits: usize,
}

impl Tables {
    fn embedding_updated_at(&self, subject: SubjectKey, model: &str) -> Option<DateTime<Utc>> {
        self.embeddings
            .get(&(subject, model.to_string()))
            .map(|e| e.updated_at)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_presentation(&self, presentation: PresentationRecord) {
        self.tables
            .write()
            .await
            .presentations
            .insert(presentation.id, presentation);
    }

    pub async fn record_interaction(
        &self,
        user_id: UserId,
        presentation_id: PresentationId,
        kind: InteractionType,
        occurred_at: DateTime<Utc>,
    ) {
        self.tables.write().await.interactions.push(StoredInteraction {
            user_id,
            presentation_id,
            kind,
            occurred_at,
        });
    }

    /// Remove a toggled-off follow / bookmark
    pub async fn remove_interaction(
        &self,
        user_id: UserId,
        presentation_id: PresentationId,
        kind: InteractionType,
    ) {
        self.tables.write().await.interactions.retain(|i| {
            !(i.user_id == user_id && i.presentation_id == presentation_id && i.kind == kind)
        });
    }

    /// Number of committed embedding batches
    pub async fn embedding_commits(&self) -> usize {
        self.tables.read().await.embedding_commits
    }

    pub async fn embedding_count(&self, kind: SubjectKind) -> usize {
        self.tables
            .read()
            .await
            .embeddings
            .keys()
            .filter(|(subject, _)| subject.kind == kind)
            .count()
    }
}

#[async_trait]
impl EmbeddingRepository for InMemoryStore {
    async fn find_embedding(
        &self,
        subject: SubjectKey,
        model: &str,
    ) -> Result<Option<SubjectEmbedding>> {
        Ok(self
            .tables
            .read()
            .await
            .embeddings
            .get(&(subject, model.to_string()))
            .cloned())
    }

    async fn save_embeddings(&self, rows: &[SubjectEmbedding]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tables = self.tables.write().await;
        for row in rows {
            let key = (row.subject, row.model.clone());
            let created_at = tables
                .embeddings
                .get(&key)
                .map(|existing| existing.created_at)
                .unwrap_or(row.created_at);
            tables.embeddings.insert(
                key,
                SubjectEmbedding {
                    created_at,
                    ..row.clone()
                },
            );
        }
        tables.embedding_commits += 1;
        Ok(())
    }

    async fn load_embeddings(
        &self,
        kind: SubjectKind,
        model: &str,
        dims: usize,
    ) -> Result<Vec<SubjectEmbedding>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<SubjectEmbedding> = tables
            .embeddings
            .values()
            .filter(|e| e.subject.kind == kind && e.model == model && e.dims == dims)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.subject.id);
        Ok(rows)
    }
}

#[async_trait]
impl NeighborRepository for InMemoryStore {
    async fn replace_neighbors(
        &self,
        presentation_id: PresentationId,
        model: &str,
        neighbors: &[ScoredNeighbor],
    ) -> Result<usize> {
        let now = Utc::now();
        let rows: Vec<Neighbor> = neighbors
            .iter()
            .enumerate()
            .map(|(idx, n)| Neighbor {
                presentation_id,
                model: model.to_string(),
                rank: (idx + 1) as u32,
                neighbor_id: n.neighbor_id,
                score: n.score,
                updated_at: now,
            })
            .collect();

        self.tables
            .write()
            .await
            .neighbors
            .insert((presentation_id, model.to_string()), rows);
        Ok(neighbors.len())
    }

    async fn list_neighbors(
        &self,
        presentation_id: PresentationId,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        Ok(self
            .tables
            .read()
            .await
            .neighbors
            .get(&(presentation_id, model.to_string()))
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_for_presentation(&self, presentation_id: PresentationId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before: usize = tables.neighbors.values().map(Vec::len).sum();
        tables.neighbors.retain(|(id, _), _| *id != presentation_id);
        let after: usize = tables.neighbors.values().map(Vec::len).sum();
        Ok((before - after) as u64)
    }
}

#[async_trait]
impl PreferenceRepository for InMemoryStore {
    async fn find_preference(&self, user_id: UserId) -> Result<Option<UserPreference>> {
        Ok(self.tables.read().await.preferences.get(&user_id).cloned())
    }

    async fn save_preference(&self, preference: &UserPreference) -> Result<()> {
        self.tables
            .write()
            .await
            .preferences
            .insert(preference.user_id, preference.clone());
        Ok(())
    }

    async fn users_due_for_refresh(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserId>> {
        let tables = self.tables.read().await;
        let mut last_activity: HashMap<UserId, DateTime<Utc>> = HashMap::new();
        for interaction in &tables.interactions {
            let entry = last_activity
                .entry(interaction.user_id)
                .or_insert(interaction.occurred_at);
            if interaction.occurred_at > *entry {
                *entry = interaction.occurred_at;
            }
        }

        let mut due: Vec<(UserId, DateTime<Utc>)> = last_activity
            .into_iter()
            .filter(|(user_id, _)| {
                tables
                    .preferences
                    .get(user_id)
                    .map_or(true, |p| p.updated_at < updated_before)
            })
            .collect();
        due.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Ok(due.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    async fn users_with_preferences(&self, model: &str, limit: usize) -> Result<Vec<UserId>> {
        let tables = self.tables.read().await;
        let mut users: Vec<(Option<DateTime<Utc>>, UserId)> = tables
            .preferences
            .values()
            .filter(|p| !p.is_empty())
            .map(|p| {
                (
                    tables.embedding_updated_at(SubjectKey::user(p.user_id), model),
                    p.user_id,
                )
            })
            .collect();
        // None sorts before Some: users without an embedding come first
        users.sort();

        Ok(users.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryStore {
    async fn find_presentations(
        &self,
        query: &PresentationQuery,
    ) -> Result<Vec<PresentationRecord>> {
        let tables = self.tables.read().await;
        let wanted: Option<HashSet<PresentationId>> =
            query.ids.as_ref().map(|ids| ids.iter().copied().collect());

        let mut rows: Vec<(Option<DateTime<Utc>>, PresentationRecord)> = tables
            .presentations
            .values()
            .filter(|p| wanted.as_ref().map_or(true, |ids| ids.contains(&p.id)))
            .filter(|p| query.scope.contains(p))
            .map(|p| {
                (
                    tables.embedding_updated_at(SubjectKey::presentation(p.id), &query.model),
                    p.clone(),
                )
            })
            .filter(|(embedded_at, _)| !query.missing_only || embedded_at.is_none())
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().take(limit).map(|(_, p)| p).collect())
    }

    async fn presentation_ids_in_scope(
        &self,
        scope: CatalogScope,
    ) -> Result<HashSet<PresentationId>> {
        Ok(self
            .tables
            .read()
            .await
            .presentations
            .values()
            .filter(|p| scope.contains(p))
            .map(|p| p.id)
            .collect())
    }

    async fn recent_published(
        &self,
        limit: usize,
        exclude_owner: Option<UserId>,
    ) -> Result<Vec<PresentationRecord>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<PresentationRecord> = tables
            .presentations
            .values()
            .filter(|p| p.is_published && !p.is_deleted)
            .filter(|p| exclude_owner.map_or(true, |owner| p.owner_id != owner))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn recent_owned(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PresentationRecord>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<PresentationRecord> = tables
            .presentations
            .values()
            .filter(|p| p.owner_id == user_id && !p.is_deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn recently_followed(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PresentationRecord>> {
        let tables = self.tables.read().await;
        let mut follows: Vec<&StoredInteraction> = tables
            .interactions
            .iter()
            .filter(|i| i.user_id == user_id && i.kind == InteractionType::Follow)
            .collect();
        follows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.presentation_id.cmp(&a.presentation_id))
        });

        Ok(follows
            .into_iter()
            .filter_map(|i| tables.presentations.get(&i.presentation_id))
            .filter(|p| !p.is_deleted)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn user_interactions(&self, user_id: UserId) -> Result<Vec<InteractionRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<InteractionRecord> = tables
            .interactions
            .iter()
            .filter(|i| i.user_id == user_id)
            .filter_map(|i| {
                tables
                    .presentations
                    .get(&i.presentation_id)
                    .filter(|p| !p.is_deleted)
                    .map(|p| InteractionRecord {
                        user_id: i.user_id,
                        presentation_id: i.presentation_id,
                        kind: i.kind,
                        occurred_at: i.occurred_at,
                        categories: p.categories.clone(),
                        keywords: p.keywords.clone(),
                    })
            })
            .collect();
        records.sort_by_key(|r| r.occurred_at);
        Ok(records)
    }
}
