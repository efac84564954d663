#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use similarity_service::error::{AppError, Result};
use similarity_service::jobs::JobContext;
use similarity_service::models::{PresentationId, PresentationRecord, UserId};
use similarity_service::services::embedding::{EmbeddingProvider, GeneratedEmbedding};
use similarity_service::{Config, InMemoryStore, TextCanonicalizer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const MODEL: &str = "test-model";
pub const DIMS: usize = 4;

const VOCABULARY: [&str; DIMS] = ["health", "tech", "art", "food"];

/// Deterministic bag-of-words provider. Texts containing "broken" fail.
#[derive(Default)]
pub struct FakeProvider {
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    async fn generate(&self, text: &str, model: &str) -> Result<GeneratedEmbedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("broken") {
            return Err(AppError::Provider("upstream returned 500".into()));
        }

        let vector: Vec<f32> = VOCABULARY
            .iter()
            .map(|word| text.matches(word).count() as f32 + 0.1)
            .collect();

        Ok(GeneratedEmbedding {
            dims: vector.len(),
            vector,
            normalized: false,
            model: model.to_string(),
        })
    }
}

pub fn config() -> Config {
    Config {
        database_url: "postgres://localhost/test".to_string(),
        database_max_connections: 1,
        embedding_api_url: "http://localhost:9/v1".to_string(),
        embedding_api_key: None,
        embedding_model: MODEL.to_string(),
        embedding_dims: DIMS,
        embedding_provider_normalized: false,
        embedding_timeout_secs: 5,
        commit_chunk_size: 50,
        preference_top_n: 20,
        preference_half_life_days: 30.0,
        preference_cooldown_hours: 6,
        ranking_pool_size: 500,
        ranking_category_cap: 2,
        ranking_freshness_half_life_hours: 72.0,
        ranking_engagement_saturation: 20.0,
        event_queue_capacity: 8,
        log_format: "text".to_string(),
    }
}

pub fn context(store: &Arc<InMemoryStore>, chunk_size: usize) -> JobContext {
    JobContext::from_store(
        store.clone(),
        Arc::new(TextCanonicalizer::default()),
        chunk_size,
    )
}

pub fn presentation(
    id: PresentationId,
    owner_id: UserId,
    categories: &[&str],
    keywords: &[&str],
    created_at: DateTime<Utc>,
) -> PresentationRecord {
    PresentationRecord {
        id,
        owner_id,
        categories: categories.iter().map(|s| s.to_string()).collect(),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        description: Some(format!("Presentation number {id}")),
        quality_score: 0.0,
        is_ingested: false,
        is_published: true,
        is_deleted: false,
        created_at,
        likes_count: 0,
        comments_count: 0,
        follows_count: 0,
        bookmarks_count: 0,
    }
}
