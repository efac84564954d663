// ============================================
// compute-presentation-embeddings
// ============================================
//
// Workflow:
// 1. Select presentations (explicit id, or stalest first up to `limit`)
// 2. Canonicalize + hash each one and run it through the embedding store
// 3. Commit staged vectors every `chunk_size` items
// 4. Recompute neighbor lists of presentations whose vector changed

use super::{cooldown_window, limit_from_flag, JobContext};
use crate::db::{CatalogScope, PresentationQuery};
use crate::error::Result;
use crate::models::{PresentationId, SubjectKey};
use crate::services::canonical::content_hash;
use crate::services::embedding::{
    EmbeddingPolicy, EmbeddingProvider, EmbeddingRequest, EmbeddingStore, SkipReason, UnitOfWork,
};
use crate::services::neighbors::{NeighborComputer, NeighborRequest};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PresentationEmbeddingsConfig {
    pub presentation_id: Option<PresentationId>,
    /// 0 = unlimited
    pub limit: usize,
    pub cooldown_hours: i64,
    pub force: bool,
    pub no_neighbors: bool,
    /// Neighbors kept per changed presentation
    pub k: usize,
    /// Quality score at which a presentation becomes eligible (frozen)
    pub min_score: f64,
    pub missing_only: bool,
    pub allow_eligible_recompute: bool,
    pub scope: CatalogScope,
    pub model: String,
    pub dims: usize,
}

impl Default for PresentationEmbeddingsConfig {
    fn default() -> Self {
        Self {
            presentation_id: None,
            limit: 50,
            cooldown_hours: 6,
            force: false,
            no_neighbors: false,
            k: 10,
            min_score: 12.0,
            missing_only: false,
            allow_eligible_recompute: false,
            scope: CatalogScope::default(),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentationEmbeddingsStats {
    pub processed: usize,
    pub computed: usize,
    pub skipped_frozen: usize,
    pub skipped_unchanged: usize,
    pub skipped_cooldown: usize,
    pub skipped_empty: usize,
    pub failed: usize,
    pub committed: usize,
    pub neighbors_updated: usize,
    pub duration_ms: u64,
}

impl PresentationEmbeddingsStats {
    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::FrozenEligible => self.skipped_frozen += 1,
            SkipReason::HashUnchanged => self.skipped_unchanged += 1,
            SkipReason::CooldownActive => self.skipped_cooldown += 1,
        }
    }
}

pub async fn run(
    ctx: &JobContext,
    provider: Arc<dyn EmbeddingProvider>,
    config: &PresentationEmbeddingsConfig,
) -> Result<PresentationEmbeddingsStats> {
    let start = Instant::now();
    let mut stats = PresentationEmbeddingsStats::default();

    let query = PresentationQuery {
        ids: config.presentation_id.map(|id| vec![id]),
        scope: config.scope,
        model: config.model.clone(),
        missing_only: config.missing_only,
        limit: match config.presentation_id {
            Some(_) => None,
            None => limit_from_flag(config.limit),
        },
    };
    let presentations = ctx.catalog.find_presentations(&query).await?;

    if presentations.is_empty() {
        info!(
            presentation_id = ?config.presentation_id,
            "No presentations to embed, nothing to process"
        );
        return Ok(stats);
    }

    info!(
        candidates = presentations.len(),
        model = %config.model,
        dims = config.dims,
        force = config.force,
        "Starting presentation embedding pass"
    );

    let store = EmbeddingStore::new(ctx.embeddings.clone(), provider);
    let cooldown = cooldown_window(config.cooldown_hours)?;
    let mut uow = UnitOfWork::new();
    let mut changed: Vec<PresentationId> = Vec::new();

    for chunk in presentations.chunks(ctx.chunk_size) {
        for presentation in chunk {
            stats.processed += 1;

            let text = ctx.canonicalizer.canonicalize_presentation(presentation);
            if text.is_empty() {
                warn!(presentation_id = presentation.id, "Presentation has no content to embed");
                stats.skipped_empty += 1;
                continue;
            }
            let hash = content_hash(&text);

            let policy = EmbeddingPolicy {
                force: config.force,
                eligible: presentation.is_eligible(config.min_score),
                allow_eligible_recompute: config.allow_eligible_recompute,
                cooldown,
            };
            let request = EmbeddingRequest {
                subject: SubjectKey::presentation(presentation.id),
                model: &config.model,
                dims: config.dims,
                text: &text,
                content_hash: &hash,
            };

            match store.ensure_embedding(&mut uow, request, &policy).await {
                Ok(ensured) if ensured.changed => {
                    stats.computed += 1;
                    changed.push(presentation.id);
                }
                Ok(ensured) => {
                    if let Some(reason) = ensured.skip {
                        debug!(presentation_id = presentation.id, reason = %reason, "Skipped");
                        stats.record_skip(reason);
                    }
                }
                Err(e) if e.is_item_scoped() => {
                    warn!(
                        presentation_id = presentation.id,
                        error = %e,
                        "Failed to embed presentation"
                    );
                    stats.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let committed = store.commit(&mut uow).await?;
        stats.committed += committed;
        debug!(committed = committed, "Committed embedding chunk");
    }

    if !config.no_neighbors && !changed.is_empty() {
        let computer = NeighborComputer::new(
            ctx.embeddings.clone(),
            ctx.neighbors.clone(),
            ctx.catalog.clone(),
        );
        let neighbor_stats = computer
            .run(&NeighborRequest {
                targets: Some(changed),
                model: config.model.clone(),
                dims: config.dims,
                k: config.k,
                scope: config.scope,
                limit: None,
            })
            .await?;
        stats.neighbors_updated = neighbor_stats.updated;
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        processed = stats.processed,
        computed = stats.computed,
        skipped_frozen = stats.skipped_frozen,
        skipped_unchanged = stats.skipped_unchanged,
        skipped_cooldown = stats.skipped_cooldown,
        skipped_empty = stats.skipped_empty,
        failed = stats.failed,
        committed = stats.committed,
        neighbors_updated = stats.neighbors_updated,
        duration_ms = stats.duration_ms,
        "Presentation embedding pass completed"
    );

    Ok(stats)
}
