// ============================================
// Neighbor Computer
// ============================================
//
// Brute-force cosine k-NN over every stored presentation vector of one
// (model, dims) scope. Vectors are unit-normalized on load so similarity is
// a plain dot product. Each target's list is replaced as a whole.

use crate::db::{CatalogRepository, CatalogScope, EmbeddingRepository, NeighborRepository};
use crate::error::{AppError, Result};
use crate::models::{Neighbor, PresentationId, ScoredNeighbor, SubjectKind};
use crate::services::embedding::vector;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One loaded, unit-length vector
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusEntry {
    pub id: PresentationId,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct NeighborRequest {
    /// Explicit targets; `None` means every presentation with a vector
    pub targets: Option<Vec<PresentationId>>,
    pub model: String,
    pub dims: usize,
    pub k: usize,
    pub scope: CatalogScope,
    /// Maximum number of targets processed
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborRunStats {
    pub targets: usize,
    pub updated: usize,
    pub skipped_missing_vector: usize,
    pub skipped_corrupt: usize,
    pub candidate_pool: usize,
    pub aborted: bool,
}

/// Top `k` most similar corpus entries for `corpus[target]`.
///
/// The target itself is never returned. Scores are sorted descending; the
/// sort is stable so equal scores keep corpus order.
pub fn top_k_neighbors(corpus: &[CorpusEntry], target: usize, k: usize) -> Vec<ScoredNeighbor> {
    let Some(source) = corpus.get(target) else {
        return Vec::new();
    };

    let mut scored: Vec<ScoredNeighbor> = corpus
        .iter()
        .enumerate()
        .filter(|(idx, entry)| *idx != target && entry.id != source.id)
        .map(|(_, entry)| ScoredNeighbor {
            neighbor_id: entry.id,
            score: vector::dot(&source.vector, &entry.vector),
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

pub struct NeighborComputer {
    embeddings: Arc<dyn EmbeddingRepository>,
    neighbors: Arc<dyn NeighborRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl NeighborComputer {
    pub fn new(
        embeddings: Arc<dyn EmbeddingRepository>,
        neighbors: Arc<dyn NeighborRepository>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Self {
        Self {
            embeddings,
            neighbors,
            catalog,
        }
    }

    /// Load the in-scope corpus for `(model, dims)`.
    ///
    /// Rows that fail to decode are skipped and counted.
    pub async fn load_corpus(
        &self,
        model: &str,
        dims: usize,
        scope: CatalogScope,
    ) -> Result<(Vec<CorpusEntry>, usize)> {
        let in_scope = self.catalog.presentation_ids_in_scope(scope).await?;
        let rows = self
            .embeddings
            .load_embeddings(SubjectKind::Presentation, model, dims)
            .await?;

        let mut corpus = Vec::with_capacity(rows.len());
        let mut corrupt = 0;
        for row in rows.iter().filter(|r| in_scope.contains(&r.subject.id)) {
            match row.unit_vector() {
                Ok(vector) => corpus.push(CorpusEntry {
                    id: row.subject.id,
                    vector,
                }),
                Err(e) => {
                    warn!(
                        presentation_id = row.subject.id,
                        error = %e,
                        "Skipping undecodable vector"
                    );
                    corrupt += 1;
                }
            }
        }

        Ok((corpus, corrupt))
    }

    pub async fn run(&self, request: &NeighborRequest) -> Result<NeighborRunStats> {
        if request.k == 0 {
            return Err(AppError::Validation("k must be greater than 0".into()));
        }

        let start = Instant::now();
        let mut stats = NeighborRunStats::default();

        let (corpus, corrupt) = self
            .load_corpus(&request.model, request.dims, request.scope)
            .await?;
        stats.skipped_corrupt = corrupt;
        stats.candidate_pool = corpus.len();

        if corpus.is_empty() {
            warn!(
                model = %request.model,
                dims = request.dims,
                "No vectors in scope, aborting neighbor batch"
            );
            stats.aborted = true;
            return Ok(stats);
        }

        let index: HashMap<PresentationId, usize> = corpus
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.id, idx))
            .collect();

        let targets: Vec<PresentationId> = match &request.targets {
            Some(ids) => {
                let mut seen = HashSet::new();
                ids.iter().copied().filter(|id| seen.insert(*id)).collect()
            }
            None => corpus.iter().map(|entry| entry.id).collect(),
        };
        let limit = request.limit.unwrap_or(usize::MAX);

        for target in targets.into_iter().take(limit) {
            stats.targets += 1;

            let Some(&idx) = index.get(&target) else {
                warn!(
                    presentation_id = target,
                    model = %request.model,
                    "No vector for presentation, skipping"
                );
                stats.skipped_missing_vector += 1;
                continue;
            };

            let neighbors = top_k_neighbors(&corpus, idx, request.k);
            let written = self
                .neighbors
                .replace_neighbors(target, &request.model, &neighbors)
                .await?;
            debug!(presentation_id = target, neighbors = written, "Replaced neighbor list");
            stats.updated += 1;
        }

        info!(
            model = %request.model,
            targets = stats.targets,
            updated = stats.updated,
            skipped_missing_vector = stats.skipped_missing_vector,
            skipped_corrupt = stats.skipped_corrupt,
            candidate_pool = stats.candidate_pool,
            duration_ms = start.elapsed().as_millis() as u64,
            "Neighbor batch completed"
        );

        Ok(stats)
    }
}

/// Read side of the stored neighbor lists
pub struct SimilarPresentations {
    neighbors: Arc<dyn NeighborRepository>,
}

impl SimilarPresentations {
    pub fn new(neighbors: Arc<dyn NeighborRepository>) -> Self {
        Self { neighbors }
    }

    /// Stored neighbors of `presentation_id`, best first.
    pub async fn similar(
        &self,
        presentation_id: PresentationId,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        self.neighbors
            .list_neighbors(presentation_id, model, limit)
            .await
    }
}
