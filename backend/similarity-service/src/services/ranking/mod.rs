/// Ranking Engine
///
/// Ranks a bounded pool of recent published presentations into a homepage
/// feed.
///
/// # Workflow
/// 1. Candidate pool: newest published presentations, minus excluded ids
///    and (for a signed-in viewer) the viewer's own content
/// 2. Seed profile: tags of the viewer's own and followed presentations
/// 3. Scoring: engagement + freshness + personalization, linear weights
/// 4. Category diversity cap with deferred backfill
mod config;
mod diversity;
mod scorer;

pub use config::{RankingConfig, ScoreWeights};
pub use diversity::CategoryDiversityLayer;
pub use scorer::{
    engagement_score, freshness_score, CandidateScorer, ItemStats, ScoredCandidate, SeedProfile,
};

use crate::db::CatalogRepository;
use crate::error::Result;
use crate::models::{PresentationId, PresentationRecord, UserId};
use crate::services::canonical::TextCanonicalizer;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Ranked homepage
#[derive(Debug, Clone)]
pub struct HomepageRecommendation {
    pub items: Vec<PresentationRecord>,
    pub personalized: bool,
    pub stats: HashMap<PresentationId, ItemStats>,
}

impl HomepageRecommendation {
    pub fn is_personalized(&self) -> bool {
        self.personalized
    }

    pub fn item_ids(&self) -> Vec<PresentationId> {
        self.items.iter().map(|p| p.id).collect()
    }
}

/// Score and select the top `n` of an already filtered pool.
pub fn rank_candidates(
    config: &RankingConfig,
    canonicalizer: &TextCanonicalizer,
    candidates: Vec<PresentationRecord>,
    seed: Option<&SeedProfile>,
    n: usize,
    now: DateTime<Utc>,
) -> HomepageRecommendation {
    let scorer = CandidateScorer::new(config, canonicalizer, seed, now);
    let personalized = scorer.is_personalized();

    let ranked = scorer.score_all(candidates);
    let selected = CategoryDiversityLayer::new(config.category_cap).select(ranked, n);

    let mut items = Vec::with_capacity(selected.len());
    let mut stats = HashMap::with_capacity(selected.len());
    for candidate in selected {
        stats.insert(candidate.presentation.id, candidate.stats);
        items.push(candidate.presentation);
    }

    HomepageRecommendation {
        items,
        personalized,
        stats,
    }
}

pub struct HomepageRanker {
    catalog: Arc<dyn CatalogRepository>,
    config: RankingConfig,
    canonicalizer: Arc<TextCanonicalizer>,
}

impl HomepageRanker {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        config: RankingConfig,
        canonicalizer: Arc<TextCanonicalizer>,
    ) -> Self {
        Self {
            catalog,
            config,
            canonicalizer,
        }
    }

    pub async fn recommend_homepage(
        &self,
        viewer: Option<UserId>,
        n: usize,
        excluded: &HashSet<PresentationId>,
    ) -> Result<HomepageRecommendation> {
        self.recommend_at(viewer, n, excluded, Utc::now()).await
    }

    /// Same as [`Self::recommend_homepage`] with an explicit clock.
    pub async fn recommend_at(
        &self,
        viewer: Option<UserId>,
        n: usize,
        excluded: &HashSet<PresentationId>,
        now: DateTime<Utc>,
    ) -> Result<HomepageRecommendation> {
        if n == 0 {
            return Ok(HomepageRecommendation {
                items: Vec::new(),
                personalized: false,
                stats: HashMap::new(),
            });
        }

        // Over-fetch so excluded ids do not shrink the pool
        let fetch = self.config.pool_size.saturating_add(excluded.len());
        let mut candidates = self.catalog.recent_published(fetch, viewer).await?;
        candidates.retain(|p| !excluded.contains(&p.id));
        candidates.truncate(self.config.pool_size);

        let seed = match viewer {
            Some(user_id) => Some(self.seed_profile(user_id).await?),
            None => None,
        };

        let recommendation = rank_candidates(
            &self.config,
            &self.canonicalizer,
            candidates,
            seed.as_ref(),
            n,
            now,
        );

        info!(
            viewer = ?viewer,
            requested = n,
            returned = recommendation.items.len(),
            personalized = recommendation.personalized,
            "Ranked homepage"
        );

        Ok(recommendation)
    }

    /// Seed profile from the viewer's recent own and followed presentations
    pub async fn seed_profile(&self, user_id: UserId) -> Result<SeedProfile> {
        let own = self
            .catalog
            .recent_owned(user_id, self.config.seed_own_limit)
            .await?;
        let followed = self
            .catalog
            .recently_followed(user_id, self.config.seed_followed_limit)
            .await?;

        let seed = SeedProfile::from_presentations(
            own.iter().chain(followed.iter()),
            &self.canonicalizer,
        );
        debug!(
            user_id = user_id,
            categories = seed.categories.len(),
            keywords = seed.keywords.len(),
            "Built seed profile"
        );
        Ok(seed)
    }
}
