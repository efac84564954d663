use super::config::{RankingConfig, ScoreWeights};
use crate::models::{PresentationId, PresentationRecord};
use crate::services::canonical::TextCanonicalizer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Categories / keywords of the viewer's own and followed presentations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedProfile {
    pub categories: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
}

impl SeedProfile {
    pub fn from_presentations<'a, I>(presentations: I, canonicalizer: &TextCanonicalizer) -> Self
    where
        I: IntoIterator<Item = &'a PresentationRecord>,
    {
        let mut seed = SeedProfile::default();
        for p in presentations {
            seed.categories
                .extend(canonicalizer.normalize_set(&p.categories));
            seed.keywords.extend(canonicalizer.normalize_set(&p.keywords));
        }
        seed
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.keywords.is_empty()
    }
}

/// Signals behind one ranked item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemStats {
    pub engagement: f64,
    pub freshness: f64,
    pub personalization: f64,
    pub score: f64,
    pub engagement_total: i64,
    pub age_hours: f64,
    /// Normalized primary category used by the diversity cap
    pub category: Option<String>,
}

/// A candidate with its computed score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub presentation: PresentationRecord,
    pub stats: ItemStats,
}

impl ScoredCandidate {
    pub fn id(&self) -> PresentationId {
        self.presentation.id
    }

    pub fn category(&self) -> Option<&str> {
        self.stats.category.as_deref()
    }
}

/// Saturating engagement signal in [0, 1)
pub fn engagement_score(total: i64, saturation: f64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let total = total as f64;
    if saturation <= 0.0 {
        return 1.0;
    }
    total / (total + saturation)
}

/// Exponential freshness decay, 1.0 for brand new items
pub fn freshness_score(age_hours: f64, half_life_hours: f64) -> f64 {
    if half_life_hours <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_hours.max(0.0) / half_life_hours)
}

fn overlap_fraction(terms: &BTreeSet<String>, seed: &BTreeSet<String>) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| seed.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

pub struct CandidateScorer<'a> {
    config: &'a RankingConfig,
    canonicalizer: &'a TextCanonicalizer,
    weights: ScoreWeights,
    seed: Option<&'a SeedProfile>,
    now: DateTime<Utc>,
}

impl<'a> CandidateScorer<'a> {
    /// Personalized weights are used only with a non-empty seed.
    pub fn new(
        config: &'a RankingConfig,
        canonicalizer: &'a TextCanonicalizer,
        seed: Option<&'a SeedProfile>,
        now: DateTime<Utc>,
    ) -> Self {
        let seed = seed.filter(|s| !s.is_empty());
        let weights = if seed.is_some() {
            config.personalized_weights
        } else {
            config.generic_weights
        };

        Self {
            config,
            canonicalizer,
            weights,
            seed,
            now,
        }
    }

    pub fn is_personalized(&self) -> bool {
        self.seed.is_some()
    }

    fn personalization(&self, categories: &BTreeSet<String>, keywords: &BTreeSet<String>) -> f64 {
        match self.seed {
            Some(seed) => {
                self.config.category_match_weight * overlap_fraction(categories, &seed.categories)
                    + self.config.keyword_match_weight
                        * overlap_fraction(keywords, &seed.keywords)
            }
            None => 0.0,
        }
    }

    pub fn score(&self, presentation: PresentationRecord) -> ScoredCandidate {
        let categories = self.canonicalizer.normalize_set(&presentation.categories);
        let keywords = self.canonicalizer.normalize_set(&presentation.keywords);

        let engagement_total = presentation.engagement_total();
        let age_hours =
            (self.now - presentation.created_at).num_seconds().max(0) as f64 / 3600.0;

        let engagement = engagement_score(engagement_total, self.config.engagement_saturation);
        let freshness = freshness_score(age_hours, self.config.freshness_half_life_hours);
        let personalization = self.personalization(&categories, &keywords);

        let score = self.weights.engagement * engagement
            + self.weights.freshness * freshness
            + self.weights.personalization * personalization;

        let category = presentation
            .primary_category()
            .map(|c| self.canonicalizer.normalize(c))
            .filter(|c| !c.is_empty());

        ScoredCandidate {
            presentation,
            stats: ItemStats {
                engagement,
                freshness,
                personalization,
                score,
                engagement_total,
                age_hours,
                category,
            },
        }
    }

    /// Score every candidate, best first; ties by ascending id.
    pub fn score_all(&self, candidates: Vec<PresentationRecord>) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> =
            candidates.into_iter().map(|p| self.score(p)).collect();

        scored.sort_by(|a, b| {
            b.stats
                .score
                .partial_cmp(&a.stats.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id().cmp(&b.id()))
        });
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engagement_is_monotonic_and_saturating() {
        assert_eq!(engagement_score(0, 20.0), 0.0);
        let low = engagement_score(5, 20.0);
        let high = engagement_score(500, 20.0);
        assert!(low < high);
        assert!(high < 1.0);
        assert!((engagement_score(20, 20.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_freshness_halves_per_half_life() {
        assert_eq!(freshness_score(0.0, 72.0), 1.0);
        assert!((freshness_score(72.0, 72.0) - 0.5).abs() < 1e-12);
        assert!(freshness_score(10.0, 72.0) > freshness_score(20.0, 72.0));
    }

    #[test]
    fn test_seed_profile_normalizes_terms() {
        let canonicalizer = TextCanonicalizer::default();
        let record = PresentationRecord {
            id: 1,
            owner_id: 1,
            categories: vec!["Healthcare".into()],
            keywords: vec!["The Diet".into()],
            description: None,
            quality_score: 0.0,
            is_ingested: false,
            is_published: true,
            is_deleted: false,
            created_at: Utc::now(),
            likes_count: 0,
            comments_count: 0,
            follows_count: 0,
            bookmarks_count: 0,
        };
        let seed = SeedProfile::from_presentations([&record], &canonicalizer);
        assert!(seed.categories.contains("health"));
        assert!(seed.keywords.contains("diet"));
    }
}
