// ============================================
// Preference Aggregator
// ============================================
//
// Builds a bounded category / keyword profile from a user's interactions.
//
// weight(term) = SUM(interaction_weight * 0.5 ^ (age_days / half_life_days))
//
// Each map keeps its top-N terms. Ties on weight go to the term touched
// most recently, then to the lexicographically smaller term.

mod events;

pub use events::{
    create_event_queue, spawn_preference_worker, EventDispatcher, EventReceiver,
    InteractionToggled,
};

use crate::db::{CatalogRepository, PreferenceRepository};
use crate::error::Result;
use crate::models::{InteractionRecord, InteractionType, UserId, UserPreference};
use crate::services::canonical::TextCanonicalizer;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Implicit weight of each interaction type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionWeights {
    pub view: f64,
    pub click: f64,
    pub follow: f64,
    pub like: f64,
    pub bookmark: f64,
}

impl Default for InteractionWeights {
    fn default() -> Self {
        Self {
            view: 4.0,
            click: 1.0,
            follow: 3.0,
            like: 2.0,
            bookmark: 3.0,
        }
    }
}

impl InteractionWeights {
    pub fn weight(&self, kind: InteractionType) -> f64 {
        match kind {
            InteractionType::View => self.view,
            InteractionType::Click => self.click,
            InteractionType::Follow => self.follow,
            InteractionType::Like => self.like,
            InteractionType::Bookmark => self.bookmark,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreferenceConfig {
    pub weights: InteractionWeights,
    /// Entries kept per map
    pub top_n: usize,
    /// Half-life of an interaction's weight; 0 disables decay
    pub half_life_days: f64,
}

impl Default for PreferenceConfig {
    fn default() -> Self {
        Self {
            weights: InteractionWeights::default(),
            top_n: 20,
            half_life_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TermScore {
    weight: f64,
    last_seen: DateTime<Utc>,
}

pub struct PreferenceAggregator {
    config: PreferenceConfig,
    canonicalizer: Arc<TextCanonicalizer>,
}

impl PreferenceAggregator {
    pub fn new(config: PreferenceConfig, canonicalizer: Arc<TextCanonicalizer>) -> Self {
        Self {
            config,
            canonicalizer,
        }
    }

    /// Decay multiplier for an interaction that happened at `at`
    fn decay(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if self.config.half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = ((now - at).num_seconds().max(0) as f64) / 86_400.0;
        0.5_f64.powf(age_days / self.config.half_life_days)
    }

    pub fn aggregate(
        &self,
        user_id: UserId,
        interactions: &[InteractionRecord],
        now: DateTime<Utc>,
    ) -> UserPreference {
        let mut categories: HashMap<String, TermScore> = HashMap::new();
        let mut keywords: HashMap<String, TermScore> = HashMap::new();

        for interaction in interactions {
            let weight = self.config.weights.weight(interaction.kind)
                * self.decay(interaction.occurred_at, now);

            for term in self.canonicalizer.normalize_set(&interaction.categories) {
                accumulate(&mut categories, term, weight, interaction.occurred_at);
            }
            for term in self.canonicalizer.normalize_set(&interaction.keywords) {
                accumulate(&mut keywords, term, weight, interaction.occurred_at);
            }
        }

        UserPreference {
            user_id,
            fav_categories: top_terms(categories, self.config.top_n),
            fav_keywords: top_terms(keywords, self.config.top_n),
            updated_at: now,
        }
    }
}

fn accumulate(
    scores: &mut HashMap<String, TermScore>,
    term: String,
    weight: f64,
    at: DateTime<Utc>,
) {
    let entry = scores.entry(term).or_insert(TermScore {
        weight: 0.0,
        last_seen: at,
    });
    entry.weight += weight;
    if at > entry.last_seen {
        entry.last_seen = at;
    }
}

fn top_terms(scores: HashMap<String, TermScore>, top_n: usize) -> BTreeMap<String, f64> {
    let mut ranked: Vec<(String, TermScore)> = scores.into_iter().collect();
    ranked.sort_by(|(a_term, a), (b_term, b)| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a_term.cmp(b_term))
    });
    ranked.truncate(top_n);
    ranked
        .into_iter()
        .map(|(term, score)| (term, score.weight))
        .collect()
}

/// Recomputes and stores one user's profile
pub struct PreferenceService {
    catalog: Arc<dyn CatalogRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    aggregator: PreferenceAggregator,
}

impl PreferenceService {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        aggregator: PreferenceAggregator,
    ) -> Self {
        Self {
            catalog,
            preferences,
            aggregator,
        }
    }

    /// Rebuild the profile of `user_id` from all of their interactions.
    ///
    /// Profiles are created lazily: a user with no interactions and no
    /// stored profile gets nothing written and `None` back.
    pub async fn recompute(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<UserPreference>> {
        let interactions = self.catalog.user_interactions(user_id).await?;

        if interactions.is_empty() && self.preferences.find_preference(user_id).await?.is_none() {
            debug!(user_id = user_id, "No interactions, profile not created");
            return Ok(None);
        }

        let preference = self.aggregator.aggregate(user_id, &interactions, now);
        self.preferences.save_preference(&preference).await?;

        info!(
            user_id = user_id,
            interactions = interactions.len(),
            categories = preference.fav_categories.len(),
            keywords = preference.fav_keywords.len(),
            "Updated user preference"
        );

        Ok(Some(preference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::models::PresentationRecord;
    use chrono::Duration;

    fn interaction(
        kind: InteractionType,
        categories: &[&str],
        keywords: &[&str],
        at: DateTime<Utc>,
    ) -> InteractionRecord {
        InteractionRecord {
            user_id: 1,
            presentation_id: 1,
            kind,
            occurred_at: at,
            categories: categories.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn aggregator(top_n: usize, half_life_days: f64) -> PreferenceAggregator {
        PreferenceAggregator::new(
            PreferenceConfig {
                top_n,
                half_life_days,
                ..PreferenceConfig::default()
            },
            Arc::new(TextCanonicalizer::default()),
        )
    }

    #[test]
    fn test_weights_accumulate_per_type() {
        let now = Utc::now();
        let pref = aggregator(20, 0.0).aggregate(
            1,
            &[
                interaction(InteractionType::View, &["Health"], &["diet"], now),
                interaction(InteractionType::Click, &["health"], &[], now),
                interaction(InteractionType::Follow, &["Art"], &["diet"], now),
            ],
            now,
        );

        assert_eq!(pref.fav_categories.get("health"), Some(&5.0));
        assert_eq!(pref.fav_categories.get("art"), Some(&3.0));
        assert_eq!(pref.fav_keywords.get("diet"), Some(&7.0));
    }

    #[test]
    fn test_half_life_decay() {
        let now = Utc::now();
        let pref = aggregator(20, 30.0).aggregate(
            1,
            &[interaction(
                InteractionType::View,
                &["health"],
                &[],
                now - Duration::days(30),
            )],
            now,
        );
        let weight = pref.fav_categories["health"];
        assert!((weight - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_n_eviction_prefers_recent_on_ties() {
        let now = Utc::now();
        let pref = aggregator(2, 0.0).aggregate(
            1,
            &[
                interaction(InteractionType::Like, &["old"], &[], now - Duration::days(3)),
                interaction(InteractionType::Like, &["new"], &[], now),
                interaction(InteractionType::View, &["top"], &[], now - Duration::days(5)),
            ],
            now,
        );

        let kept: Vec<&str> = pref.fav_categories.keys().map(String::as_str).collect();
        assert_eq!(kept, vec!["new", "top"]);
    }

    #[test]
    fn test_aggregate_is_idempotent() {
        let now = Utc::now();
        let interactions = vec![
            interaction(InteractionType::Bookmark, &["tech"], &["ai"], now),
            interaction(InteractionType::View, &["health"], &["ml"], now),
        ];
        let agg = aggregator(20, 30.0);
        assert_eq!(
            agg.aggregate(1, &interactions, now),
            agg.aggregate(1, &interactions, now)
        );
    }

    fn presentation(id: i64) -> PresentationRecord {
        PresentationRecord {
            id,
            owner_id: 50,
            categories: vec!["health".into()],
            keywords: vec!["nutrition".into()],
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
        }
    }

    #[tokio::test]
    async fn test_recompute_creates_profile_lazily() {
        let store = Arc::new(InMemoryStore::new());
        let service = PreferenceService::new(store.clone(), store.clone(), aggregator(20, 30.0));
        let now = Utc::now();

        assert!(service.recompute(1, now).await.unwrap().is_none());
        assert!(store.find_preference(1).await.unwrap().is_none());

        store.insert_presentation(presentation(10)).await;
        store
            .record_interaction(1, 10, InteractionType::Follow, now)
            .await;
        let pref = service.recompute(1, now).await.unwrap().unwrap();
        assert_eq!(pref.fav_categories.get("health"), Some(&3.0));
        assert_eq!(store.find_preference(1).await.unwrap(), Some(pref));
    }

    #[tokio::test]
    async fn test_recompute_clears_profile_after_unfollow() {
        let store = Arc::new(InMemoryStore::new());
        let service = PreferenceService::new(store.clone(), store.clone(), aggregator(20, 30.0));
        let now = Utc::now();

        store.insert_presentation(presentation(10)).await;
        store
            .record_interaction(1, 10, InteractionType::Follow, now)
            .await;
        service.recompute(1, now).await.unwrap();

        store
            .remove_interaction(1, 10, InteractionType::Follow)
            .await;
        let pref = service.recompute(1, now).await.unwrap().unwrap();
        assert!(pref.is_empty());
    }
}
