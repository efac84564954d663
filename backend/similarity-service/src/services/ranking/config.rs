/// Linear weights of the three ranking signals
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub engagement: f64,
    pub freshness: f64,
    pub personalization: f64,
}

impl ScoreWeights {
    /// Anonymous / no seed profile
    pub fn generic() -> Self {
        Self {
            engagement: 0.6,
            freshness: 0.4,
            personalization: 0.0,
        }
    }

    pub fn personalized() -> Self {
        Self {
            engagement: 0.25,
            freshness: 0.15,
            personalization: 0.6,
        }
    }
}

/// Tunables of the homepage ranker
#[derive(Debug, Clone)]
pub struct RankingConfig {
    /// Most recent published presentations considered per request
    pub pool_size: usize,
    /// Max items per category in one result; 0 disables the cap
    pub category_cap: usize,
    pub freshness_half_life_hours: f64,
    /// Engagement total at which the engagement signal reaches 0.5
    pub engagement_saturation: f64,
    pub generic_weights: ScoreWeights,
    pub personalized_weights: ScoreWeights,
    /// Own presentations feeding the seed profile
    pub seed_own_limit: usize,
    /// Followed presentations feeding the seed profile
    pub seed_followed_limit: usize,
    /// Split of the personalization signal between category and keyword overlap
    pub category_match_weight: f64,
    pub keyword_match_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            pool_size: 500,
            category_cap: 2,
            freshness_half_life_hours: 72.0,
            engagement_saturation: 20.0,
            generic_weights: ScoreWeights::generic(),
            personalized_weights: ScoreWeights::personalized(),
            seed_own_limit: 10,
            seed_followed_limit: 10,
            category_match_weight: 0.7,
            keyword_match_weight: 0.3,
        }
    }
}
