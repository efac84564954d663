use crate::error::{AppError, Result};
use crate::services::embedding::ProviderConfig;
use crate::services::preferences::{
    create_event_queue, EventDispatcher, EventReceiver, InteractionWeights, PreferenceConfig,
};
use crate::services::ranking::{RankingConfig, ScoreWeights};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // PostgreSQL (catalog + embeddings + neighbors + preferences)
    pub database_url: String,
    pub database_max_connections: u32,

    // Embedding provider (OpenAI-compatible /embeddings endpoint)
    pub embedding_api_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub embedding_provider_normalized: bool,
    pub embedding_timeout_secs: u64,

    // Batch jobs
    pub commit_chunk_size: usize,

    // Preference profile
    pub preference_top_n: usize,
    pub preference_half_life_days: f64,
    pub preference_cooldown_hours: i64,

    // Homepage ranking
    pub ranking_pool_size: usize,
    pub ranking_category_cap: usize,
    pub ranking_freshness_half_life_hours: f64,
    pub ranking_engagement_saturation: f64,

    // Interaction event queue
    pub event_queue_capacity: usize,

    // Observability
    pub log_format: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .set_default("database_max_connections", 5)?
            .set_default("embedding_api_url", "https://api.openai.com/v1")?
            .set_default("embedding_model", "text-embedding-3-small")?
            .set_default("embedding_dims", 1536)?
            .set_default("embedding_provider_normalized", false)?
            .set_default("embedding_timeout_secs", 30)?
            .set_default("commit_chunk_size", 50)?
            .set_default("preference_top_n", 20)?
            .set_default("preference_half_life_days", 30.0)?
            .set_default("preference_cooldown_hours", 6)?
            .set_default("ranking_pool_size", 500)?
            .set_default("ranking_category_cap", 2)?
            .set_default("ranking_freshness_half_life_hours", 72.0)?
            .set_default("ranking_engagement_saturation", 20.0)?
            .set_default("event_queue_capacity", 1024)?
            .set_default("log_format", "text")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(AppError::Configuration("DATABASE_URL is required".into()));
        }

        if self.embedding_dims == 0 {
            return Err(AppError::Configuration(
                "EMBEDDING_DIMS must be greater than 0".into(),
            ));
        }

        if self.commit_chunk_size == 0 || self.commit_chunk_size > 1000 {
            return Err(AppError::Configuration(
                "COMMIT_CHUNK_SIZE must be between 1 and 1000".into(),
            ));
        }

        if self.ranking_pool_size == 0 {
            return Err(AppError::Configuration(
                "RANKING_POOL_SIZE must be greater than 0".into(),
            ));
        }

        if self.preference_top_n == 0 {
            return Err(AppError::Configuration(
                "PREFERENCE_TOP_N must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Provider settings; fails when the provider has no credentials.
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        let api_key = self
            .embedding_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AppError::Configuration("EMBEDDING_API_KEY is not configured".into())
            })?;

        Ok(ProviderConfig {
            base_url: self.embedding_api_url.clone(),
            api_key: api_key.to_string(),
            dims: self.embedding_dims,
            normalized: self.embedding_provider_normalized,
            timeout_secs: self.embedding_timeout_secs,
        })
    }

    pub fn preference_config(&self) -> PreferenceConfig {
        PreferenceConfig {
            weights: InteractionWeights::default(),
            top_n: self.preference_top_n,
            half_life_days: self.preference_half_life_days,
        }
    }

    /// Toggle event queue sized by `EVENT_QUEUE_CAPACITY`.
    pub fn event_queue(&self) -> (EventDispatcher, EventReceiver) {
        create_event_queue(self.event_queue_capacity)
    }

    pub fn ranking_config(&self) -> RankingConfig {
        RankingConfig {
            pool_size: self.ranking_pool_size,
            category_cap: self.ranking_category_cap,
            freshness_half_life_hours: self.ranking_freshness_half_life_hours,
            engagement_saturation: self.ranking_engagement_saturation,
            generic_weights: ScoreWeights::generic(),
            personalized_weights: ScoreWeights::personalized(),
            ..RankingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionType;
    use crate::services::preferences::InteractionToggled;

    fn base_config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            database_max_connections: 5,
            embedding_api_url: "https://api.openai.com/v1".to_string(),
            embedding_api_key: Some("sk-test".to_string()),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dims: 1536,
            embedding_provider_normalized: false,
            embedding_timeout_secs: 30,
            commit_chunk_size: 50,
            preference_top_n: 20,
            preference_half_life_days: 30.0,
            preference_cooldown_hours: 6,
            ranking_pool_size: 500,
            ranking_category_cap: 2,
            ranking_freshness_half_life_hours: 72.0,
            ranking_engagement_saturation: 20.0,
            event_queue_capacity: 1024,
            log_format: "text".to_string(),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut config = base_config();
        config.commit_chunk_size = 0;
        assert!(config.validate().is_err());

        config.commit_chunk_size = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_api_key_is_configuration_error() {
        let mut config = base_config();
        config.embedding_api_key = None;
        assert!(matches!(
            config.provider_config(),
            Err(AppError::Configuration(_))
        ));

        config.embedding_api_key = Some("   ".to_string());
        assert!(config.provider_config().is_err());
    }

    #[test]
    fn test_provider_normalization_is_opt_in() {
        let provider = base_config().provider_config().unwrap();
        assert!(!provider.normalized);
    }

    #[tokio::test]
    async fn test_event_queue_uses_configured_capacity() {
        let mut config = base_config();
        config.event_queue_capacity = 3;
        let (dispatcher, _receiver) = config.event_queue();
        let accepted = (0..5)
            .filter(|_| {
                dispatcher.dispatch(InteractionToggled {
                    user_id: 1,
                    presentation_id: 2,
                    kind: InteractionType::Follow,
                    active: true,
                })
            })
            .count();
        assert_eq!(accepted, 3);
    }

    #[test]
    fn test_ranking_config_carries_overrides() {
        let mut config = base_config();
        config.ranking_pool_size = 42;
        config.ranking_category_cap = 3;
        let ranking = config.ranking_config();
        assert_eq!(ranking.pool_size, 42);
        assert_eq!(ranking.category_cap, 3);
    }
}
