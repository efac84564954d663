//! Command-line entry points for the batch jobs.

use crate::config::Config;
use crate::db::CatalogScope;
use crate::error::{AppError, Result};
use crate::jobs::{
    cooldown_window, PresentationEmbeddingsConfig, PresentationNeighborsConfig,
    UserEmbeddingsConfig, UserPreferencesConfig,
};
use crate::models::{PresentationId, UserId};
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "similarity-service")]
#[command(author, version, about = "Presentation embeddings, neighbors and preference jobs")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Recompute top-K neighbor lists from stored presentation vectors
    RecomputePresentationNeighbors(NeighborsArgs),

    /// Compute presentation embeddings, then refresh their neighbors
    ComputePresentationEmbeddings(PresentationEmbeddingsArgs),

    /// Compute user embeddings from preference profiles
    ComputeUserEmbeddings(UserEmbeddingsArgs),

    /// Rebuild user preference profiles from interactions
    RecomputeUserPreferences(UserPreferencesArgs),
}

#[derive(Debug, Args)]
pub struct ScopeArgs {
    /// Include presentations that are not published
    #[arg(long)]
    pub include_unpublished: bool,

    /// Include soft-deleted presentations
    #[arg(long)]
    pub include_deleted: bool,
}

impl From<&ScopeArgs> for CatalogScope {
    fn from(args: &ScopeArgs) -> Self {
        CatalogScope {
            include_unpublished: args.include_unpublished,
            include_deleted: args.include_deleted,
        }
    }
}

#[derive(Debug, Args)]
pub struct NeighborsArgs {
    /// Only this presentation
    #[arg(long)]
    pub presentation_id: Option<PresentationId>,

    /// Maximum presentations to process (0 = all)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Neighbors kept per presentation
    #[arg(long, default_value_t = 30)]
    pub k: usize,

    /// Embedding model (defaults to EMBEDDING_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Vector dimensions (0 = EMBEDDING_DIMS)
    #[arg(long, default_value_t = 0)]
    pub dims: usize,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Debug, Args)]
pub struct PresentationEmbeddingsArgs {
    #[arg(long)]
    pub presentation_id: Option<PresentationId>,

    /// Maximum presentations to process (0 = all)
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Minimum age of a vector before a changed text recomputes it
    #[arg(long, default_value_t = 6)]
    pub cooldown_hours: i64,

    /// Recompute regardless of hash, freeze and cooldown
    #[arg(long)]
    pub force: bool,

    /// Skip the neighbor refresh of changed presentations
    #[arg(long)]
    pub no_neighbors: bool,

    /// Neighbors kept per changed presentation
    #[arg(long, default_value_t = 10)]
    pub k: usize,

    /// Quality score from which a presentation is frozen after its first vector
    #[arg(long, default_value_t = 12.0)]
    pub min_score: f64,

    /// Only presentations without a vector
    #[arg(long)]
    pub missing_only: bool,

    /// Let frozen presentations recompute when their text changed
    #[arg(long)]
    pub allow_eligible_recompute: bool,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

#[derive(Debug, Args)]
pub struct UserEmbeddingsArgs {
    #[arg(long)]
    pub user_id: Option<UserId>,

    /// Maximum users to process (0 = all)
    #[arg(long, default_value_t = 200)]
    pub limit: usize,

    #[arg(long, default_value_t = 6)]
    pub cooldown_hours: i64,

    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct UserPreferencesArgs {
    #[arg(long)]
    pub user_id: Option<UserId>,

    /// Maximum users to process (0 = all)
    #[arg(long, default_value_t = 200)]
    pub limit: usize,

    /// Skip users refreshed more recently than this (defaults to PREFERENCE_COOLDOWN_HOURS)
    #[arg(long)]
    pub cooldown_hours: Option<i64>,
}

fn cooldown_hours(value: i64) -> Result<i64> {
    cooldown_window(value)?;
    Ok(value)
}

fn positive_k(k: usize) -> Result<usize> {
    if k == 0 {
        return Err(AppError::Validation("--k must be greater than 0".into()));
    }
    Ok(k)
}

fn resolve_dims(dims: usize, config: &Config) -> usize {
    if dims == 0 {
        config.embedding_dims
    } else {
        dims
    }
}

impl NeighborsArgs {
    pub fn to_config(&self, config: &Config) -> Result<PresentationNeighborsConfig> {
        Ok(PresentationNeighborsConfig {
            presentation_id: self.presentation_id,
            limit: self.limit,
            k: positive_k(self.k)?,
            model: self
                .model
                .clone()
                .unwrap_or_else(|| config.embedding_model.clone()),
            dims: resolve_dims(self.dims, config),
            scope: CatalogScope::from(&self.scope),
        })
    }
}

impl PresentationEmbeddingsArgs {
    pub fn to_config(&self, config: &Config) -> Result<PresentationEmbeddingsConfig> {
        if !self.min_score.is_finite() {
            return Err(AppError::Validation("--min-score must be a number".into()));
        }

        Ok(PresentationEmbeddingsConfig {
            presentation_id: self.presentation_id,
            limit: self.limit,
            cooldown_hours: cooldown_hours(self.cooldown_hours)?,
            force: self.force,
            no_neighbors: self.no_neighbors,
            k: positive_k(self.k)?,
            min_score: self.min_score,
            missing_only: self.missing_only,
            allow_eligible_recompute: self.allow_eligible_recompute,
            scope: CatalogScope::from(&self.scope),
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
        })
    }
}

impl UserEmbeddingsArgs {
    pub fn to_config(&self, config: &Config) -> Result<UserEmbeddingsConfig> {
        Ok(UserEmbeddingsConfig {
            user_id: self.user_id,
            limit: self.limit,
            cooldown_hours: cooldown_hours(self.cooldown_hours)?,
            force: self.force,
            model: config.embedding_model.clone(),
            dims: config.embedding_dims,
        })
    }
}

impl UserPreferencesArgs {
    pub fn to_config(&self, config: &Config) -> Result<UserPreferencesConfig> {
        let hours = self
            .cooldown_hours
            .unwrap_or(config.preference_cooldown_hours);

        Ok(UserPreferencesConfig {
            user_id: self.user_id,
            limit: self.limit,
            cooldown_hours: cooldown_hours(hours)?,
            preference: config.preference_config(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            database_max_connections: 5,
            embedding_api_url: "https://api.openai.com/v1".to_string(),
            embedding_api_key: None,
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
    fn test_neighbors_defaults() {
        let cli = Cli::try_parse_from(["similarity-service", "recompute-presentation-neighbors"])
            .unwrap();
        let Command::RecomputePresentationNeighbors(args) = cli.command else {
            panic!("wrong subcommand");
        };
        let job = args.to_config(&config()).unwrap();
        assert_eq!(job.k, 30);
        assert_eq!(job.limit, 0);
        assert_eq!(job.dims, 1536);
        assert_eq!(job.model, "text-embedding-3-small");
        assert_eq!(job.scope, CatalogScope::default());
    }

    #[test]
    fn test_embedding_flags() {
        let cli = Cli::try_parse_from([
            "similarity-service",
            "compute-presentation-embeddings",
            "--presentation-id=42",
            "--force",
            "--no-neighbors",
            "--min-score=20",
            "--include-deleted",
        ])
        .unwrap();
        let Command::ComputePresentationEmbeddings(args) = cli.command else {
            panic!("wrong subcommand");
        };
        let job = args.to_config(&config()).unwrap();
        assert_eq!(job.presentation_id, Some(42));
        assert!(job.force);
        assert!(job.no_neighbors);
        assert_eq!(job.limit, 50);
        assert_eq!(job.k, 10);
        assert_eq!(job.cooldown_hours, 6);
        assert_eq!(job.min_score, 20.0);
        assert!(job.scope.include_deleted);
        assert!(!job.scope.include_unpublished);
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        assert!(Cli::try_parse_from([
            "similarity-service",
            "compute-user-embeddings",
            "--limit=abc",
        ])
        .is_err());
    }

    #[test]
    fn test_zero_k_is_validation_error() {
        let cli = Cli::try_parse_from([
            "similarity-service",
            "recompute-presentation-neighbors",
            "--k=0",
        ])
        .unwrap();
        let Command::RecomputePresentationNeighbors(args) = cli.command else {
            panic!("wrong subcommand");
        };
        assert!(matches!(
            args.to_config(&config()),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_preference_cooldown_defaults_to_config() {
        let cli =
            Cli::try_parse_from(["similarity-service", "recompute-user-preferences"]).unwrap();
        let Command::RecomputeUserPreferences(args) = cli.command else {
            panic!("wrong subcommand");
        };
        let job = args.to_config(&config()).unwrap();
        assert_eq!(job.cooldown_hours, 6);
        assert_eq!(job.limit, 200);
    }

    #[test]
    fn test_out_of_range_cooldown_is_validation_error() {
        let config = config();
        for command in [
            "compute-presentation-embeddings",
            "compute-user-embeddings",
            "recompute-user-preferences",
        ] {
            for value in ["--cooldown-hours=1000000000000", "--cooldown-hours=-1"] {
                let cli = Cli::try_parse_from(["similarity-service", command, value]).unwrap();
                let result = match &cli.command {
                    Command::ComputePresentationEmbeddings(args) => {
                        args.to_config(&config).map(|_| ())
                    }
                    Command::ComputeUserEmbeddings(args) => args.to_config(&config).map(|_| ()),
                    Command::RecomputeUserPreferences(args) => {
                        args.to_config(&config).map(|_| ())
                    }
                    Command::RecomputePresentationNeighbors(_) => unreachable!(),
                };
                let err = result.unwrap_err();
                assert!(matches!(err, AppError::Validation(_)), "{command} {value}");
                assert_eq!(err.exit_code(), 64);
            }
        }
    }
}
