// ============================================
// Batch jobs
// ============================================
//
// One module per CLI entry point. Every job is a single sequential sweep
// over a bounded item set; embedding writes are committed per chunk so a
// failure part-way keeps the chunks already committed.

pub mod presentation_embeddings;
pub mod presentation_neighbors;
pub mod user_embeddings;
pub mod user_preferences;

pub use presentation_embeddings::{PresentationEmbeddingsConfig, PresentationEmbeddingsStats};
pub use presentation_neighbors::{PresentationNeighborsConfig, PresentationNeighborsStats};
pub use user_embeddings::{UserEmbeddingsConfig, UserEmbeddingsStats};
pub use user_preferences::{UserPreferencesConfig, UserPreferencesStats};

use crate::db::{CatalogRepository, EmbeddingRepository, NeighborRepository, PreferenceRepository};
use crate::error::{AppError, Result};
use crate::services::canonical::TextCanonicalizer;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Upper bound for `--cooldown-hours` (ten years)
pub const MAX_COOLDOWN_HOURS: i64 = 24 * 365 * 10;

/// Repositories and shared helpers handed to every job
#[derive(Clone)]
pub struct JobContext {
    pub embeddings: Arc<dyn EmbeddingRepository>,
    pub neighbors: Arc<dyn NeighborRepository>,
    pub preferences: Arc<dyn PreferenceRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub canonicalizer: Arc<TextCanonicalizer>,
    /// Items per committed unit of work
    pub chunk_size: usize,
}

impl JobContext {
    /// Build a context backed by one store implementing every repository.
    pub fn from_store<S>(
        store: Arc<S>,
        canonicalizer: Arc<TextCanonicalizer>,
        chunk_size: usize,
    ) -> Self
    where
        S: EmbeddingRepository
            + NeighborRepository
            + PreferenceRepository
            + CatalogRepository
            + 'static,
    {
        Self {
            embeddings: store.clone(),
            neighbors: store.clone(),
            preferences: store.clone(),
            catalog: store,
            canonicalizer,
            chunk_size: chunk_size.max(1),
        }
    }
}

/// `0` on the command line means "no limit"
pub(crate) fn limit_from_flag(limit: usize) -> Option<usize> {
    (limit > 0).then_some(limit)
}

/// Cooldown window for a `--cooldown-hours` value in `0..=MAX_COOLDOWN_HOURS`.
pub fn cooldown_window(hours: i64) -> Result<Duration> {
    if !(0..=MAX_COOLDOWN_HOURS).contains(&hours) {
        return Err(AppError::Validation(format!(
            "--cooldown-hours must be between 0 and {MAX_COOLDOWN_HOURS}, got {hours}"
        )));
    }
    Duration::try_hours(hours)
        .ok_or_else(|| AppError::Validation(format!("--cooldown-hours {hours} is out of range")))
}

/// Timestamp before which a row counts as outside the cooldown.
pub(crate) fn cooldown_cutoff(now: DateTime<Utc>, hours: i64) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(cooldown_window(hours)?)
        .ok_or_else(|| AppError::Validation(format!("--cooldown-hours {hours} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_from_flag() {
        assert_eq!(limit_from_flag(0), None);
        assert_eq!(limit_from_flag(50), Some(50));
    }

    #[test]
    fn test_cooldown_window_bounds() {
        assert_eq!(cooldown_window(0).unwrap(), Duration::zero());
        assert_eq!(cooldown_window(6).unwrap(), Duration::hours(6));
        assert!(cooldown_window(MAX_COOLDOWN_HOURS).is_ok());
        assert!(matches!(cooldown_window(-1), Err(AppError::Validation(_))));
        assert!(matches!(
            cooldown_window(1_000_000_000_000),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            cooldown_window(i64::MAX),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_cooldown_cutoff() {
        let now = Utc::now();
        assert_eq!(cooldown_cutoff(now, 6).unwrap(), now - Duration::hours(6));
        assert!(cooldown_cutoff(now, 1_000_000_000_000).is_err());
    }
}
