// ============================================
// recompute-user-preferences
// ============================================
//
// Bulk catch-up for preference profiles. Without an explicit user the job
// picks users whose profile is missing or older than the cooldown, most
// recently active first. An explicit user bypasses the cooldown.

use super::{cooldown_cutoff, limit_from_flag, JobContext};
use crate::error::Result;
use crate::models::UserId;
use crate::services::preferences::{PreferenceAggregator, PreferenceConfig, PreferenceService};
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UserPreferencesConfig {
    pub user_id: Option<UserId>,
    /// 0 = unlimited
    pub limit: usize,
    pub cooldown_hours: i64,
    pub preference: PreferenceConfig,
}

impl Default for UserPreferencesConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            limit: 200,
            cooldown_hours: 6,
            preference: PreferenceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPreferencesStats {
    pub processed: usize,
    pub updated: usize,
    pub skipped_no_interactions: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

pub async fn run(ctx: &JobContext, config: &UserPreferencesConfig) -> Result<UserPreferencesStats> {
    let start = Instant::now();
    let now = Utc::now();
    let mut stats = UserPreferencesStats::default();

    let users: Vec<UserId> = match config.user_id {
        Some(id) => vec![id],
        None => {
            let updated_before = cooldown_cutoff(now, config.cooldown_hours)?;
            ctx.preferences
                .users_due_for_refresh(
                    updated_before,
                    limit_from_flag(config.limit).unwrap_or(usize::MAX),
                )
                .await?
        }
    };

    if users.is_empty() {
        info!("No users due for a preference refresh, nothing to process");
        return Ok(stats);
    }

    let service = PreferenceService::new(
        ctx.catalog.clone(),
        ctx.preferences.clone(),
        PreferenceAggregator::new(config.preference.clone(), ctx.canonicalizer.clone()),
    );

    for user_id in users {
        stats.processed += 1;
        match service.recompute(user_id, now).await {
            Ok(Some(_)) => stats.updated += 1,
            Ok(None) => {
                info!(user_id = user_id, "No interactions, nothing to process");
                stats.skipped_no_interactions += 1;
            }
            Err(e) if e.is_item_scoped() => {
                warn!(user_id = user_id, error = %e, "Failed to recompute preference");
                stats.failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        processed = stats.processed,
        updated = stats.updated,
        skipped_no_interactions = stats.skipped_no_interactions,
        failed = stats.failed,
        duration_ms = stats.duration_ms,
        "User preference pass completed"
    );

    Ok(stats)
}
