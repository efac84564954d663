// ============================================
// compute-user-embeddings
// ============================================
//
// Embeds the canonical text of each user's preference profile. User
// vectors are never frozen; hash and cooldown still apply.

use super::{cooldown_window, limit_from_flag, JobContext};
use crate::error::Result;
use crate::models::{SubjectKey, UserId};
use crate::services::canonical::content_hash;
use crate::services::embedding::{
    EmbeddingPolicy, EmbeddingProvider, EmbeddingRequest, EmbeddingStore, SkipReason, UnitOfWork,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct UserEmbeddingsConfig {
    pub user_id: Option<UserId>,
    /// 0 = unlimited
    pub limit: usize,
    pub cooldown_hours: i64,
    pub force: bool,
    pub model: String,
    pub dims: usize,
}

impl Default for UserEmbeddingsConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            limit: 200,
            cooldown_hours: 6,
            force: false,
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEmbeddingsStats {
    pub processed: usize,
    pub computed: usize,
    pub skipped_no_profile: usize,
    pub skipped_unchanged: usize,
    pub skipped_cooldown: usize,
    pub failed: usize,
    pub committed: usize,
    pub duration_ms: u64,
}

pub async fn run(
    ctx: &JobContext,
    provider: Arc<dyn EmbeddingProvider>,
    config: &UserEmbeddingsConfig,
) -> Result<UserEmbeddingsStats> {
    let start = Instant::now();
    let mut stats = UserEmbeddingsStats::default();

    let users: Vec<UserId> = match config.user_id {
        Some(id) => vec![id],
        None => {
            ctx.preferences
                .users_with_preferences(
                    &config.model,
                    limit_from_flag(config.limit).unwrap_or(usize::MAX),
                )
                .await?
        }
    };

    if users.is_empty() {
        info!("No user profiles to embed, nothing to process");
        return Ok(stats);
    }

    let store = EmbeddingStore::new(ctx.embeddings.clone(), provider);
    let policy = EmbeddingPolicy {
        force: config.force,
        eligible: false,
        allow_eligible_recompute: false,
        cooldown: cooldown_window(config.cooldown_hours)?,
    };
    let mut uow = UnitOfWork::new();

    for chunk in users.chunks(ctx.chunk_size) {
        for &user_id in chunk {
            stats.processed += 1;

            let preference = match ctx.preferences.find_preference(user_id).await? {
                Some(p) if !p.is_empty() => p,
                _ => {
                    info!(user_id = user_id, "No preference profile, nothing to process");
                    stats.skipped_no_profile += 1;
                    continue;
                }
            };

            let text = ctx.canonicalizer.canonicalize_preference(&preference);
            let hash = content_hash(&text);
            let request = EmbeddingRequest {
                subject: SubjectKey::user(user_id),
                model: &config.model,
                dims: config.dims,
                text: &text,
                content_hash: &hash,
            };

            match store.ensure_embedding(&mut uow, request, &policy).await {
                Ok(ensured) if ensured.changed => stats.computed += 1,
                Ok(ensured) => match ensured.skip {
                    Some(SkipReason::CooldownActive) => stats.skipped_cooldown += 1,
                    Some(_) => stats.skipped_unchanged += 1,
                    None => {}
                },
                Err(e) if e.is_item_scoped() => {
                    warn!(user_id = user_id, error = %e, "Failed to embed user profile");
                    stats.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let committed = store.commit(&mut uow).await?;
        stats.committed += committed;
        debug!(committed = committed, "Committed user embedding chunk");
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        processed = stats.processed,
        computed = stats.computed,
        skipped_no_profile = stats.skipped_no_profile,
        skipped_unchanged = stats.skipped_unchanged,
        skipped_cooldown = stats.skipped_cooldown,
        failed = stats.failed,
        committed = stats.committed,
        duration_ms = stats.duration_ms,
        "User embedding pass completed"
    );

    Ok(stats)
}
