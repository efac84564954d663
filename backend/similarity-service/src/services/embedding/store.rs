//! Change-detecting embedding cache.
//!
//! Every `(subject, model)` has at most one stored vector. A compute pass asks
//! the store to ensure a vector for the current canonical text; the store
//! decides between reusing the row and calling the provider, and stages any
//! new row in a caller-owned [`UnitOfWork`]. Nothing is written until the
//! caller commits.

use super::provider::EmbeddingProvider;
use super::vector;
use crate::db::EmbeddingRepository;
use crate::error::{AppError, Result};
use crate::models::{SubjectEmbedding, SubjectKey};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// Tolerance used to detect provider vectors that are already unit length
const UNIT_TOLERANCE: f32 = 1e-3;

/// Per-pass refresh policy
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingPolicy {
    /// Recompute regardless of hash, freeze and cooldown
    pub force: bool,
    /// Subject is eligible, so its first vector is frozen
    pub eligible: bool,
    pub allow_eligible_recompute: bool,
    pub cooldown: Duration,
}

impl Default for EmbeddingPolicy {
    fn default() -> Self {
        Self {
            force: false,
            eligible: false,
            allow_eligible_recompute: false,
            cooldown: Duration::hours(6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeReason {
    Missing,
    Forced,
    DimsChanged,
    ContentChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    FrozenEligible,
    HashUnchanged,
    CooldownActive,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::FrozenEligible => "frozen-skip",
            SkipReason::HashUnchanged => "hash-unchanged",
            SkipReason::CooldownActive => "cooldown-active",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingDecision {
    Compute(ComputeReason),
    Skip(SkipReason),
}

/// Decide whether an existing row can be reused.
///
/// Rules are evaluated in order: missing row, forced, stored dims differ
/// from the requested dims, frozen eligible subject, unchanged hash, active
/// cooldown. Anything left over is recomputed.
pub fn decide(
    existing: Option<&SubjectEmbedding>,
    content_hash: &str,
    dims: usize,
    policy: &EmbeddingPolicy,
    now: DateTime<Utc>,
) -> EmbeddingDecision {
    let Some(existing) = existing else {
        return EmbeddingDecision::Compute(ComputeReason::Missing);
    };

    if policy.force {
        return EmbeddingDecision::Compute(ComputeReason::Forced);
    }

    if existing.dims != dims {
        return EmbeddingDecision::Compute(ComputeReason::DimsChanged);
    }

    if policy.eligible && !policy.allow_eligible_recompute {
        return EmbeddingDecision::Skip(SkipReason::FrozenEligible);
    }

    if existing.content_hash == content_hash {
        return EmbeddingDecision::Skip(SkipReason::HashUnchanged);
    }

    if now - existing.updated_at < policy.cooldown {
        return EmbeddingDecision::Skip(SkipReason::CooldownActive);
    }

    EmbeddingDecision::Compute(ComputeReason::ContentChanged)
}

/// Caller-owned buffer of staged rows, flushed by [`EmbeddingStore::commit`]
#[derive(Debug, Default)]
pub struct UnitOfWork {
    pending: Vec<SubjectEmbedding>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a row, replacing an earlier staged row for the same key.
    pub fn stage(&mut self, row: SubjectEmbedding) {
        match self
            .pending
            .iter_mut()
            .find(|p| p.subject == row.subject && p.model == row.model)
        {
            Some(slot) => *slot = row,
            None => self.pending.push(row),
        }
    }

    pub fn pending_for(&self, subject: SubjectKey, model: &str) -> Option<&SubjectEmbedding> {
        self.pending
            .iter()
            .find(|p| p.subject == subject && p.model == model)
    }

    pub fn take(&mut self) -> Vec<SubjectEmbedding> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// What to embed
#[derive(Debug, Clone, Copy)]
pub struct EmbeddingRequest<'a> {
    pub subject: SubjectKey,
    pub model: &'a str,
    pub dims: usize,
    pub text: &'a str,
    pub content_hash: &'a str,
}

/// Result of [`EmbeddingStore::ensure_embedding`]
#[derive(Debug, Clone, PartialEq)]
pub struct EnsuredEmbedding {
    pub vector: Vec<f32>,
    pub normalized: bool,
    /// A new vector was staged
    pub changed: bool,
    pub skip: Option<SkipReason>,
}

pub struct EmbeddingStore {
    repo: Arc<dyn EmbeddingRepository>,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingStore {
    pub fn new(repo: Arc<dyn EmbeddingRepository>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { repo, provider }
    }

    /// Reuse or recompute the vector of one subject.
    ///
    /// Provider failures and dimension mismatches surface as
    /// `AppError::Provider`; the stored row and `uow` are left untouched.
    pub async fn ensure_embedding(
        &self,
        uow: &mut UnitOfWork,
        request: EmbeddingRequest<'_>,
        policy: &EmbeddingPolicy,
    ) -> Result<EnsuredEmbedding> {
        let existing = match uow.pending_for(request.subject, request.model) {
            Some(staged) => Some(staged.clone()),
            None => {
                self.repo
                    .find_embedding(request.subject, request.model)
                    .await?
            }
        };

        let now = Utc::now();
        let decision = decide(
            existing.as_ref(),
            request.content_hash,
            request.dims,
            policy,
            now,
        );

        let reason = match (decision, existing.as_ref()) {
            (EmbeddingDecision::Skip(skip), Some(row)) => {
                debug!(subject = %request.subject, reason = %skip, "Reusing stored embedding");
                return Ok(EnsuredEmbedding {
                    vector: row.decode()?,
                    normalized: row.normalized,
                    changed: false,
                    skip: Some(skip),
                });
            }
            (EmbeddingDecision::Skip(_), None) => ComputeReason::Missing,
            (EmbeddingDecision::Compute(reason), _) => reason,
        };

        debug!(subject = %request.subject, reason = ?reason, "Computing embedding");
        let generated = self
            .provider
            .generate(request.text, request.model)
            .await?;

        if generated.vector.len() != request.dims {
            return Err(AppError::Provider(format!(
                "{}: provider returned {} dims, expected {}",
                request.subject,
                generated.vector.len(),
                request.dims
            )));
        }
        if !vector::is_finite(&generated.vector) {
            return Err(AppError::Provider(format!(
                "{}: provider returned non-finite values",
                request.subject
            )));
        }

        let normalized =
            generated.normalized || vector::is_unit(&generated.vector, UNIT_TOLERANCE);

        uow.stage(SubjectEmbedding {
            subject: request.subject,
            model: request.model.to_string(),
            dims: request.dims,
            vector_bytes: vector::pack(&generated.vector),
            normalized,
            content_hash: request.content_hash.to_string(),
            created_at: existing.as_ref().map_or(now, |row| row.created_at),
            updated_at: now,
        });

        Ok(EnsuredEmbedding {
            vector: generated.vector,
            normalized,
            changed: true,
            skip: None,
        })
    }

    /// Persist every staged row in one transaction.
    pub async fn commit(&self, uow: &mut UnitOfWork) -> Result<usize> {
        let rows = uow.take();
        if rows.is_empty() {
            return Ok(0);
        }
        self.repo.save_embeddings(&rows).await?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::services::embedding::provider::{GeneratedEmbedding, MockEmbeddingProvider};

    fn row(hash: &str, dims: usize, updated_at: DateTime<Utc>) -> SubjectEmbedding {
        SubjectEmbedding {
            subject: SubjectKey::presentation(1),
            model: "m".into(),
            dims,
            vector_bytes: vector::pack(&vec![0.5; dims]),
            normalized: false,
            content_hash: hash.into(),
            created_at: updated_at,
            updated_at,
        }
    }

    fn generated(values: Vec<f32>) -> GeneratedEmbedding {
        GeneratedEmbedding {
            dims: values.len(),
            vector: values,
            normalized: false,
            model: "m".into(),
        }
    }

    #[test]
    fn test_decision_table_order() {
        let now = Utc::now();
        let old = row("h1", 2, now - Duration::hours(12));
        let recent = row("h1", 2, now - Duration::minutes(5));
        let policy = EmbeddingPolicy::default();

        assert_eq!(
            decide(None, "h1", 2, &policy, now),
            EmbeddingDecision::Compute(ComputeReason::Missing)
        );

        let forced = EmbeddingPolicy {
            force: true,
            eligible: true,
            ..policy
        };
        assert_eq!(
            decide(Some(&recent), "h1", 2, &forced, now),
            EmbeddingDecision::Compute(ComputeReason::Forced)
        );

        let frozen = EmbeddingPolicy {
            eligible: true,
            ..policy
        };
        assert_eq!(
            decide(Some(&old), "h2", 2, &frozen, now),
            EmbeddingDecision::Skip(SkipReason::FrozenEligible)
        );

        let thawed = EmbeddingPolicy {
            eligible: true,
            allow_eligible_recompute: true,
            ..policy
        };
        assert_eq!(
            decide(Some(&old), "h2", 2, &thawed, now),
            EmbeddingDecision::Compute(ComputeReason::ContentChanged)
        );

        assert_eq!(
            decide(Some(&old), "h1", 2, &policy, now),
            EmbeddingDecision::Skip(SkipReason::HashUnchanged)
        );
        assert_eq!(
            decide(Some(&recent), "h2", 2, &policy, now),
            EmbeddingDecision::Skip(SkipReason::CooldownActive)
        );
        assert_eq!(
            decide(Some(&old), "h2", 2, &policy, now),
            EmbeddingDecision::Compute(ComputeReason::ContentChanged)
        );
    }

    #[test]
    fn test_dims_change_recomputes_even_when_frozen() {
        let now = Utc::now();
        let existing = row("h1", 3, now);
        let frozen = EmbeddingPolicy {
            eligible: true,
            ..EmbeddingPolicy::default()
        };
        assert_eq!(
            decide(Some(&existing), "h1", 2, &frozen, now),
            EmbeddingDecision::Compute(ComputeReason::DimsChanged)
        );
    }

    #[test]
    fn test_zero_cooldown_never_blocks() {
        let now = Utc::now();
        let existing = row("h1", 2, now);
        let policy = EmbeddingPolicy {
            cooldown: Duration::zero(),
            ..EmbeddingPolicy::default()
        };
        assert_eq!(
            decide(Some(&existing), "h2", 2, &policy, now),
            EmbeddingDecision::Compute(ComputeReason::ContentChanged)
        );
    }

    #[test]
    fn test_unit_of_work_replaces_same_key() {
        let now = Utc::now();
        let mut uow = UnitOfWork::new();
        uow.stage(row("h1", 2, now));
        uow.stage(row("h2", 2, now));
        assert_eq!(uow.len(), 1);
        assert_eq!(
            uow.pending_for(SubjectKey::presentation(1), "m")
                .map(|r| r.content_hash.as_str()),
            Some("h2")
        );
        assert_eq!(uow.take().len(), 1);
        assert!(uow.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_computes_then_reuses() {
        let repo = Arc::new(InMemoryStore::new());
        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_generate()
            .times(1)
            .returning(|_, _| Ok(generated(vec![3.0, 4.0])));
        let store = EmbeddingStore::new(repo.clone(), Arc::new(provider));

        let request = EmbeddingRequest {
            subject: SubjectKey::presentation(7),
            model: "m",
            dims: 2,
            text: "categories: health",
            content_hash: "abc",
        };
        let policy = EmbeddingPolicy::default();

        let mut uow = UnitOfWork::new();
        let first = store.ensure_embedding(&mut uow, request, &policy).await.unwrap();
        assert!(first.changed);
        assert!(!first.normalized);
        assert_eq!(uow.len(), 1);
        assert_eq!(store.commit(&mut uow).await.unwrap(), 1);

        let second = store.ensure_embedding(&mut uow, request, &policy).await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.skip, Some(SkipReason::HashUnchanged));
        assert_eq!(second.vector, vec![3.0, 4.0]);
        assert!(uow.is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_row_untouched() {
        let repo = Arc::new(InMemoryStore::new());
        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_generate()
            .returning(|_, _| Err(AppError::Provider("quota exceeded".into())));
        let store = EmbeddingStore::new(repo.clone(), Arc::new(provider));

        let mut uow = UnitOfWork::new();
        let result = store
            .ensure_embedding(
                &mut uow,
                EmbeddingRequest {
                    subject: SubjectKey::presentation(1),
                    model: "m",
                    dims: 2,
                    text: "t",
                    content_hash: "h",
                },
                &EmbeddingPolicy::default(),
            )
            .await;

        assert!(matches!(result, Err(AppError::Provider(_))));
        assert!(uow.is_empty());
        assert!(repo
            .find_embedding(SubjectKey::presentation(1), "m")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_provider_dims_mismatch_is_rejected() {
        let repo = Arc::new(InMemoryStore::new());
        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_generate()
            .returning(|_, _| Ok(generated(vec![1.0, 0.0, 0.0])));
        let store = EmbeddingStore::new(repo, Arc::new(provider));

        let mut uow = UnitOfWork::new();
        let result = store
            .ensure_embedding(
                &mut uow,
                EmbeddingRequest {
                    subject: SubjectKey::user(1),
                    model: "m",
                    dims: 2,
                    text: "t",
                    content_hash: "h",
                },
                &EmbeddingPolicy::default(),
            )
            .await;

        assert!(matches!(result, Err(AppError::Provider(_))));
        assert!(uow.is_empty());
    }

    #[tokio::test]
    async fn test_provider_nan_vector_is_rejected() {
        let repo = Arc::new(InMemoryStore::new());
        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_generate()
            .returning(|_, _| Ok(generated(vec![f32::NAN, 0.5])));
        let store = EmbeddingStore::new(repo, Arc::new(provider));

        let mut uow = UnitOfWork::new();
        let result = store
            .ensure_embedding(
                &mut uow,
                EmbeddingRequest {
                    subject: SubjectKey::presentation(3),
                    model: "m",
                    dims: 2,
                    text: "t",
                    content_hash: "h",
                },
                &EmbeddingPolicy::default(),
            )
            .await;

        assert!(matches!(result, Err(AppError::Provider(_))));
        assert!(uow.is_empty());
    }

    #[tokio::test]
    async fn test_unit_provider_vector_is_flagged_normalized() {
        let repo = Arc::new(InMemoryStore::new());
        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_generate()
            .returning(|_, _| Ok(generated(vec![0.6, 0.8])));
        let store = EmbeddingStore::new(repo, Arc::new(provider));

        let mut uow = UnitOfWork::new();
        let ensured = store
            .ensure_embedding(
                &mut uow,
                EmbeddingRequest {
                    subject: SubjectKey::presentation(2),
                    model: "m",
                    dims: 2,
                    text: "t",
                    content_hash: "h",
                },
                &EmbeddingPolicy::default(),
            )
            .await
            .unwrap();

        assert!(ensured.normalized);
    }
}
