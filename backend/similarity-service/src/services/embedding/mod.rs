// ============================================
// Embedding Store
// ============================================
//
// Provider client, vector packing helpers and the change-detecting
// store that decides when a subject's vector is recomputed.

pub mod provider;
mod store;
pub mod vector;

pub use provider::{EmbeddingProvider, GeneratedEmbedding, HttpEmbeddingProvider, ProviderConfig};
pub use store::{
    decide, ComputeReason, EmbeddingDecision, EmbeddingPolicy, EmbeddingRequest, EmbeddingStore,
    EnsuredEmbedding, SkipReason, UnitOfWork,
};
