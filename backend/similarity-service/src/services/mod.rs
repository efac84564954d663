pub mod canonical;
pub mod embedding;
pub mod neighbors;
pub mod preferences;
pub mod ranking;

pub use canonical::{content_hash, NormalizationTables, TextCanonicalizer};
pub use embedding::{EmbeddingPolicy, EmbeddingProvider, EmbeddingStore, UnitOfWork};
pub use neighbors::{NeighborComputer, NeighborRequest, SimilarPresentations};
pub use preferences::{PreferenceAggregator, PreferenceService};
pub use ranking::{HomepageRanker, HomepageRecommendation, RankingConfig};
