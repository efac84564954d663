pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;

pub use config::Config;
pub use db::{InMemoryStore, PgStore};
pub use error::{AppError, Result};
pub use jobs::JobContext;
pub use services::{
    EmbeddingStore, HomepageRanker, NeighborComputer, PreferenceService, SimilarPresentations,
    TextCanonicalizer,
};
