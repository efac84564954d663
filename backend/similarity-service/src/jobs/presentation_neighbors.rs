// ============================================
// recompute-presentation-neighbors
// ============================================

use super::{limit_from_flag, JobContext};
use crate::db::{CatalogScope, PresentationQuery};
use crate::error::Result;
use crate::models::PresentationId;
use crate::services::neighbors::{NeighborComputer, NeighborRequest, NeighborRunStats};
use tracing::info;

#[derive(Debug, Clone)]
pub struct PresentationNeighborsConfig {
    pub presentation_id: Option<PresentationId>,
    /// 0 = every presentation with a vector
    pub limit: usize,
    pub k: usize,
    pub model: String,
    pub dims: usize,
    pub scope: CatalogScope,
}

impl Default for PresentationNeighborsConfig {
    fn default() -> Self {
        Self {
            presentation_id: None,
            limit: 0,
            k: 30,
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            scope: CatalogScope::default(),
        }
    }
}

pub type PresentationNeighborsStats = NeighborRunStats;

pub async fn run(
    ctx: &JobContext,
    config: &PresentationNeighborsConfig,
) -> Result<PresentationNeighborsStats> {
    if let Some(id) = config.presentation_id {
        let found = ctx
            .catalog
            .find_presentations(&PresentationQuery {
                ids: Some(vec![id]),
                scope: config.scope,
                model: config.model.clone(),
                missing_only: false,
                limit: Some(1),
            })
            .await?;
        if found.is_empty() {
            info!(presentation_id = id, "Presentation not in scope, nothing to process");
            return Ok(PresentationNeighborsStats::default());
        }
    }

    let computer = NeighborComputer::new(
        ctx.embeddings.clone(),
        ctx.neighbors.clone(),
        ctx.catalog.clone(),
    );

    computer
        .run(&NeighborRequest {
            targets: config.presentation_id.map(|id| vec![id]),
            model: config.model.clone(),
            dims: config.dims,
            k: config.k,
            scope: config.scope,
            limit: limit_from_flag(config.limit),
        })
        .await
}
