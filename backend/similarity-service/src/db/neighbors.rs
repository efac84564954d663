use super::{to_i64, NeighborRepository, PgStore};
use crate::error::{AppError, Result};
use crate::models::{Neighbor, PresentationId, ScoredNeighbor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::error;

#[async_trait]
impl NeighborRepository for PgStore {
    async fn replace_neighbors(
        &self,
        presentation_id: PresentationId,
        model: &str,
        neighbors: &[ScoredNeighbor],
    ) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Single writer per (presentation, model) for the rest of the transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("presentation_neighbors:{model}:{presentation_id}"))
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM presentation_neighbors WHERE presentation_id = $1 AND model = $2")
            .bind(presentation_id)
            .bind(model)
            .execute(&mut *tx)
            .await?;

        for (idx, neighbor) in neighbors.iter().enumerate() {
            let rank = i32::try_from(idx + 1)
                .map_err(|_| AppError::Internal("neighbor list too long".into()))?;
            sqlx::query(
                r#"
                INSERT INTO presentation_neighbors
                    (presentation_id, model, rank, neighbor_id, score, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(presentation_id)
            .bind(model)
            .bind(rank)
            .bind(neighbor.neighbor_id)
            .bind(neighbor.score)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(|e| {
            error!(
                presentation_id = presentation_id,
                model = model,
                "Failed to replace neighbors: {}",
                e
            );
            AppError::Database(e.to_string())
        })?;

        Ok(neighbors.len())
    }

    async fn list_neighbors(
        &self,
        presentation_id: PresentationId,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let rows = sqlx::query_as::<_, (i64, String, i32, i64, f32, DateTime<Utc>)>(
            r#"
            SELECT presentation_id, model, rank, neighbor_id, score, updated_at
            FROM presentation_neighbors
            WHERE presentation_id = $1 AND model = $2
            ORDER BY rank ASC
            LIMIT $3
            "#,
        )
        .bind(presentation_id)
        .bind(model)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(presentation_id, model, rank, neighbor_id, score, updated_at)| Neighbor {
                    presentation_id,
                    model,
                    rank: u32::try_from(rank).unwrap_or(0),
                    neighbor_id,
                    score,
                    updated_at,
                },
            )
            .collect())
    }

    async fn delete_for_presentation(&self, presentation_id: PresentationId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM presentation_neighbors WHERE presentation_id = $1")
            .bind(presentation_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
