use super::{EmbeddingRepository, PgStore};
use crate::error::{AppError, Result};
use crate::models::{SubjectEmbedding, SubjectKey, SubjectKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::error;

#[derive(sqlx::FromRow)]
struct EmbeddingRow {
    subject_type: String,
    subject_id: i64,
    model: String,
    dims: i32,
    vector: Vec<u8>,
    normalized: bool,
    content_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EmbeddingRow> for SubjectEmbedding {
    type Error = AppError;

    fn try_from(row: EmbeddingRow) -> Result<Self> {
        let dims = usize::try_from(row.dims).map_err(|_| {
            AppError::DataIntegrity(format!(
                "{}:{} has negative dims {}",
                row.subject_type, row.subject_id, row.dims
            ))
        })?;

        Ok(SubjectEmbedding {
            subject: SubjectKey {
                kind: row.subject_type.parse()?,
                id: row.subject_id,
            },
            model: row.model,
            dims,
            vector_bytes: row.vector,
            normalized: row.normalized,
            content_hash: row.content_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn dims_to_i32(dims: usize) -> Result<i32> {
    i32::try_from(dims).map_err(|_| AppError::Validation(format!("dims {dims} out of range")))
}

#[async_trait]
impl EmbeddingRepository for PgStore {
    async fn find_embedding(
        &self,
        subject: SubjectKey,
        model: &str,
    ) -> Result<Option<SubjectEmbedding>> {
        let row = sqlx::query_as::<_, EmbeddingRow>(
            r#"
            SELECT subject_type, subject_id, model, dims, vector, normalized,
                   content_hash, created_at, updated_at
            FROM subject_embeddings
            WHERE subject_type = $1 AND subject_id = $2 AND model = $3
            "#,
        )
        .bind(subject.kind.as_str())
        .bind(subject.id)
        .bind(model)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(subject = %subject, "Failed to load embedding: {}", e);
            AppError::Database(e.to_string())
        })?;

        row.map(SubjectEmbedding::try_from).transpose()
    }

    async fn save_embeddings(&self, rows: &[SubjectEmbedding]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO subject_embeddings
                    (subject_type, subject_id, model, dims, vector, normalized,
                     content_hash, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (subject_type, subject_id, model) DO UPDATE SET
                    dims = EXCLUDED.dims,
                    vector = EXCLUDED.vector,
                    normalized = EXCLUDED.normalized,
                    content_hash = EXCLUDED.content_hash,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(row.subject.kind.as_str())
            .bind(row.subject.id)
            .bind(&row.model)
            .bind(dims_to_i32(row.dims)?)
            .bind(&row.vector_bytes)
            .bind(row.normalized)
            .bind(&row.content_hash)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn load_embeddings(
        &self,
        kind: SubjectKind,
        model: &str,
        dims: usize,
    ) -> Result<Vec<SubjectEmbedding>> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            r#"
            SELECT subject_type, subject_id, model, dims, vector, normalized,
                   content_hash, created_at, updated_at
            FROM subject_embeddings
            WHERE subject_type = $1 AND model = $2 AND dims = $3
            ORDER BY subject_id ASC
            "#,
        )
        .bind(kind.as_str())
        .bind(model)
        .bind(dims_to_i32(dims)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(model = model, "Failed to load embedding scope: {}", e);
            AppError::Database(e.to_string())
        })?;

        rows.into_iter().map(SubjectEmbedding::try_from).collect()
    }
}
