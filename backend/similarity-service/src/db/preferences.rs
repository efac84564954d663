use super::{to_i64, PgStore, PreferenceRepository};
use crate::error::{AppError, Result};
use crate::models::{UserId, UserPreference};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::BTreeMap;
use tracing::error;

type WeightMap = BTreeMap<String, f64>;

#[async_trait]
impl PreferenceRepository for PgStore {
    async fn find_preference(&self, user_id: UserId) -> Result<Option<UserPreference>> {
        let row = sqlx::query_as::<_, (i64, Json<WeightMap>, Json<WeightMap>, DateTime<Utc>)>(
            r#"
            SELECT user_id, fav_categories, fav_keywords, updated_at
            FROM user_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(user_id, Json(fav_categories), Json(fav_keywords), updated_at)| UserPreference {
                user_id,
                fav_categories,
                fav_keywords,
                updated_at,
            },
        ))
    }

    async fn save_preference(&self, preference: &UserPreference) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (user_id, fav_categories, fav_keywords, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                fav_categories = EXCLUDED.fav_categories,
                fav_keywords = EXCLUDED.fav_keywords,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(preference.user_id)
        .bind(Json(&preference.fav_categories))
        .bind(Json(&preference.fav_keywords))
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(user_id = preference.user_id, "Failed to save preference: {}", e);
            AppError::Database(e.to_string())
        })?;

        Ok(())
    }

    async fn users_due_for_refresh(
        &self,
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT i.user_id
            FROM presentation_interactions i
            LEFT JOIN user_preferences p ON p.user_id = i.user_id
            WHERE p.user_id IS NULL OR p.updated_at < $1
            GROUP BY i.user_id
            ORDER BY MAX(i.created_at) DESC, i.user_id ASC
            LIMIT $2
            "#,
        )
        .bind(updated_before)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn users_with_preferences(&self, model: &str, limit: usize) -> Result<Vec<UserId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT p.user_id
            FROM user_preferences p
            LEFT JOIN subject_embeddings e
                ON e.subject_type = 'user' AND e.subject_id = p.user_id AND e.model = $1
            WHERE p.fav_categories <> '{}'::jsonb OR p.fav_keywords <> '{}'::jsonb
            ORDER BY e.updated_at ASC NULLS FIRST, p.user_id ASC
            LIMIT $2
            "#,
        )
        .bind(model)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}
