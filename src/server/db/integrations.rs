//! Integration settings database operations

use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;
use crate::models::Integration;

pub async fn get(pool: &PgPool, organization_id: Uuid, provider: &str) -> Result<Option<Integration>, sqlx::Error> {
    sqlx::query_as::<_, Integration>(
        r#"
        SELECT id, organization_id, provider, enabled, credentials, settings, created_at, updated_at
        FROM integrations
        WHERE organization_id = $1 AND provider = $2
        "#
    )
    .bind(organization_id)
    .bind(provider)
    .fetch_optional(pool)
    .await
}

/// Insert or replace the settings of one provider for an organization
pub async fn upsert(
    pool: &PgPool,
    organization_id: Uuid,
    provider: &str,
    enabled: bool,
    credentials: serde_json::Value,
    settings: serde_json::Value,
) -> Result<Integration, sqlx::Error> {
    sqlx::query_as::<_, Integration>(
        r#"
        INSERT INTO integrations (id, organization_id, provider, enabled, credentials, settings)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (organization_id, provider) DO UPDATE
        SET enabled = EXCLUDED.enabled,
            credentials = EXCLUDED.credentials,
            settings = EXCLUDED.settings,
            updated_at = NOW()
        RETURNING id, organization_id, provider, enabled, credentials, settings, created_at, updated_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(provider)
    .bind(enabled)
    .bind(Json(credentials))
    .bind(Json(settings))
    .fetch_one(pool)
    .await
}
