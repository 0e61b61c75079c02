//! Phone number database operations

use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;
use crate::models::PhoneNumber;

pub struct NewPhoneNumber<'a> {
    pub organization_id: Uuid,
    pub number: &'a str,
    pub provider_id: &'a str,
    pub agent_id: Option<Uuid>,
    pub capabilities: serde_json::Value,
    pub country: Option<&'a str>,
    pub friendly_name: Option<&'a str>,
    pub metadata: serde_json::Value,
}

pub async fn create(pool: &PgPool, new: NewPhoneNumber<'_>) -> Result<PhoneNumber, sqlx::Error> {
    sqlx::query_as::<_, PhoneNumber>(
        r#"
        INSERT INTO phone_numbers (id, organization_id, number, provider, provider_id, agent_id,
                                   capabilities, country, friendly_name, metadata)
        VALUES ($1, $2, $3, 'twilio', $4, $5, $6, $7, $8, $9)
        RETURNING id, organization_id, number, provider, provider_id, agent_id, capabilities,
                  country, friendly_name, metadata, created_at, updated_at, deleted_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(new.organization_id)
    .bind(new.number)
    .bind(new.provider_id)
    .bind(new.agent_id)
    .bind(Json(new.capabilities))
    .bind(new.country)
    .bind(new.friendly_name)
    .bind(Json(new.metadata))
    .fetch_one(pool)
    .await
}

pub async fn get_all(pool: &PgPool, organization_id: Uuid) -> Result<Vec<PhoneNumber>, sqlx::Error> {
    sqlx::query_as::<_, PhoneNumber>(
        r#"
        SELECT id, organization_id, number, provider, provider_id, agent_id, capabilities,
               country, friendly_name, metadata, created_at, updated_at, deleted_at
        FROM phone_numbers
        WHERE organization_id = $1 AND deleted_at IS NULL
        ORDER BY created_at DESC
        "#
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<Option<PhoneNumber>, sqlx::Error> {
    sqlx::query_as::<_, PhoneNumber>(
        r#"
        SELECT id, organization_id, number, provider, provider_id, agent_id, capabilities,
               country, friendly_name, metadata, created_at, updated_at, deleted_at
        FROM phone_numbers
        WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
        "#
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
}

/// Look up the owner of a dialed number
pub async fn get_by_number(pool: &PgPool, number: &str) -> Result<Option<PhoneNumber>, sqlx::Error> {
    sqlx::query_as::<_, PhoneNumber>(
        r#"
        SELECT id, organization_id, number, provider, provider_id, agent_id, capabilities,
               country, friendly_name, metadata, created_at, updated_at, deleted_at
        FROM phone_numbers
        WHERE number = $1 AND deleted_at IS NULL
        ORDER BY created_at DESC
        LIMIT 1
        "#
    )
    .bind(number)
    .fetch_optional(pool)
    .await
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    organization_id: Uuid,
    agent_id: Option<Uuid>,
    friendly_name: Option<&str>,
) -> Result<Option<PhoneNumber>, sqlx::Error> {
    sqlx::query_as::<_, PhoneNumber>(
        r#"
        UPDATE phone_numbers
        SET agent_id = COALESCE($3, agent_id),
            friendly_name = COALESCE($4, friendly_name),
            updated_at = NOW()
        WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
        RETURNING id, organization_id, number, provider, provider_id, agent_id, capabilities,
                  country, friendly_name, metadata, created_at, updated_at, deleted_at
        "#
    )
    .bind(id)
    .bind(organization_id)
    .bind(agent_id)
    .bind(friendly_name)
    .fetch_optional(pool)
    .await
}

pub async fn soft_delete(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE phone_numbers
        SET deleted_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
        "#
    )
    .bind(id)
    .bind(organization_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_active(pool: &PgPool, organization_id: Uuid) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM phone_numbers WHERE organization_id = $1 AND deleted_at IS NULL"
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
