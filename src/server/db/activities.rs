//! CRM and calendar activity log
//!
//! Both logs share a shape and live in separate tables.

use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;
use crate::models::{Activity, ActivityFilter};

pub const LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityLog {
    Crm,
    Calendar,
}

impl ActivityLog {
    fn table(self) -> &'static str {
        match self {
            ActivityLog::Crm => "crm_activities",
            ActivityLog::Calendar => "calendar_activities",
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn record(
    pool: &PgPool,
    log: ActivityLog,
    organization_id: Uuid,
    provider: &str,
    activity_type: &str,
    call_id: Option<Uuid>,
    external_id: Option<&str>,
    metadata: serde_json::Value,
) -> Result<Activity, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO {} (id, organization_id, provider, activity_type, call_id, external_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, organization_id, provider, activity_type, call_id, external_id, metadata, created_at
        "#,
        log.table()
    );

    sqlx::query_as::<_, Activity>(&sql)
        .bind(Uuid::new_v4())
        .bind(organization_id)
        .bind(provider)
        .bind(activity_type)
        .bind(call_id)
        .bind(external_id)
        .bind(Json(metadata))
        .fetch_one(pool)
        .await
}

pub async fn list(
    pool: &PgPool,
    log: ActivityLog,
    organization_id: Uuid,
    filter: &ActivityFilter,
) -> Result<Vec<Activity>, sqlx::Error> {
    let sql = format!(
        r#"
        SELECT id, organization_id, provider, activity_type, call_id, external_id, metadata, created_at
        FROM {}
        WHERE organization_id = $1
          AND ($2::text IS NULL OR provider = $2)
          AND ($3::text IS NULL OR activity_type = $3)
          AND ($4::uuid IS NULL OR call_id = $4)
        ORDER BY created_at DESC
        LIMIT $5
        "#,
        log.table()
    );

    sqlx::query_as::<_, Activity>(&sql)
        .bind(organization_id)
        .bind(filter.provider.as_deref())
        .bind(filter.activity_type.as_deref())
        .bind(filter.call_id)
        .bind(LIST_LIMIT)
        .fetch_all(pool)
        .await
}
