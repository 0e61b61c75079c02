//! Call database operations

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use crate::models::{Call, CallAnalytics, CallDirection, CallStatus};

/// Maximum number of calls returned by a listing
pub const LIST_LIMIT: i64 = 100;

pub async fn get_all(pool: &PgPool, organization_id: Uuid) -> Result<Vec<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, organization_id, agent_id, retell_call_id, direction, status, from_number,
               to_number, started_at, ended_at, duration, transcript, recording_url,
               disconnect_reason, quality_score, sentiment_score, latency_ms,
               interruptions_count, cost, created_at
        FROM calls
        WHERE organization_id = $1
        ORDER BY started_at DESC NULLS LAST, created_at DESC
        LIMIT $2
        "#
    )
    .bind(organization_id)
    .bind(LIST_LIMIT)
    .fetch_all(pool)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        SELECT id, organization_id, agent_id, retell_call_id, direction, status, from_number,
               to_number, started_at, ended_at, duration, transcript, recording_url,
               disconnect_reason, quality_score, sentiment_score, latency_ms,
               interruptions_count, cost, created_at
        FROM calls
        WHERE id = $1 AND organization_id = $2
        "#
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
}

pub async fn analytics(pool: &PgPool, organization_id: Uuid) -> Result<CallAnalytics, sqlx::Error> {
    let rows: Vec<(CallStatus, Option<i32>, Option<f64>)> = sqlx::query_as(
        "SELECT status, duration, cost FROM calls WHERE organization_id = $1"
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(CallAnalytics::summarize(rows))
}

/// Record a call we placed or received; `retell_call_id` may be unknown yet
#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &PgPool,
    organization_id: Uuid,
    agent_id: Option<Uuid>,
    retell_call_id: Option<&str>,
    direction: CallDirection,
    from_number: Option<&str>,
    to_number: Option<&str>,
    started_at: DateTime<Utc>,
) -> Result<Call, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        INSERT INTO calls (id, organization_id, agent_id, retell_call_id, direction, status,
                           from_number, to_number, started_at)
        VALUES ($1, $2, $3, $4, $5, 'initiated', $6, $7, $8)
        RETURNING id, organization_id, agent_id, retell_call_id, direction, status, from_number,
                  to_number, started_at, ended_at, duration, transcript, recording_url,
                  disconnect_reason, quality_score, sentiment_score, latency_ms,
                  interruptions_count, cost, created_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(agent_id)
    .bind(retell_call_id)
    .bind(direction)
    .bind(from_number)
    .bind(to_number)
    .bind(started_at)
    .fetch_one(pool)
    .await
}

/// Insert or refresh a call reported as started by Retell
#[allow(clippy::too_many_arguments)]
pub async fn upsert_started(
    pool: &PgPool,
    organization_id: Uuid,
    agent_id: Uuid,
    retell_call_id: &str,
    direction: CallDirection,
    from_number: Option<&str>,
    to_number: Option<&str>,
    started_at: DateTime<Utc>,
) -> Result<Call, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        INSERT INTO calls (id, organization_id, agent_id, retell_call_id, direction, status,
                           from_number, to_number, started_at)
        VALUES ($1, $2, $3, $4, $5, 'ongoing', $6, $7, $8)
        ON CONFLICT (retell_call_id) DO UPDATE
        SET status = 'ongoing',
            started_at = EXCLUDED.started_at,
            from_number = COALESCE(calls.from_number, EXCLUDED.from_number),
            to_number = COALESCE(calls.to_number, EXCLUDED.to_number)
        RETURNING id, organization_id, agent_id, retell_call_id, direction, status, from_number,
                  to_number, started_at, ended_at, duration, transcript, recording_url,
                  disconnect_reason, quality_score, sentiment_score, latency_ms,
                  interruptions_count, cost, created_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(agent_id)
    .bind(retell_call_id)
    .bind(direction)
    .bind(from_number)
    .bind(to_number)
    .bind(started_at)
    .fetch_one(pool)
    .await
}

pub async fn mark_ended(
    pool: &PgPool,
    retell_call_id: &str,
    ended_at: DateTime<Utc>,
    duration: Option<i32>,
    transcript: Option<&str>,
    recording_url: Option<&str>,
    disconnect_reason: Option<&str>,
) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        UPDATE calls
        SET status = 'ended',
            ended_at = $2,
            duration = COALESCE($3, duration),
            transcript = COALESCE($4, transcript),
            recording_url = COALESCE($5, recording_url),
            disconnect_reason = COALESCE($6, disconnect_reason)
        WHERE retell_call_id = $1
        RETURNING id, organization_id, agent_id, retell_call_id, direction, status, from_number,
                  to_number, started_at, ended_at, duration, transcript, recording_url,
                  disconnect_reason, quality_score, sentiment_score, latency_ms,
                  interruptions_count, cost, created_at
        "#
    )
    .bind(retell_call_id)
    .bind(ended_at)
    .bind(duration)
    .bind(transcript)
    .bind(recording_url)
    .bind(disconnect_reason)
    .fetch_optional(pool)
    .await
}

/// Post-call metrics reported by `call_analyzed`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallMetrics {
    pub quality_score: Option<f64>,
    pub sentiment_score: Option<f64>,
    pub latency_ms: Option<i32>,
    pub interruptions_count: Option<i32>,
    pub cost: Option<f64>,
}

pub async fn set_metrics(
    pool: &PgPool,
    retell_call_id: &str,
    metrics: &CallMetrics,
) -> Result<Option<Call>, sqlx::Error> {
    sqlx::query_as::<_, Call>(
        r#"
        UPDATE calls
        SET quality_score = COALESCE($2, quality_score),
            sentiment_score = COALESCE($3, sentiment_score),
            latency_ms = COALESCE($4, latency_ms),
            interruptions_count = COALESCE($5, interruptions_count),
            cost = COALESCE($6, cost)
        WHERE retell_call_id = $1
        RETURNING id, organization_id, agent_id, retell_call_id, direction, status, from_number,
                  to_number, started_at, ended_at, duration, transcript, recording_url,
                  disconnect_reason, quality_score, sentiment_score, latency_ms,
                  interruptions_count, cost, created_at
        "#
    )
    .bind(retell_call_id)
    .bind(metrics.quality_score)
    .bind(metrics.sentiment_score)
    .bind(metrics.latency_ms)
    .bind(metrics.interruptions_count)
    .bind(metrics.cost)
    .fetch_optional(pool)
    .await
}

/// Apply a Twilio status callback. The call is matched by the id we stored
/// at pickup, which for Twilio-originated calls is the CallSid.
pub async fn update_status_by_provider_id(
    pool: &PgPool,
    provider_call_id: &str,
    status: CallStatus,
    duration: Option<i32>,
) -> Result<bool, sqlx::Error> {
    let ended = status == CallStatus::Ended;
    let result = sqlx::query(
        r#"
        UPDATE calls
        SET status = $2,
            duration = CASE WHEN $3 THEN COALESCE($4, duration) ELSE duration END,
            ended_at = CASE WHEN $3 THEN NOW() ELSE ended_at END
        WHERE retell_call_id = $1
        "#
    )
    .bind(provider_call_id)
    .bind(status)
    .bind(ended)
    .bind(duration)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_since(
    pool: &PgPool,
    organization_id: Uuid,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM calls WHERE organization_id = $1 AND created_at >= $2"
    )
    .bind(organization_id)
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
