//! Custom webhook and delivery log database operations

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;
use crate::models::{CustomWebhook, NewDelivery, WebhookDelivery, WebhookMethod};

pub struct NewWebhook {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub method: WebhookMethod,
    pub headers: HashMap<String, String>,
    pub secret: Option<String>,
    pub enabled: bool,
}

pub async fn create(pool: &PgPool, organization_id: Uuid, new: NewWebhook) -> Result<CustomWebhook, sqlx::Error> {
    sqlx::query_as::<_, CustomWebhook>(
        r#"
        INSERT INTO custom_webhooks (id, organization_id, name, url, events, method, headers, secret, enabled)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, organization_id, name, url, events, method, headers, secret, enabled,
                  disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
                  last_triggered_at, created_at, updated_at, deleted_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(&new.name)
    .bind(&new.url)
    .bind(&new.events)
    .bind(new.method)
    .bind(Json(&new.headers))
    .bind(&new.secret)
    .bind(new.enabled)
    .fetch_one(pool)
    .await
}

pub async fn get_all(pool: &PgPool, organization_id: Uuid) -> Result<Vec<CustomWebhook>, sqlx::Error> {
    sqlx::query_as::<_, CustomWebhook>(
        r#"
        SELECT id, organization_id, name, url, events, method, headers, secret, enabled,
               disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
               last_triggered_at, created_at, updated_at, deleted_at
        FROM custom_webhooks
        WHERE organization_id = $1 AND deleted_at IS NULL
        ORDER BY created_at DESC
        "#
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await
}

pub async fn get_by_id(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<Option<CustomWebhook>, sqlx::Error> {
    sqlx::query_as::<_, CustomWebhook>(
        r#"
        SELECT id, organization_id, name, url, events, method, headers, secret, enabled,
               disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
               last_triggered_at, created_at, updated_at, deleted_at
        FROM custom_webhooks
        WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
        "#
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
}

/// Unscoped lookup used by the delivery workers; includes deleted rows
pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<CustomWebhook>, sqlx::Error> {
    sqlx::query_as::<_, CustomWebhook>(
        r#"
        SELECT id, organization_id, name, url, events, method, headers, secret, enabled,
               disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
               last_triggered_at, created_at, updated_at, deleted_at
        FROM custom_webhooks
        WHERE id = $1
        "#
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Enabled, live webhooks of an organization subscribed to `event`
pub async fn get_subscribed(pool: &PgPool, organization_id: Uuid, event: &str) -> Result<Vec<CustomWebhook>, sqlx::Error> {
    sqlx::query_as::<_, CustomWebhook>(
        r#"
        SELECT id, organization_id, name, url, events, method, headers, secret, enabled,
               disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
               last_triggered_at, created_at, updated_at, deleted_at
        FROM custom_webhooks
        WHERE organization_id = $1 AND enabled AND deleted_at IS NULL AND $2 = ANY(events)
        "#
    )
    .bind(organization_id)
    .bind(event)
    .fetch_all(pool)
    .await
}

#[derive(Debug, Default)]
pub struct WebhookChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub method: Option<WebhookMethod>,
    pub headers: Option<HashMap<String, String>>,
    /// `Some(None)` removes the secret and stops signing
    pub secret: Option<Option<String>>,
    pub enabled: Option<bool>,
}

impl WebhookChanges {
    /// Turning a webhook back on clears its disabled reason.
    pub fn apply(self, webhook: &mut CustomWebhook) {
        if let Some(name) = self.name {
            webhook.name = name;
        }
        if let Some(url) = self.url {
            webhook.url = url;
        }
        if let Some(events) = self.events {
            webhook.events = events;
        }
        if let Some(method) = self.method {
            webhook.method = method;
        }
        if let Some(headers) = self.headers {
            webhook.headers = Json(headers);
        }
        if let Some(secret) = self.secret {
            webhook.secret = secret;
        }
        if let Some(enabled) = self.enabled {
            webhook.enabled = enabled;
            if enabled {
                webhook.disabled_reason = None;
            }
        }
    }
}

/// Partial update, applied to the locked row
pub async fn update(
    pool: &PgPool,
    id: Uuid,
    organization_id: Uuid,
    changes: WebhookChanges,
) -> Result<Option<CustomWebhook>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, CustomWebhook>(
        r#"
        SELECT id, organization_id, name, url, events, method, headers, secret, enabled,
               disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
               last_triggered_at, created_at, updated_at, deleted_at
        FROM custom_webhooks
        WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
        FOR UPDATE
        "#
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(mut webhook) = current else {
        return Ok(None);
    };
    changes.apply(&mut webhook);

    let updated = sqlx::query_as::<_, CustomWebhook>(
        r#"
        UPDATE custom_webhooks
        SET name = $2, url = $3, events = $4, method = $5, headers = $6, secret = $7,
            enabled = $8, disabled_reason = $9, updated_at = NOW()
        WHERE id = $1
        RETURNING id, organization_id, name, url, events, method, headers, secret, enabled,
                  disabled_reason, total_deliveries, successful_deliveries, failed_deliveries,
                  last_triggered_at, created_at, updated_at, deleted_at
        "#
    )
    .bind(webhook.id)
    .bind(&webhook.name)
    .bind(&webhook.url)
    .bind(&webhook.events)
    .bind(webhook.method)
    .bind(Json(&webhook.headers.0))
    .bind(&webhook.secret)
    .bind(webhook.enabled)
    .bind(&webhook.disabled_reason)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(updated))
}

pub async fn soft_delete(pool: &PgPool, id: Uuid, organization_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE custom_webhooks
        SET deleted_at = NOW(), enabled = FALSE, updated_at = NOW()
        WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
        "#
    )
    .bind(id)
    .bind(organization_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn disable(pool: &PgPool, id: Uuid, reason: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE custom_webhooks SET enabled = FALSE, disabled_reason = $2, updated_at = NOW() WHERE id = $1"
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist one attempt and bump the webhook counters atomically
pub async fn record_delivery(pool: &PgPool, delivery: &NewDelivery) -> Result<WebhookDelivery, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, WebhookDelivery>(
        r#"
        INSERT INTO webhook_deliveries (id, webhook_id, event, payload, response_status, response_body,
                                        duration_ms, success, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, webhook_id, event, payload, response_status, response_body, duration_ms,
                  success, error_message, created_at
        "#
    )
    .bind(Uuid::new_v4())
    .bind(delivery.webhook_id)
    .bind(&delivery.event)
    .bind(Json(&delivery.payload))
    .bind(delivery.response_status)
    .bind(&delivery.response_body)
    .bind(delivery.duration_ms)
    .bind(delivery.success)
    .bind(&delivery.error_message)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE custom_webhooks
        SET total_deliveries = total_deliveries + 1,
            successful_deliveries = successful_deliveries + CASE WHEN $2 THEN 1 ELSE 0 END,
            failed_deliveries = failed_deliveries + CASE WHEN $2 THEN 0 ELSE 1 END,
            last_triggered_at = NOW()
        WHERE id = $1
        "#
    )
    .bind(delivery.webhook_id)
    .bind(delivery.success)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Success flags of the most recent deliveries, newest first
pub async fn recent_outcomes(pool: &PgPool, webhook_id: Uuid, limit: i64) -> Result<Vec<bool>, sqlx::Error> {
    let rows: Vec<(bool,)> = sqlx::query_as(
        r#"
        SELECT success FROM webhook_deliveries
        WHERE webhook_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#
    )
    .bind(webhook_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(success,)| success).collect())
}

pub async fn list_deliveries(pool: &PgPool, webhook_id: Uuid, limit: i64) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT id, webhook_id, event, payload, response_status, response_body, duration_ms,
               success, error_message, created_at
        FROM webhook_deliveries
        WHERE webhook_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#
    )
    .bind(webhook_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Delivery joined to its webhook so callers can check the owning organization
pub async fn get_delivery(
    pool: &PgPool,
    id: Uuid,
    organization_id: Uuid,
) -> Result<Option<WebhookDelivery>, sqlx::Error> {
    sqlx::query_as::<_, WebhookDelivery>(
        r#"
        SELECT d.id, d.webhook_id, d.event, d.payload, d.response_status, d.response_body,
               d.duration_ms, d.success, d.error_message, d.created_at
        FROM webhook_deliveries d
        JOIN custom_webhooks w ON w.id = d.webhook_id
        WHERE d.id = $1 AND w.organization_id = $2
        "#
    )
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await
}

pub async fn prune_deliveries(pool: &PgPool, before: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM webhook_deliveries WHERE created_at < $1")
        .bind(before)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
