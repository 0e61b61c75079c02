//! Persistence seam for the delivery engine

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::DeliveryError;
use crate::models::{CustomWebhook, NewDelivery, WebhookDelivery};
use crate::server::db;

#[async_trait::async_trait]
pub trait WebhookStore: Send + Sync {
    /// Any webhook by id, including disabled and deleted ones
    async fn webhook(&self, id: Uuid) -> Result<Option<CustomWebhook>, DeliveryError>;

    async fn subscribed(&self, organization_id: Uuid, event: &str) -> Result<Vec<CustomWebhook>, DeliveryError>;

    async fn record_delivery(&self, delivery: &NewDelivery) -> Result<WebhookDelivery, DeliveryError>;

    /// Success flags, newest first
    async fn recent_outcomes(&self, webhook_id: Uuid, limit: i64) -> Result<Vec<bool>, DeliveryError>;

    async fn disable(&self, webhook_id: Uuid, reason: &str) -> Result<(), DeliveryError>;

    async fn delivery(&self, id: Uuid, organization_id: Uuid) -> Result<Option<WebhookDelivery>, DeliveryError>;

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, DeliveryError>;
}

pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WebhookStore for PgWebhookStore {
    async fn webhook(&self, id: Uuid) -> Result<Option<CustomWebhook>, DeliveryError> {
        Ok(db::webhooks::get(&self.pool, id).await?)
    }

    async fn subscribed(&self, organization_id: Uuid, event: &str) -> Result<Vec<CustomWebhook>, DeliveryError> {
        Ok(db::webhooks::get_subscribed(&self.pool, organization_id, event).await?)
    }

    async fn record_delivery(&self, delivery: &NewDelivery) -> Result<WebhookDelivery, DeliveryError> {
        Ok(db::webhooks::record_delivery(&self.pool, delivery).await?)
    }

    async fn recent_outcomes(&self, webhook_id: Uuid, limit: i64) -> Result<Vec<bool>, DeliveryError> {
        Ok(db::webhooks::recent_outcomes(&self.pool, webhook_id, limit).await?)
    }

    async fn disable(&self, webhook_id: Uuid, reason: &str) -> Result<(), DeliveryError> {
        Ok(db::webhooks::disable(&self.pool, webhook_id, reason).await?)
    }

    async fn delivery(&self, id: Uuid, organization_id: Uuid) -> Result<Option<WebhookDelivery>, DeliveryError> {
        Ok(db::webhooks::get_delivery(&self.pool, id, organization_id).await?)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, DeliveryError> {
        Ok(db::webhooks::prune_deliveries(&self.pool, before).await?)
    }
}
