use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// Events a custom webhook can subscribe to
pub const CALL_STARTED: &str = "call.started";
pub const CALL_ENDED: &str = "call.ended";
pub const CALL_ANALYZED: &str = "call.analyzed";
pub const WEBHOOK_TEST: &str = "webhook.test";

pub const SUPPORTED_EVENTS: &[&str] = &[CALL_STARTED, CALL_ENDED, CALL_ANALYZED];

/// Organization-owned endpoint that receives platform events
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct CustomWebhook {
    pub id: Uuid,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub method: WebhookMethod,
    pub headers: Json<HashMap<String, String>>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub enabled: bool,
    #[serde(rename = "disabledReason")]
    pub disabled_reason: Option<String>,
    #[serde(rename = "totalDeliveries")]
    pub total_deliveries: i32,
    #[serde(rename = "successfulDeliveries")]
    pub successful_deliveries: i32,
    #[serde(rename = "failedDeliveries")]
    pub failed_deliveries: i32,
    #[serde(rename = "lastTriggeredAt")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "deletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CustomWebhook {
    pub fn is_deliverable(&self) -> bool {
        self.enabled && self.deleted_at.is_none()
    }

    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }
}

#[derive(sqlx::Type, Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(type_name = "webhook_method")]
pub enum WebhookMethod {
    #[default]
    #[serde(rename = "POST")]
    #[sqlx(rename = "POST")]
    Post,
    #[serde(rename = "GET")]
    #[sqlx(rename = "GET")]
    Get,
}

/// Body sent to subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    pub event: String,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        }
    }
}

/// One attempt at delivering an event
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    #[serde(rename = "webhookId")]
    pub webhook_id: Uuid,
    pub event: String,
    pub payload: Json<WebhookEvent>,
    #[serde(rename = "responseStatus")]
    pub response_status: Option<i32>,
    #[serde(rename = "responseBody")]
    pub response_body: Option<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: Option<i32>,
    pub success: bool,
    #[serde(rename = "errorMessage")]
    pub error_message: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Outcome of an attempt, before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewDelivery {
    pub webhook_id: Uuid,
    pub event: String,
    pub payload: WebhookEvent,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub duration_ms: Option<i32>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWebhookRequest {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub method: Option<WebhookMethod>,
    pub headers: Option<HashMap<String, String>>,
    pub secret: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateWebhookRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub method: Option<WebhookMethod>,
    pub headers: Option<HashMap<String, String>>,
    /// An empty string removes the secret
    pub secret: Option<String>,
    pub enabled: Option<bool>,
}

/// Returned once on creation so the caller can store the signing secret
#[derive(Debug, Clone, Serialize)]
pub struct CreatedWebhook {
    #[serde(flatten)]
    pub webhook: CustomWebhook,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryListQuery {
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_defaults_to_post() {
        assert_eq!(WebhookMethod::default(), WebhookMethod::Post);
        let req: CreateWebhookRequest = serde_json::from_value(serde_json::json!({
            "name": "CRM sync",
            "url": "https://example.com/hook",
            "events": ["call.ended"],
            "method": "GET"
        }))
        .unwrap();
        assert_eq!(req.method, Some(WebhookMethod::Get));
        assert!(req.enabled.is_none());
    }

    #[test]
    fn test_event_timestamp_is_rfc3339() {
        let event = WebhookEvent::new(CALL_ENDED, serde_json::json!({"callId": "abc"}));
        assert_eq!(event.event, "call.ended");
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
    }
}
