use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

/// Stored per-organization integration settings (CRM or calendar)
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: Uuid,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    pub provider: String,
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub credentials: Json<serde_json::Value>,
    pub settings: Json<serde_json::Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureIntegrationRequest {
    pub enabled: bool,
    #[serde(default)]
    pub credentials: serde_json::Value,
    pub settings: Option<serde_json::Value>,
}

/// Audit row for an action performed against an external system
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    pub provider: String,
    #[serde(rename = "activityType")]
    pub activity_type: String,
    #[serde(rename = "callId")]
    pub call_id: Option<Uuid>,
    #[serde(rename = "externalId")]
    pub external_id: Option<String>,
    pub metadata: Json<serde_json::Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityFilter {
    pub provider: Option<String>,
    #[serde(rename = "activityType")]
    pub activity_type: Option<String>,
    #[serde(rename = "callId")]
    pub call_id: Option<Uuid>,
}

/// Generic `{ success, provider, ... }` connection test report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionTest {
    pub success: bool,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Uniform `{ success, message }` reply used by several endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, message: None, error: Some(error.into()) }
    }
}
