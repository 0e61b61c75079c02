use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use super::AgentSummary;

/// Provisioned telephone number owned by an organization
#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub id: Uuid,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    pub number: String,
    pub provider: String,
    #[serde(rename = "providerId")]
    pub provider_id: String,
    #[serde(rename = "agentId")]
    pub agent_id: Option<Uuid>,
    pub capabilities: Json<serde_json::Value>,
    pub country: Option<String>,
    #[serde(rename = "friendlyName")]
    pub friendly_name: Option<String>,
    pub metadata: Json<serde_json::Value>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "deletedAt")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhoneNumberWithAgent {
    #[serde(flatten)]
    pub number: PhoneNumber,
    pub agent: Option<AgentSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchNumbersQuery {
    #[serde(rename = "areaCode")]
    pub area_code: Option<String>,
    pub country: Option<String>,
    pub contains: Option<String>,
    #[serde(rename = "smsEnabled")]
    pub sms_enabled: Option<bool>,
    #[serde(rename = "voiceEnabled")]
    pub voice_enabled: Option<bool>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseNumberRequest {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    #[serde(rename = "agentId")]
    pub agent_id: Option<Uuid>,
    #[serde(rename = "friendlyName")]
    pub friendly_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateNumberRequest {
    #[serde(rename = "agentId")]
    pub agent_id: Option<Uuid>,
    #[serde(rename = "friendlyName")]
    pub friendly_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendSmsRequest {
    pub to: String,
    pub from: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCallerIdRequest {
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelephonyUsage {
    #[serde(rename = "activeNumbers")]
    pub active_numbers: i64,
    #[serde(rename = "callsLast30Days")]
    pub calls_last_30_days: i64,
}
