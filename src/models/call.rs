use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Agent, AgentSummary};

#[derive(sqlx::FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: Uuid,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    #[serde(rename = "agentId")]
    pub agent_id: Option<Uuid>,
    #[serde(rename = "retellCallId")]
    pub retell_call_id: Option<String>,
    pub direction: CallDirection,
    pub status: CallStatus,
    #[serde(rename = "fromNumber")]
    pub from_number: Option<String>,
    #[serde(rename = "toNumber")]
    pub to_number: Option<String>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "endedAt")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<i32>,
    pub transcript: Option<String>,
    #[serde(rename = "recordingUrl")]
    pub recording_url: Option<String>,
    #[serde(rename = "disconnectReason")]
    pub disconnect_reason: Option<String>,
    #[serde(rename = "qualityScore")]
    pub quality_score: Option<f64>,
    #[serde(rename = "sentimentScore")]
    pub sentiment_score: Option<f64>,
    #[serde(rename = "latencyMs")]
    pub latency_ms: Option<i32>,
    #[serde(rename = "interruptionsCount")]
    pub interruptions_count: Option<i32>,
    pub cost: Option<f64>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Call listing entry with a compact agent
#[derive(Debug, Clone, Serialize)]
pub struct CallWithAgentSummary {
    #[serde(flatten)]
    pub call: Call,
    pub agent: Option<AgentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallWithAgent {
    #[serde(flatten)]
    pub call: Call,
    pub agent: Option<Agent>,
}

#[derive(sqlx::Type, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "call_direction", rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

#[derive(sqlx::Type, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "call_status", rename_all = "lowercase")]
pub enum CallStatus {
    Initiated,
    Ongoing,
    Ended,
    Failed,
}

impl CallStatus {
    /// Map a Twilio `CallStatus` value onto our lifecycle
    pub fn from_twilio(status: &str) -> Self {
        match status {
            "queued" => CallStatus::Initiated,
            "ringing" | "in-progress" => CallStatus::Ongoing,
            "completed" => CallStatus::Ended,
            "busy" | "failed" | "no-answer" | "canceled" => CallStatus::Failed,
            _ => CallStatus::Initiated,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CallStatus::Initiated | CallStatus::Ongoing)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallsByStatus {
    pub ended: i64,
    pub ongoing: i64,
    pub failed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallAnalytics {
    #[serde(rename = "totalCalls")]
    pub total_calls: i64,
    #[serde(rename = "totalDuration")]
    pub total_duration: i64,
    #[serde(rename = "avgDuration")]
    pub avg_duration: i64,
    #[serde(rename = "totalCost")]
    pub total_cost: f64,
    #[serde(rename = "callsByStatus")]
    pub calls_by_status: CallsByStatus,
}

impl CallAnalytics {
    /// Aggregate (status, duration, cost) rows; missing values count as zero
    pub fn summarize<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (CallStatus, Option<i32>, Option<f64>)>,
    {
        let mut total_calls = 0i64;
        let mut total_duration = 0i64;
        let mut total_cost = 0.0;
        let mut by_status = CallsByStatus { ended: 0, ongoing: 0, failed: 0 };

        for (status, duration, cost) in rows {
            total_calls += 1;
            total_duration += i64::from(duration.unwrap_or(0));
            total_cost += cost.unwrap_or(0.0);
            match status {
                CallStatus::Ended => by_status.ended += 1,
                CallStatus::Ongoing => by_status.ongoing += 1,
                CallStatus::Failed => by_status.failed += 1,
                CallStatus::Initiated => {}
            }
        }

        let avg_duration = if total_calls > 0 {
            (total_duration as f64 / total_calls as f64).round() as i64
        } else {
            0
        };

        Self {
            total_calls,
            total_duration,
            avg_duration,
            total_cost,
            calls_by_status: by_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCallRequest {
    #[serde(rename = "agentId")]
    pub agent_id: Uuid,
    #[serde(rename = "toNumber")]
    pub to_number: String,
    #[serde(rename = "fromNumber")]
    pub from_number: Option<String>,
    #[serde(rename = "dynamicVariables")]
    pub dynamic_variables: Option<serde_json::Value>,
}
