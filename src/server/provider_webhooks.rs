//! Inbound callbacks from Retell and Twilio
//!
//! These routes are unauthenticated. Retell payloads are checked against
//! `RETELL_WEBHOOK_SECRET` when it is set.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Form, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::db::{self, calls::CallMetrics};
use super::webhooks::signing;
use super::AppState;
use crate::models::*;

pub const RETELL_SIGNATURE_HEADER: &str = "x-retell-signature";
const RETELL_STREAM_BASE: &str = "wss://api.retellai.com/v1/stream";
const GREETING: &str = "Connecting you with our assistant.";
const APOLOGY: &str = "Sorry, an error occurred. Please try again later.";

#[derive(Debug, Deserialize)]
pub struct RetellEvent {
    pub event: String,
    #[serde(default)]
    pub call: Option<RetellCallPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetellCallPayload {
    pub call_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub from_number: Option<String>,
    #[serde(default)]
    pub to_number: Option<String>,
    /// Epoch milliseconds
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub end_timestamp: Option<i64>,
    /// Seconds
    #[serde(default)]
    pub call_duration: Option<i64>,
    #[serde(default)]
    pub transcript: Option<serde_json::Value>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub disconnect_reason: Option<String>,
    #[serde(default)]
    pub call_analysis: Option<CallAnalysisPayload>,
    #[serde(default)]
    pub cost: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallAnalysisPayload {
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub sentiment_score: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<i32>,
    #[serde(default)]
    pub interruptions_count: Option<i32>,
}

impl RetellCallPayload {
    fn started_at(&self) -> DateTime<Utc> {
        self.start_timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    fn ended_at(&self) -> DateTime<Utc> {
        self.end_timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    fn direction(&self) -> CallDirection {
        match self.direction.as_deref() {
            Some("outbound") => CallDirection::Outbound,
            _ => CallDirection::Inbound,
        }
    }

    /// Reported duration, else derived from the timestamps
    fn duration_secs(&self) -> Option<i32> {
        self.call_duration
            .or_else(|| match (self.start_timestamp, self.end_timestamp) {
                (Some(start), Some(end)) if end >= start => Some((end - start) / 1000),
                _ => None,
            })
            .and_then(|d| i32::try_from(d).ok())
    }

    fn transcript_json(&self) -> Option<String> {
        self.transcript
            .as_ref()
            .filter(|t| !t.is_null())
            .and_then(|t| serde_json::to_string(t).ok())
    }

    fn metrics(&self) -> CallMetrics {
        let analysis = self.call_analysis.clone().unwrap_or_default();
        // Retell reports cost either as a number or as `{ combined_cost }`
        let cost = self.cost.as_ref().and_then(|c| {
            c.as_f64().or_else(|| c.get("combined_cost").and_then(|v| v.as_f64()))
        });
        CallMetrics {
            quality_score: analysis.quality_score,
            sentiment_score: analysis.sentiment_score,
            latency_ms: analysis.latency_ms,
            interruptions_count: analysis.interruptions_count,
            cost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetellEventKind {
    Started,
    Ended,
    Analyzed,
}

impl RetellEventKind {
    fn parse(event: &str) -> Option<Self> {
        match event {
            "call_started" => Some(Self::Started),
            "call_ended" => Some(Self::Ended),
            "call_analyzed" => Some(Self::Analyzed),
            _ => None,
        }
    }

    fn webhook_event(&self) -> &'static str {
        match self {
            Self::Started => CALL_STARTED,
            Self::Ended => CALL_ENDED,
            Self::Analyzed => CALL_ANALYZED,
        }
    }
}

fn rejected(status: StatusCode, error: &str) -> Response {
    (status, Json(OperationResult::failed(error))).into_response()
}

pub async fn retell_call_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.config.retell_webhook_secret.as_deref() {
        let signature = headers
            .get(RETELL_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !signing::verify(secret, &body, signature) {
            tracing::warn!("Rejected Retell event with invalid signature");
            return rejected(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let payload: RetellEvent = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return rejected(StatusCode::BAD_REQUEST, &format!("Invalid payload: {}", e)),
    };
    tracing::info!("Received Retell event {}", payload.event);

    let Some(kind) = RetellEventKind::parse(&payload.event) else {
        tracing::warn!("Unknown Retell event: {}", payload.event);
        return Json(OperationResult::ok("Event processed")).into_response();
    };
    let Some(call) = payload.call else {
        return rejected(StatusCode::BAD_REQUEST, "Missing call payload");
    };

    match handle_retell_event(&state, kind, &call).await {
        Ok(()) => Json(OperationResult::ok("Event processed")).into_response(),
        Err(e) => {
            tracing::error!("Failed to process Retell {}: {}", payload.event, e);
            Json(OperationResult::failed(e.to_string())).into_response()
        }
    }
}

async fn handle_retell_event(
    state: &AppState,
    kind: RetellEventKind,
    payload: &RetellCallPayload,
) -> Result<(), sqlx::Error> {
    let agent = match payload.agent_id.as_deref() {
        Some(retell_agent_id) => db::agents::get_by_retell_id(&state.db, retell_agent_id).await?,
        None => None,
    };
    let Some(agent) = agent else {
        tracing::warn!("Ignoring Retell call {} for unknown agent {:?}", payload.call_id, payload.agent_id);
        return Ok(());
    };

    let call = match kind {
        RetellEventKind::Started => Some(
            db::calls::upsert_started(
                &state.db,
                agent.organization_id,
                agent.id,
                &payload.call_id,
                payload.direction(),
                payload.from_number.as_deref(),
                payload.to_number.as_deref(),
                payload.started_at(),
            )
            .await?,
        ),
        RetellEventKind::Ended => {
            db::calls::mark_ended(
                &state.db,
                &payload.call_id,
                payload.ended_at(),
                payload.duration_secs(),
                payload.transcript_json().as_deref(),
                payload.recording_url.as_deref(),
                payload.disconnect_reason.as_deref(),
            )
            .await?
        }
        RetellEventKind::Analyzed => db::calls::set_metrics(&state.db, &payload.call_id, &payload.metrics()).await?,
    };

    let Some(call) = call else {
        tracing::warn!("Retell call {} not found for {:?}", payload.call_id, kind);
        return Ok(());
    };
    tracing::info!("Call {} updated from Retell ({:?})", call.id, kind);

    let data = serde_json::to_value(&call).unwrap_or(serde_json::Value::Null);
    state
        .webhooks
        .notify(kind.webhook_event(), data, agent.organization_id)
        .await;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct TwilioStatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "Duration", alias = "CallDuration", default)]
    pub duration: Option<String>,
}

pub async fn twilio_call_status(
    State(state): State<Arc<AppState>>,
    Form(payload): Form<TwilioStatusCallback>,
) -> Json<OperationResult> {
    tracing::info!("Twilio status {} for {}", payload.call_status, payload.call_sid);
    let status = CallStatus::from_twilio(&payload.call_status);
    let duration = payload.duration.as_deref().and_then(|d| d.trim().parse().ok());

    Json(
        match db::calls::update_status_by_provider_id(&state.db, &payload.call_sid, status, duration).await {
            Ok(true) => OperationResult::ok("Status updated"),
            Ok(false) => {
                tracing::debug!("No call recorded for {}", payload.call_sid);
                OperationResult::ok("Call not tracked")
            }
            Err(e) => {
                tracing::error!("Failed to apply Twilio status: {}", e);
                OperationResult::failed(e.to_string())
            }
        },
    )
}

#[derive(Debug, Deserialize)]
pub struct TwilioIncomingCall {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
}

fn twiml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Greet the caller and hand the media stream to the Retell agent
pub fn connect_twiml(retell_agent_id: Option<&str>) -> String {
    let stream_url = format!("{}/{}", RETELL_STREAM_BASE, retell_agent_id.unwrap_or("default"));
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n  <Say>{}</Say>\n  <Connect>\n    <Stream url=\"{}\" />\n  </Connect>\n</Response>",
        xml_escape(GREETING),
        xml_escape(&stream_url)
    )
}

pub fn apology_twiml() -> String {
    format!("<Response><Say>{}</Say></Response>", xml_escape(APOLOGY))
}

pub async fn twilio_incoming_call(
    State(state): State<Arc<AppState>>,
    Form(payload): Form<TwilioIncomingCall>,
) -> Response {
    tracing::info!("Incoming call {} from {:?} to {:?}", payload.call_sid, payload.from, payload.to);

    match route_incoming_call(&state.db, &payload).await {
        Ok(agent) => twiml(connect_twiml(agent.as_ref().and_then(|a| a.retell_agent_id.as_deref()))),
        Err(e) => {
            tracing::error!("Failed to route incoming call {}: {}", payload.call_sid, e);
            twiml(apology_twiml())
        }
    }
}

/// Lookups needed to answer an incoming call
#[async_trait::async_trait]
pub trait InboundDirectory: Send + Sync {
    async fn number(&self, number: &str) -> Result<Option<PhoneNumber>, sqlx::Error>;

    async fn agent(&self, id: Uuid, organization_id: Uuid) -> Result<Option<Agent>, sqlx::Error>;

    /// Oldest active inbound agent of the organization
    async fn default_inbound_agent(&self, organization_id: Uuid) -> Result<Option<Agent>, sqlx::Error>;

    async fn record_inbound_call(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        payload: &TwilioIncomingCall,
    ) -> Result<Uuid, sqlx::Error>;
}

#[async_trait::async_trait]
impl InboundDirectory for PgPool {
    async fn number(&self, number: &str) -> Result<Option<PhoneNumber>, sqlx::Error> {
        db::phone_numbers::get_by_number(self, number).await
    }

    async fn agent(&self, id: Uuid, organization_id: Uuid) -> Result<Option<Agent>, sqlx::Error> {
        db::agents::get_by_id(self, id, organization_id).await
    }

    async fn default_inbound_agent(&self, organization_id: Uuid) -> Result<Option<Agent>, sqlx::Error> {
        db::agents::get_default_inbound(self, organization_id).await
    }

    async fn record_inbound_call(
        &self,
        organization_id: Uuid,
        agent_id: Uuid,
        payload: &TwilioIncomingCall,
    ) -> Result<Uuid, sqlx::Error> {
        let call = db::calls::create(
            self,
            organization_id,
            Some(agent_id),
            Some(&payload.call_sid),
            CallDirection::Inbound,
            payload.from.as_deref(),
            payload.to.as_deref(),
            Utc::now(),
        )
        .await?;
        Ok(call.id)
    }
}

/// Resolve the answering agent from the dialed number and record the call.
/// The number's own agent wins, then the organization's default inbound agent.
async fn route_incoming_call(
    directory: &dyn InboundDirectory,
    payload: &TwilioIncomingCall,
) -> Result<Option<Agent>, sqlx::Error> {
    let number = match payload.to.as_deref() {
        Some(to) => directory.number(to).await?,
        None => None,
    };
    let Some(number) = number else {
        tracing::warn!("No organization owns {:?}", payload.to);
        return Ok(None);
    };

    let assigned = match number.agent_id {
        Some(agent_id) => directory.agent(agent_id, number.organization_id).await?,
        None => None,
    };
    let agent = match assigned {
        Some(agent) => Some(agent),
        None => directory.default_inbound_agent(number.organization_id).await?,
    };

    if let Some(agent) = &agent {
        let call_id = directory
            .record_inbound_call(number.organization_id, agent.id, payload)
            .await?;
        tracing::info!("Inbound call {} routed to agent {}", call_id, agent.id);
    }
    Ok(agent)
}

#[derive(Debug, Deserialize)]
pub struct TwilioSms {
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "To", default)]
    pub to: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
}

pub async fn twilio_sms(Form(payload): Form<TwilioSms>) -> Response {
    tracing::info!(
        "SMS from {:?} to {:?} ({} chars)",
        payload.from,
        payload.to,
        payload.body.as_deref().map(str::len).unwrap_or(0)
    );
    twiml("<Response/>".to_string())
}

#[derive(Debug, Serialize)]
pub struct CustomAck {
    pub success: bool,
    pub message: String,
    #[serde(rename = "organizationId")]
    pub organization_id: Uuid,
    #[serde(rename = "receivedAt")]
    pub received_at: DateTime<Utc>,
}

pub async fn custom_ack(Path(organization_id): Path<Uuid>, body: Bytes) -> Json<CustomAck> {
    tracing::info!("Custom webhook for org {} ({} bytes)", organization_id, body.len());
    Json(CustomAck {
        success: true,
        message: "Custom webhook received".to_string(),
        organization_id,
        received_at: Utc::now(),
    })
}
