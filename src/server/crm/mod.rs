//! CRM integrations
//!
//! Each vendor implements [`CrmProvider`]; [`CrmService`] picks the adapter,
//! resolves credentials and records every action in `crm_activities`.

pub mod salesforce;
pub mod hubspot;
pub mod zendesk;

use std::str::FromStr;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Activity, ActivityFilter, Agent, Call, ConnectionTest, Integration};
use crate::server::db::{self, activities::ActivityLog};

pub use hubspot::HubspotProvider;
pub use salesforce::{SalesforceProvider, SessionCache};
pub use zendesk::ZendeskProvider;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("Unsupported CRM provider: {0}")]
    UnsupportedProvider(String),
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("Call not found")]
    CallNotFound,
    #[error("Connection test failed: {0}")]
    ConnectionFailed(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrmKind {
    Salesforce,
    Hubspot,
    Zendesk,
}

impl CrmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrmKind::Salesforce => "salesforce",
            CrmKind::Hubspot => "hubspot",
            CrmKind::Zendesk => "zendesk",
        }
    }
}

impl FromStr for CrmKind {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "salesforce" => Ok(CrmKind::Salesforce),
            "hubspot" => Ok(CrmKind::Hubspot),
            "zendesk" => Ok(CrmKind::Zendesk),
            other => Err(CrmError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLead {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub company: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "callId")]
    pub call_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicket {
    pub subject: String,
    pub description: String,
    pub priority: Option<TicketPriority>,
    pub status: Option<String>,
    #[serde(rename = "callId")]
    pub call_id: Option<Uuid>,
    #[serde(rename = "customerEmail")]
    pub customer_email: Option<String>,
    #[serde(rename = "customerPhone")]
    pub customer_phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncCallOptions {
    #[serde(rename = "callId")]
    pub call_id: Uuid,
    #[serde(rename = "syncTranscript", default)]
    pub sync_transcript: bool,
    #[serde(rename = "syncRecording", default)]
    pub sync_recording: bool,
    #[serde(rename = "syncAnalytics", default)]
    pub sync_analytics: bool,
}

/// Call plus the name of the agent that handled it
#[derive(Debug, Clone)]
pub struct CallSnapshot {
    pub call: Call,
    pub agent_name: String,
}

impl CallSnapshot {
    pub fn new(call: Call, agent: Option<Agent>) -> Self {
        let agent_name = agent.map(|a| a.name).unwrap_or_else(|| "Unknown agent".to_string());
        Self { call, agent_name }
    }

    /// Plain-text body shared by every adapter's call log entry
    pub fn summary(&self, options: &SyncCallOptions) -> String {
        let call = &self.call;
        let mut lines = vec![
            format!("Agent: {}", self.agent_name),
            format!("Duration: {}s", call.duration.unwrap_or(0)),
            format!("From: {}", call.from_number.as_deref().unwrap_or("N/A")),
            format!("To: {}", call.to_number.as_deref().unwrap_or("N/A")),
        ];

        if options.sync_analytics {
            let score = |v: Option<f64>| v.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "N/A".to_string());
            lines.push(format!("Sentiment: {}", score(call.sentiment_score)));
            lines.push(format!("Quality: {}", score(call.quality_score)));
        }
        if options.sync_recording {
            if let Some(url) = &call.recording_url {
                lines.push(format!("Recording: {}", url));
            }
        }
        if options.sync_transcript {
            if let Some(transcript) = &call.transcript {
                lines.push(String::new());
                lines.push(format!("Transcript:\n{}", transcript));
            }
        }

        lines.join("\n")
    }
}

/// Result of a write against the vendor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrmRecord {
    pub id: String,
    pub success: bool,
    pub data: serde_json::Value,
}

#[async_trait::async_trait]
pub trait CrmProvider: Send + Sync {
    fn kind(&self) -> CrmKind;

    async fn create_lead(&self, lead: &CreateLead) -> Result<CrmRecord, CrmError>;

    async fn create_ticket(&self, ticket: &CreateTicket) -> Result<CrmRecord, CrmError>;

    async fn sync_call(&self, call: &CallSnapshot, options: &SyncCallOptions) -> Result<CrmRecord, CrmError>;

    /// Details merged into the `{ success, provider, ... }` report
    async fn test_connection(&self) -> Result<serde_json::Value, CrmError>;
}

/// Credential lookup: explicit JSON first, then the environment
pub(crate) fn credential(credentials: &serde_json::Value, key: &str, env_key: &str) -> Option<String> {
    credentials
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(env_key).ok().filter(|v| !v.is_empty()))
}

pub(crate) fn require(value: Option<String>, name: &'static str) -> Result<String, CrmError> {
    value.ok_or(CrmError::MissingCredential(name))
}

/// Send a request and decode a JSON body, mapping non-2xx to [`CrmError::Api`]
pub(crate) async fn send_json(request: RequestBuilder) -> Result<serde_json::Value, CrmError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(CrmError::Api { status: status.as_u16(), message });
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| CrmError::Api {
        status: status.as_u16(),
        message: format!("Invalid JSON response: {}", e),
    })
}

/// Vendor ids come back as strings or numbers
pub(crate) fn id_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Orchestrates CRM adapters for an organization
#[derive(Clone)]
pub struct CrmService {
    pool: PgPool,
    http: Client,
    salesforce_sessions: SessionCache,
}

impl CrmService {
    pub fn new(pool: PgPool, http: Client) -> Self {
        Self {
            pool,
            http,
            salesforce_sessions: SessionCache::default(),
        }
    }

    /// Build an adapter from explicit credentials with env fallback
    pub fn provider(&self, kind: CrmKind, credentials: &serde_json::Value) -> Result<Box<dyn CrmProvider>, CrmError> {
        Ok(match kind {
            CrmKind::Salesforce => Box::new(SalesforceProvider::from_credentials(
                self.http.clone(),
                credentials,
                self.salesforce_sessions.clone(),
            )?),
            CrmKind::Hubspot => Box::new(HubspotProvider::from_credentials(self.http.clone(), credentials)?),
            CrmKind::Zendesk => Box::new(ZendeskProvider::from_credentials(self.http.clone(), credentials)?),
        })
    }

    async fn provider_for_org(&self, organization_id: Uuid, kind: CrmKind) -> Result<Box<dyn CrmProvider>, CrmError> {
        let stored = db::integrations::get(&self.pool, organization_id, kind.as_str()).await?;
        let credentials = stored
            .map(|Integration { credentials, .. }| credentials.0)
            .unwrap_or(serde_json::Value::Null);
        self.provider(kind, &credentials)
    }

    async fn record(
        &self,
        organization_id: Uuid,
        kind: CrmKind,
        activity_type: &str,
        call_id: Option<Uuid>,
        record: &CrmRecord,
    ) -> Result<(), CrmError> {
        let metadata = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
        db::activities::record(
            &self.pool,
            ActivityLog::Crm,
            organization_id,
            kind.as_str(),
            activity_type,
            call_id,
            Some(&record.id),
            metadata,
        )
        .await?;
        Ok(())
    }

    pub async fn create_lead(&self, organization_id: Uuid, kind: CrmKind, lead: &CreateLead) -> Result<CrmRecord, CrmError> {
        tracing::info!("Creating lead in {} for org {}", kind.as_str(), organization_id);
        let provider = self.provider_for_org(organization_id, kind).await?;
        let record = provider.create_lead(lead).await?;
        self.record(organization_id, kind, "lead_created", lead.call_id, &record).await?;
        Ok(record)
    }

    pub async fn create_ticket(&self, organization_id: Uuid, kind: CrmKind, ticket: &CreateTicket) -> Result<CrmRecord, CrmError> {
        tracing::info!("Creating ticket in {} for org {}", kind.as_str(), organization_id);
        let provider = self.provider_for_org(organization_id, kind).await?;
        let record = provider.create_ticket(ticket).await?;
        self.record(organization_id, kind, "ticket_created", ticket.call_id, &record).await?;
        Ok(record)
    }

    pub async fn sync_call(&self, organization_id: Uuid, kind: CrmKind, options: &SyncCallOptions) -> Result<CrmRecord, CrmError> {
        tracing::info!("Syncing call {} to {}", options.call_id, kind.as_str());
        let call = db::calls::get_by_id(&self.pool, options.call_id, organization_id)
            .await?
            .ok_or(CrmError::CallNotFound)?;
        let agent = match call.agent_id {
            Some(agent_id) => db::agents::get_by_id(&self.pool, agent_id, organization_id).await?,
            None => None,
        };

        let provider = self.provider_for_org(organization_id, kind).await?;
        let record = provider.sync_call(&CallSnapshot::new(call, agent), options).await?;
        self.record(organization_id, kind, "call_synced", Some(options.call_id), &record).await?;
        Ok(record)
    }

    pub async fn test_connection(&self, kind: CrmKind, credentials: &serde_json::Value) -> ConnectionTest {
        let result = match self.provider(kind, credentials) {
            Ok(provider) => provider.test_connection().await,
            Err(e) => Err(e),
        };
        connection_report(kind.as_str(), result)
    }

    pub async fn list_activities(&self, organization_id: Uuid, filter: &ActivityFilter) -> Result<Vec<Activity>, CrmError> {
        Ok(db::activities::list(&self.pool, ActivityLog::Crm, organization_id, filter).await?)
    }

    /// Enabled integrations must pass a connection test before they are stored
    pub async fn configure(
        &self,
        organization_id: Uuid,
        kind: CrmKind,
        enabled: bool,
        credentials: serde_json::Value,
        settings: Option<serde_json::Value>,
    ) -> Result<Integration, CrmError> {
        if enabled {
            let report = self.test_connection(kind, &credentials).await;
            if !report.success {
                return Err(CrmError::ConnectionFailed(report.error.unwrap_or_default()));
            }
        }

        let settings = settings.unwrap_or_else(|| serde_json::json!({}));
        Ok(db::integrations::upsert(&self.pool, organization_id, kind.as_str(), enabled, credentials, settings).await?)
    }
}

/// Fold an adapter result into the uniform connection report
pub fn connection_report<E: std::fmt::Display>(
    provider: &str,
    result: Result<serde_json::Value, E>,
) -> ConnectionTest {
    match result {
        Ok(details) => ConnectionTest {
            success: true,
            provider: provider.to_string(),
            error: None,
            details: Some(details).filter(|d| d.is_object()),
        },
        Err(e) => {
            tracing::warn!("Connection test failed for {}: {}", provider, e);
            ConnectionTest {
                success: false,
                provider: provider.to_string(),
                error: Some(e.to_string()),
                details: None,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use crate::models::{Call, CallDirection, CallStatus};
    use uuid::Uuid;

    pub fn call() -> Call {
        Call {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            agent_id: None,
            retell_call_id: Some("call_abc".to_string()),
            direction: CallDirection::Inbound,
            status: CallStatus::Ended,
            from_number: Some("+15550001111".to_string()),
            to_number: Some("+15550002222".to_string()),
            started_at: Some(Utc::now()),
            ended_at: Some(Utc::now()),
            duration: Some(95),
            transcript: Some("Agent: Hello\nUser: Hi".to_string()),
            recording_url: Some("https://recordings.example.com/call_abc.wav".to_string()),
            disconnect_reason: Some("user_hangup".to_string()),
            quality_score: Some(0.91),
            sentiment_score: Some(0.4),
            latency_ms: Some(800),
            interruptions_count: Some(1),
            cost: Some(0.12),
            created_at: Utc::now(),
        }
    }
}
