//! Zendesk Support adapter (API token basic auth)

use base64::Engine;
use reqwest::Client;
use serde_json::json;

use super::{
    credential, id_string, require, send_json, CallSnapshot, CreateLead, CreateTicket, CrmError,
    CrmKind, CrmProvider, CrmRecord, SyncCallOptions, TicketPriority,
};

pub struct ZendeskProvider {
    client: Client,
    base_url: String,
    authorization: String,
}

impl ZendeskProvider {
    pub fn from_credentials(client: Client, credentials: &serde_json::Value) -> Result<Self, CrmError> {
        let email = require(credential(credentials, "email", "ZENDESK_EMAIL"), "email")?;
        let api_token = require(credential(credentials, "apiToken", "ZENDESK_API_TOKEN"), "apiToken")?;

        let base_url = match credential(credentials, "baseUrl", "ZENDESK_BASE_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let subdomain = require(credential(credentials, "subdomain", "ZENDESK_SUBDOMAIN"), "subdomain")?;
                format!("https://{}.zendesk.com/api/v2", subdomain)
            }
        };

        Ok(Self {
            client,
            base_url,
            authorization: basic_token(&email, &api_token),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, CrmError> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", &self.authorization)
            .json(&body);
        send_json(request).await
    }

    fn ticket_record(response: &serde_json::Value) -> CrmRecord {
        CrmRecord {
            id: id_string(&response["ticket"]["id"]),
            success: true,
            data: response["ticket"].clone(),
        }
    }
}

/// `Basic base64(email/token:api_token)`
fn basic_token(email: &str, api_token: &str) -> String {
    let raw = format!("{}/token:{}", email, api_token);
    format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
}

fn zendesk_priority(priority: Option<TicketPriority>) -> &'static str {
    match priority {
        Some(TicketPriority::Low) => "low",
        Some(TicketPriority::High) => "high",
        Some(TicketPriority::Urgent) => "urgent",
        Some(TicketPriority::Medium) | None => "normal",
    }
}

#[async_trait::async_trait]
impl CrmProvider for ZendeskProvider {
    fn kind(&self) -> CrmKind {
        CrmKind::Zendesk
    }

    /// Zendesk has no leads; callers become end users
    async fn create_lead(&self, lead: &CreateLead) -> Result<CrmRecord, CrmError> {
        let response = self
            .post("/users", json!({
                "user": {
                    "name": format!("{} {}", lead.first_name, lead.last_name),
                    "email": lead.email,
                    "phone": lead.phone,
                    "user_fields": {
                        "call_id": lead.call_id,
                        "source": lead.source.as_deref().unwrap_or("AI Phone Call"),
                    },
                }
            }))
            .await?;

        let record = CrmRecord {
            id: id_string(&response["user"]["id"]),
            success: true,
            data: response["user"].clone(),
        };
        tracing::info!("User created in Zendesk: {}", record.id);
        Ok(record)
    }

    async fn create_ticket(&self, ticket: &CreateTicket) -> Result<CrmRecord, CrmError> {
        let mut body = json!({
            "ticket": {
                "subject": ticket.subject,
                "comment": { "body": ticket.description },
                "priority": zendesk_priority(ticket.priority),
                "status": ticket.status.as_deref().unwrap_or("new"),
                "type": "problem",
                "tags": ["ai-call", "retell-ai"],
                "external_id": ticket.call_id,
            }
        });
        if let Some(email) = &ticket.customer_email {
            body["ticket"]["requester"] = json!({ "email": email, "phone": ticket.customer_phone });
        }

        let response = self.post("/tickets", body).await?;
        let record = Self::ticket_record(&response);
        tracing::info!("Ticket created in Zendesk: {}", record.id);
        Ok(record)
    }

    async fn sync_call(&self, snapshot: &CallSnapshot, options: &SyncCallOptions) -> Result<CrmRecord, CrmError> {
        let call = &snapshot.call;
        let started = call.started_at.unwrap_or(call.created_at);
        let response = self
            .post("/tickets", json!({
                "ticket": {
                    "subject": format!("AI Call Log - {}", started.format("%Y-%m-%d %H:%M UTC")),
                    "comment": { "body": snapshot.summary(options), "public": false },
                    "type": "task",
                    "status": "solved",
                    "tags": ["ai-call", "auto-generated"],
                    "external_id": call.id,
                }
            }))
            .await?;

        let record = Self::ticket_record(&response);
        tracing::info!("Call ticket created in Zendesk: {}", record.id);
        Ok(record)
    }

    async fn test_connection(&self) -> Result<serde_json::Value, CrmError> {
        let request = self
            .client
            .get(format!("{}/tickets/count", self.base_url))
            .header("Authorization", &self.authorization);
        let response = send_json(request).await?;
        Ok(json!({ "connected": true, "ticketCount": response["count"]["value"] }))
    }
}
