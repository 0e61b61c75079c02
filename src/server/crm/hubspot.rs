//! HubSpot adapter (private app bearer token, CRM v3 objects)

use reqwest::Client;
use serde_json::json;

use super::{
    credential, id_string, require, send_json, CallSnapshot, CreateLead, CreateTicket, CrmError,
    CrmKind, CrmProvider, CrmRecord, SyncCallOptions,
};

const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

pub struct HubspotProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HubspotProvider {
    pub fn from_credentials(client: Client, credentials: &serde_json::Value) -> Result<Self, CrmError> {
        Ok(Self {
            client,
            api_key: require(credential(credentials, "apiKey", "HUBSPOT_API_KEY"), "apiKey")?,
            base_url: credential(credentials, "baseUrl", "HUBSPOT_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn create_object(&self, object: &str, properties: serde_json::Value) -> Result<serde_json::Value, CrmError> {
        let request = self
            .client
            .post(format!("{}/crm/v3/objects/{}", self.base_url, object))
            .bearer_auth(&self.api_key)
            .json(&json!({ "properties": properties }));
        send_json(request).await
    }

    /// Attach a note to a contact
    async fn create_note(&self, contact_id: &str, body: &str) -> Result<(), CrmError> {
        let note = self
            .create_object("notes", json!({
                "hs_note_body": body,
                "hs_timestamp": chrono::Utc::now().to_rfc3339(),
            }))
            .await?;
        let note_id = id_string(&note["id"]);

        let request = self
            .client
            .put(format!(
                "{}/crm/v3/objects/notes/{}/associations/contact/{}/note_to_contact",
                self.base_url, note_id, contact_id
            ))
            .bearer_auth(&self.api_key);
        send_json(request).await?;
        Ok(())
    }

    fn record(response: &serde_json::Value) -> CrmRecord {
        CrmRecord {
            id: id_string(&response["id"]),
            success: true,
            data: response["properties"].clone(),
        }
    }
}

#[async_trait::async_trait]
impl CrmProvider for HubspotProvider {
    fn kind(&self) -> CrmKind {
        CrmKind::Hubspot
    }

    async fn create_lead(&self, lead: &CreateLead) -> Result<CrmRecord, CrmError> {
        let response = self
            .create_object("contacts", json!({
                "firstname": lead.first_name,
                "lastname": lead.last_name,
                "email": lead.email,
                "phone": lead.phone,
                "company": lead.company,
                "hs_lead_status": "NEW",
                "lifecyclestage": "lead",
                "call_id": lead.call_id,
            }))
            .await?;
        let record = Self::record(&response);
        tracing::info!("Contact created in HubSpot: {}", record.id);

        if let Some(notes) = lead.notes.as_deref().filter(|n| !n.is_empty()) {
            self.create_note(&record.id, notes).await?;
        }
        Ok(record)
    }

    async fn create_ticket(&self, ticket: &CreateTicket) -> Result<CrmRecord, CrmError> {
        let response = self
            .create_object("tickets", json!({
                "subject": ticket.subject,
                "content": ticket.description,
                "hs_pipeline_stage": "1",
                "hs_ticket_priority": ticket.priority.unwrap_or_default().as_str().to_uppercase(),
                "source_type": "PHONE",
                "call_id": ticket.call_id,
            }))
            .await?;
        let record = Self::record(&response);
        tracing::info!("Ticket created in HubSpot: {}", record.id);
        Ok(record)
    }

    async fn sync_call(&self, snapshot: &CallSnapshot, options: &SyncCallOptions) -> Result<CrmRecord, CrmError> {
        let call = &snapshot.call;
        let response = self
            .create_object("calls", json!({
                "hs_timestamp": call.started_at.unwrap_or(call.created_at).to_rfc3339(),
                "hs_call_title": format!("AI Call - {}", snapshot.agent_name),
                "hs_call_body": snapshot.summary(options),
                "hs_call_from_number": call.from_number,
                "hs_call_to_number": call.to_number,
                "hs_call_duration": i64::from(call.duration.unwrap_or(0)) * 1000,
                "hs_call_status": "COMPLETED",
                "hs_call_recording_url": call.recording_url,
                "call_id": call.id,
            }))
            .await?;
        let record = Self::record(&response);
        tracing::info!("Call engagement created in HubSpot: {}", record.id);
        Ok(record)
    }

    async fn test_connection(&self) -> Result<serde_json::Value, CrmError> {
        let request = self
            .client
            .get(format!("{}/crm/v3/objects/contacts", self.base_url))
            .query(&[("limit", "1")])
            .bearer_auth(&self.api_key);
        let response = send_json(request).await?;
        Ok(json!({ "connected": true, "recordCount": response["total"] }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::crm::TicketPriority;
    use mockito::Matcher;

    fn provider(base_url: &str) -> HubspotProvider {
        HubspotProvider::from_credentials(Client::new(), &json!({"apiKey": "pat-1", "baseUrl": base_url})).unwrap()
    }

    #[tokio::test]
    async fn test_create_ticket_uppercases_priority() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/crm/v3/objects/tickets")
            .match_header("authorization", "Bearer pat-1")
            .match_body(Matcher::PartialJson(json!({"properties": {"hs_ticket_priority": "HIGH", "source_type": "PHONE"}})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"901","properties":{"subject":"Refund"}}"#)
            .create_async()
            .await;

        let record = provider(&server.url())
            .create_ticket(&CreateTicket {
                subject: "Refund".to_string(),
                description: "Customer wants a refund".to_string(),
                priority: Some(TicketPriority::High),
                status: None,
                call_id: None,
                customer_email: None,
                customer_phone: None,
            })
            .await
            .unwrap();

        assert_eq!(record.id, "901");
        assert_eq!(record.data["subject"], "Refund");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_lead_with_notes_associates_note() {
        let mut server = mockito::Server::new_async().await;
        let contact = server
            .mock("POST", "/crm/v3/objects/contacts")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"51","properties":{}}"#)
            .create_async()
            .await;
        let note = server
            .mock("POST", "/crm/v3/objects/notes")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"77","properties":{}}"#)
            .create_async()
            .await;
        let association = server
            .mock("PUT", "/crm/v3/objects/notes/77/associations/contact/51/note_to_contact")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        provider(&server.url())
            .create_lead(&CreateLead {
                first_name: "Ana".to_string(),
                last_name: "Souza".to_string(),
                email: Some("ana@acme.test".to_string()),
                phone: "+5511999990000".to_string(),
                company: Some("Acme".to_string()),
                source: None,
                call_id: None,
                notes: Some("Interested in the annual plan".to_string()),
            })
            .await
            .unwrap();

        contact.assert_async().await;
        note.assert_async().await;
        association.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_reports_total() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/crm/v3/objects/contacts")
            .match_query(Matcher::UrlEncoded("limit".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"total":42,"results":[]}"#)
            .create_async()
            .await;

        let details = provider(&server.url()).test_connection().await.unwrap();
        assert_eq!(details["connected"], true);
        assert_eq!(details["recordCount"], 42);
    }
}
