//! Salesforce adapter (OAuth password grant, REST sobjects)

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{
    credential, id_string, require, send_json, CallSnapshot, CreateLead, CreateTicket, CrmError,
    CrmKind, CrmProvider, CrmRecord, SyncCallOptions, TicketPriority,
};

const API_VERSION: &str = "v57.0";
const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SalesforceSession {
    pub access_token: String,
    pub instance_url: String,
}

/// Access tokens keyed by `client_id:username`, shared across requests
#[derive(Clone, Default)]
pub struct SessionCache(Arc<Mutex<HashMap<String, SalesforceSession>>>);

pub struct SalesforceProvider {
    client: Client,
    login_url: String,
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
    security_token: String,
    sessions: SessionCache,
}

impl SalesforceProvider {
    pub fn from_credentials(
        client: Client,
        credentials: &serde_json::Value,
        sessions: SessionCache,
    ) -> Result<Self, CrmError> {
        Ok(Self {
            client,
            login_url: credential(credentials, "loginUrl", "SALESFORCE_LOGIN_URL")
                .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client_id: require(credential(credentials, "clientId", "SALESFORCE_CLIENT_ID"), "clientId")?,
            client_secret: require(credential(credentials, "clientSecret", "SALESFORCE_CLIENT_SECRET"), "clientSecret")?,
            username: require(credential(credentials, "username", "SALESFORCE_USERNAME"), "username")?,
            password: require(credential(credentials, "password", "SALESFORCE_PASSWORD"), "password")?,
            security_token: credential(credentials, "securityToken", "SALESFORCE_SECURITY_TOKEN").unwrap_or_default(),
            sessions,
        })
    }

    fn cache_key(&self) -> String {
        format!("{}:{}", self.client_id, self.username)
    }

    async fn authenticate(&self) -> Result<SalesforceSession, CrmError> {
        let password = format!("{}{}", self.password, self.security_token);
        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", self.username.as_str()),
            ("password", password.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/services/oauth2/token", self.login_url))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CrmError::Api { status: status.as_u16(), message });
        }

        let session: SalesforceSession = response.json().await?;
        tracing::info!("Salesforce authentication successful");
        self.sessions.0.lock().await.insert(self.cache_key(), session.clone());
        Ok(session)
    }

    async fn session(&self) -> Result<SalesforceSession, CrmError> {
        if let Some(session) = self.sessions.0.lock().await.get(&self.cache_key()) {
            return Ok(session.clone());
        }
        self.authenticate().await
    }

    /// POST an sobject, re-authenticating once if the cached token expired
    async fn create_sobject(&self, sobject: &str, body: &serde_json::Value) -> Result<serde_json::Value, CrmError> {
        let session = self.session().await?;
        let result = self.post_sobject(&session, sobject, body).await;

        match result {
            Err(CrmError::Api { status: 401, .. }) => {
                self.sessions.0.lock().await.remove(&self.cache_key());
                let session = self.authenticate().await?;
                self.post_sobject(&session, sobject, body).await
            }
            other => other,
        }
    }

    async fn post_sobject(
        &self,
        session: &SalesforceSession,
        sobject: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, CrmError> {
        let request = self
            .client
            .post(format!("{}/services/data/{}/sobjects/{}", session.instance_url, API_VERSION, sobject))
            .bearer_auth(&session.access_token)
            .json(body);
        send_json(request).await
    }

    fn record(response: serde_json::Value, payload: serde_json::Value) -> CrmRecord {
        CrmRecord {
            id: id_string(&response["id"]),
            success: response["success"].as_bool().unwrap_or(true),
            data: payload,
        }
    }
}

fn priority_label(priority: TicketPriority) -> &'static str {
    match priority {
        TicketPriority::Low => "Low",
        TicketPriority::Medium => "Medium",
        TicketPriority::High => "High",
        TicketPriority::Urgent => "Urgent",
    }
}

#[async_trait::async_trait]
impl CrmProvider for SalesforceProvider {
    fn kind(&self) -> CrmKind {
        CrmKind::Salesforce
    }

    async fn create_lead(&self, lead: &CreateLead) -> Result<CrmRecord, CrmError> {
        let payload = json!({
            "FirstName": lead.first_name,
            "LastName": lead.last_name,
            "Email": lead.email,
            "Phone": lead.phone,
            "Company": lead.company.as_deref().unwrap_or("Unknown"),
            "LeadSource": lead.source.as_deref().unwrap_or("AI Phone Call"),
            "Description": lead.notes,
            "Call_ID__c": lead.call_id,
        });
        let response = self.create_sobject("Lead", &payload).await?;
        let record = Self::record(response, payload);
        tracing::info!("Lead created in Salesforce: {}", record.id);
        Ok(record)
    }

    async fn create_ticket(&self, ticket: &CreateTicket) -> Result<CrmRecord, CrmError> {
        let payload = json!({
            "Subject": ticket.subject,
            "Description": ticket.description,
            "Priority": priority_label(ticket.priority.unwrap_or_default()),
            "Status": ticket.status.as_deref().unwrap_or("New"),
            "Origin": "AI Phone Call",
            "SuppliedEmail": ticket.customer_email,
            "SuppliedPhone": ticket.customer_phone,
            "Call_ID__c": ticket.call_id,
        });
        let response = self.create_sobject("Case", &payload).await?;
        let record = Self::record(response, payload);
        tracing::info!("Case created in Salesforce: {}", record.id);
        Ok(record)
    }

    async fn sync_call(&self, snapshot: &CallSnapshot, options: &SyncCallOptions) -> Result<CrmRecord, CrmError> {
        let call = &snapshot.call;
        let activity_date = call
            .started_at
            .unwrap_or(call.created_at)
            .format("%Y-%m-%d")
            .to_string();
        let payload = json!({
            "Subject": format!("AI Call with {}", call.from_number.as_deref().unwrap_or("unknown caller")),
            "ActivityDate": activity_date,
            "Status": "Completed",
            "Priority": "Normal",
            "Description": snapshot.summary(options),
            "Call_ID__c": call.id,
            "Recording_URL__c": call.recording_url,
        });
        let response = self.create_sobject("Task", &payload).await?;
        let record = Self::record(response, payload);
        tracing::info!("Task created in Salesforce: {}", record.id);
        Ok(record)
    }

    async fn test_connection(&self) -> Result<serde_json::Value, CrmError> {
        let session = self.authenticate().await?;
        let request = self
            .client
            .get(format!("{}/services/data/{}/query", session.instance_url, API_VERSION))
            .query(&[("q", "SELECT Id FROM Account LIMIT 1")])
            .bearer_auth(&session.access_token);
        let response = send_json(request).await?;

        Ok(json!({
            "connected": true,
            "instanceUrl": session.instance_url,
            "recordCount": response["totalSize"],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn provider(login_url: &str, sessions: SessionCache) -> SalesforceProvider {
        SalesforceProvider::from_credentials(
            Client::new(),
            &json!({
                "loginUrl": login_url,
                "clientId": "cid",
                "clientSecret": "csecret",
                "username": "ops@acme.test",
                "password": "pw",
                "securityToken": "TOK"
            }),
            sessions,
        )
        .unwrap()
    }

    #[test]
    fn test_missing_credentials() {
        let result = SalesforceProvider::from_credentials(
            Client::new(),
            &json!({"clientId": "cid"}),
            SessionCache::default(),
        );
        assert!(matches!(result, Err(CrmError::MissingCredential(_))));
    }

    #[tokio::test]
    async fn test_create_lead_authenticates_once() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/services/oauth2/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "password".into()),
                Matcher::UrlEncoded("password".into(), "pwTOK".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"access_token":"sf-token","instance_url":"{}"}}"#, server.url()))
            .expect(1)
            .create_async()
            .await;
        let lead = server
            .mock("POST", "/services/data/v57.0/sobjects/Lead")
            .match_header("authorization", "Bearer sf-token")
            .match_body(Matcher::PartialJson(json!({"Company": "Unknown", "LeadSource": "AI Phone Call"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"00Q5e000001","success":true,"errors":[]}"#)
            .expect(2)
            .create_async()
            .await;

        let sessions = SessionCache::default();
        let sf = provider(&server.url(), sessions.clone());
        let request = CreateLead {
            first_name: "Ana".to_string(),
            last_name: "Souza".to_string(),
            email: None,
            phone: "+5511999990000".to_string(),
            company: None,
            source: None,
            call_id: None,
            notes: None,
        };

        let record = sf.create_lead(&request).await.unwrap();
        assert_eq!(record.id, "00Q5e000001");
        assert!(record.success);

        // second adapter instance reuses the cached session
        provider(&server.url(), sessions).create_lead(&request).await.unwrap();

        token.assert_async().await;
        lead.assert_async().await;
    }

    #[test]
    fn test_ticket_priority_label() {
        assert_eq!(priority_label(TicketPriority::default()), "Medium");
        assert_eq!(priority_label(TicketPriority::Urgent), "Urgent");
    }
}
