//! Retell voice AI API client

use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetellError {
    #[error("Retell API key not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Retell keys are issued with this prefix; anything else is treated as absent
pub const API_KEY_PREFIX: &str = "key_";

#[derive(Clone)]
pub struct RetellClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    llm_websocket_base: String,
}

impl RetellClient {
    pub fn new(client: Client, api_key: Option<String>, base_url: &str, llm_websocket_base: &str) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            llm_websocket_base: llm_websocket_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| k.starts_with(API_KEY_PREFIX))
    }

    fn key(&self) -> Result<&str, RetellError> {
        match self.api_key.as_deref() {
            Some(k) if k.starts_with(API_KEY_PREFIX) => Ok(k),
            _ => Err(RetellError::NotConfigured),
        }
    }

    async fn request<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> Result<R, RetellError> {
        let key = self.key()?;
        let mut request = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", key));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetellError::Api { status: status.as_u16(), message });
        }

        // delete-agent answers 204 with no body
        let text = response.text().await?;
        let value: serde_json::Value = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| RetellError::Api {
                status: status.as_u16(),
                message: format!("Invalid response body: {}", e),
            })?
        };
        serde_json::from_value(value).map_err(|e| RetellError::Api {
            status: status.as_u16(),
            message: format!("Unexpected response shape: {}", e),
        })
    }

    /// Websocket the Retell agent streams LLM turns through
    pub fn llm_websocket_url(&self, llm_provider: &str) -> String {
        let route = match llm_provider {
            "openai" | "anthropic" => llm_provider,
            _ => "custom",
        };
        format!("{}/{}", self.llm_websocket_base, route)
    }

    pub async fn create_agent(&self, params: &CreateRetellAgent) -> Result<RetellAgent, RetellError> {
        let request = CreateAgentBody {
            agent_name: &params.name,
            voice_id: &params.voice_id,
            response_engine: ResponseEngine {
                engine_type: "custom-llm",
                llm_websocket_url: self.llm_websocket_url(&params.llm_provider),
            },
            begin_message: params.first_message.as_deref(),
            general_prompt: &params.system_prompt,
            interruption_sensitivity: params.interrupt_sens,
            responsiveness: params.response_delay.map(responsiveness_from_delay),
        };
        self.request(Method::POST, "/create-agent", Some(&request)).await
    }

    pub async fn list_agents(&self) -> Result<Vec<RetellAgent>, RetellError> {
        self.request::<(), _>(Method::GET, "/list-agents", None).await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<RetellAgent, RetellError> {
        self.request::<(), _>(Method::GET, &format!("/get-agent/{}", agent_id), None).await
    }

    pub async fn delete_agent(&self, agent_id: &str) -> Result<(), RetellError> {
        let _: serde_json::Value = self
            .request::<(), _>(Method::DELETE, &format!("/delete-agent/{}", agent_id), None)
            .await?;
        Ok(())
    }

    /// Place an outbound call driven by a Retell agent
    pub async fn create_phone_call(&self, params: &CreatePhoneCall) -> Result<RetellCall, RetellError> {
        self.request(Method::POST, "/v2/create-phone-call", Some(params)).await
    }
}

/// Retell measures responsiveness on 0..=1; slower configured replies map lower
fn responsiveness_from_delay(delay_ms: i32) -> f64 {
    (1.0 - f64::from(delay_ms.max(0)) / 1000.0).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateRetellAgent {
    pub name: String,
    #[serde(rename = "voiceId")]
    pub voice_id: String,
    #[serde(rename = "llmProvider", default = "default_llm_provider")]
    pub llm_provider: String,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(rename = "firstMessage")]
    pub first_message: Option<String>,
    #[serde(rename = "interruptSens")]
    pub interrupt_sens: Option<f64>,
    #[serde(rename = "responseDelay")]
    pub response_delay: Option<i32>,
}

fn default_llm_provider() -> String {
    crate::models::DEFAULT_LLM_PROVIDER.to_string()
}

#[derive(Serialize)]
struct CreateAgentBody<'a> {
    agent_name: &'a str,
    voice_id: &'a str,
    response_engine: ResponseEngine,
    #[serde(skip_serializing_if = "Option::is_none")]
    begin_message: Option<&'a str>,
    general_prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    interruption_sensitivity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    responsiveness: Option<f64>,
}

#[derive(Serialize)]
struct ResponseEngine {
    #[serde(rename = "type")]
    engine_type: &'static str,
    llm_websocket_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetellAgent {
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub last_modification_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreatePhoneCall {
    pub from_number: String,
    pub to_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retell_llm_dynamic_variables: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetellCall {
    pub call_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub call_status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str, key: Option<&str>) -> RetellClient {
        RetellClient::new(Client::new(), key.map(String::from), base_url, "wss://llm.example.com/llm-websocket")
    }

    #[test]
    fn test_llm_websocket_url_by_provider() {
        let retell = client("http://unused", None);
        assert_eq!(retell.llm_websocket_url("openai"), "wss://llm.example.com/llm-websocket/openai");
        assert_eq!(retell.llm_websocket_url("anthropic"), "wss://llm.example.com/llm-websocket/anthropic");
        assert_eq!(retell.llm_websocket_url("groq"), "wss://llm.example.com/llm-websocket/custom");
    }

    #[test]
    fn test_responsiveness_from_delay() {
        assert_eq!(responsiveness_from_delay(0), 1.0);
        assert!((responsiveness_from_delay(100) - 0.9).abs() < 1e-9);
        assert_eq!(responsiveness_from_delay(5000), 0.0);
    }

    #[tokio::test]
    async fn test_requires_key_prefix() {
        let retell = client("http://unused", Some("sk-wrong"));
        assert!(!retell.is_configured());
        assert!(matches!(retell.list_agents().await, Err(RetellError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_create_agent_posts_custom_llm() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/create-agent")
            .match_header("authorization", "Bearer key_test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "agent_name": "Support",
                "voice_id": "11labs-Adrian",
                "response_engine": {
                    "type": "custom-llm",
                    "llm_websocket_url": "wss://llm.example.com/llm-websocket/openai"
                }
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"agent_id":"ag_123","agent_name":"Support","voice_id":"11labs-Adrian"}"#)
            .create_async()
            .await;

        let retell = client(&server.url(), Some("key_test"));
        let agent = retell
            .create_agent(&CreateRetellAgent {
                name: "Support".to_string(),
                voice_id: "11labs-Adrian".to_string(),
                llm_provider: "openai".to_string(),
                system_prompt: "Be helpful".to_string(),
                first_message: Some("Hi!".to_string()),
                interrupt_sens: Some(0.5),
                response_delay: Some(100),
            })
            .await
            .unwrap();

        assert_eq!(agent.agent_id, "ag_123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_carries_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/get-agent/missing")
            .with_status(404)
            .with_body("agent not found")
            .create_async()
            .await;

        let retell = client(&server.url(), Some("key_test"));
        match retell.get_agent("missing").await {
            Err(RetellError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "agent not found");
            }
            other => panic!("unexpected result: {:?}", other.map(|a| a.agent_id)),
        }
    }

    #[tokio::test]
    async fn test_delete_agent_accepts_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/delete-agent/ag_1")
            .with_status(204)
            .create_async()
            .await;

        let retell = client(&server.url(), Some("key_test"));
        retell.delete_agent("ag_1").await.unwrap();
        mock.assert_async().await;
    }
}
