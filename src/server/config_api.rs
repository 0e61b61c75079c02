//! Integration settings routes: masked view, credential updates, live tests

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::config::{self, ConfigError, ConfigView, IntegrationsStatus};
use super::{api_error, auth, ApiRejection, AppState};

#[derive(Debug, Deserialize)]
pub struct UpdateRetellConfig {
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTwilioConfig {
    #[serde(rename = "accountSid")]
    pub account_sid: String,
    #[serde(rename = "authToken")]
    pub auth_token: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOpenAiConfig {
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ConfigUpdated {
    pub success: bool,
    pub message: String,
    pub configured: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IntegrationCheck {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntegrationCheck {
    fn passed(message: &str, details: serde_json::Value) -> Self {
        Self { success: true, message: message.to_string(), details: Some(details) }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), details: None }
    }
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<ConfigView> {
    let view = state.integrations.read().await.view(&state.config);
    Json(view)
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<IntegrationsStatus> {
    let status = state.integrations.read().await.status();
    Json(status)
}

async fn persist(state: &AppState, entries: &[(&str, &str)]) -> Result<(), ApiRejection> {
    config::update_env_file(&state.config.env_file, entries)
        .await
        .map_err(|e| match e {
            ConfigError::InvalidEntry(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
            ConfigError::EnvFile { .. } => {
                tracing::error!("{}", e);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to persist configuration")
            }
        })
}

fn required(value: &str, field: &str) -> Result<String, ApiRejection> {
    let value = value.trim();
    if value.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, format!("{} is required", field)));
    }
    if value.contains(|c: char| c.is_control()) {
        return Err(api_error(StatusCode::BAD_REQUEST, format!("{} must be a single line", field)));
    }
    Ok(value.to_string())
}

pub async fn update_retell(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<UpdateRetellConfig>,
) -> Result<Json<ConfigUpdated>, ApiRejection> {
    let api_key = required(&req.api_key, "apiKey")?;
    persist(&state, &[("RETELL_API_KEY", &api_key)]).await?;

    let mut settings = state.integrations.write().await;
    settings.retell_api_key = Some(api_key);
    tracing::info!("Retell credentials updated by {}", claims.email);

    Ok(Json(ConfigUpdated {
        success: true,
        message: "Retell configuration updated".to_string(),
        configured: settings.retell_configured(),
    }))
}

pub async fn update_twilio(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<UpdateTwilioConfig>,
) -> Result<Json<ConfigUpdated>, ApiRejection> {
    let account_sid = required(&req.account_sid, "accountSid")?;
    let auth_token = required(&req.auth_token, "authToken")?;
    let phone_number = req
        .phone_number
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let mut entries = vec![
        ("TWILIO_ACCOUNT_SID", account_sid.as_str()),
        ("TWILIO_AUTH_TOKEN", auth_token.as_str()),
    ];
    if let Some(number) = phone_number.as_deref() {
        entries.push(("TWILIO_PHONE_NUMBER", number));
    }
    persist(&state, &entries).await?;

    let mut settings = state.integrations.write().await;
    settings.twilio_account_sid = Some(account_sid);
    settings.twilio_auth_token = Some(auth_token);
    if phone_number.is_some() {
        settings.twilio_phone_number = phone_number;
    }
    tracing::info!("Twilio credentials updated by {}", claims.email);

    Ok(Json(ConfigUpdated {
        success: true,
        message: "Twilio configuration updated".to_string(),
        configured: settings.twilio_configured(),
    }))
}

pub async fn update_openai(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<UpdateOpenAiConfig>,
) -> Result<Json<ConfigUpdated>, ApiRejection> {
    let api_key = required(&req.api_key, "apiKey")?;
    persist(&state, &[("OPENAI_API_KEY", &api_key)]).await?;

    let mut settings = state.integrations.write().await;
    settings.openai_api_key = Some(api_key);
    tracing::info!("OpenAI credentials updated by {}", claims.email);

    Ok(Json(ConfigUpdated {
        success: true,
        message: "OpenAI configuration updated".to_string(),
        configured: settings.openai_configured(),
    }))
}

pub async fn test_retell(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<IntegrationCheck> {
    let client = state.retell().await;
    if !client.is_configured() {
        return Json(IntegrationCheck::failed("Retell API key not configured"));
    }

    Json(match client.list_agents().await {
        Ok(agents) => IntegrationCheck::passed(
            "Retell connection successful",
            serde_json::json!({ "agentsCount": agents.len() }),
        ),
        Err(e) => {
            tracing::warn!("Retell connection test failed: {}", e);
            IntegrationCheck::failed(format!("Retell connection failed: {}", e))
        }
    })
}

pub async fn test_twilio(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<IntegrationCheck> {
    let configured = state.integrations.read().await.twilio_configured();
    let Some(client) = state.twilio().await.filter(|_| configured) else {
        return Json(IntegrationCheck::failed("Twilio credentials not configured"));
    };

    Json(match client.fetch_account().await {
        Ok(account) => IntegrationCheck::passed(
            "Twilio connection successful",
            serde_json::json!({
                "accountSid": account.sid,
                "friendlyName": account.friendly_name,
                "status": account.status,
            }),
        ),
        Err(e) => {
            tracing::warn!("Twilio connection test failed: {}", e);
            IntegrationCheck::failed(format!("Twilio connection failed: {}", e))
        }
    })
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

pub async fn test_openai(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Json<IntegrationCheck> {
    let settings = state.integrations.read().await.clone();
    let configured = settings.openai_configured();
    let Some(api_key) = settings.openai_api_key.filter(|_| configured) else {
        return Json(IntegrationCheck::failed("OpenAI API key not configured"));
    };

    Json(match list_models(&state.http, &state.config.openai_base_url, &api_key).await {
        Ok(count) => IntegrationCheck::passed(
            "OpenAI connection successful",
            serde_json::json!({ "modelsCount": count }),
        ),
        Err(e) => {
            tracing::warn!("OpenAI connection test failed: {}", e);
            IntegrationCheck::failed(format!("OpenAI connection failed: {}", e))
        }
    })
}

async fn list_models(http: &reqwest::Client, base_url: &str, api_key: &str) -> anyhow::Result<usize> {
    let response = http
        .get(format!("{}/models", base_url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("API error ({}): {}", status.as_u16(), response.text().await.unwrap_or_default());
    }
    Ok(response.json::<ModelList>().await?.data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{create_router, test_support};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use mockito::{Matcher, Server};
    use tower::ServiceExt;

    async fn send(app: axum::Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", test_support::bearer());
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_update_retell_persists_and_masks() {
        let state = test_support::state();
        let env_file = state.config.env_file.clone();
        let app = create_router(state);

        let (status, body) = send(
            app.clone(),
            "PATCH",
            "/api/config/retell",
            Some(serde_json::json!({ "apiKey": "key_1234567890abcd" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["configured"], true);

        let written = tokio::fs::read_to_string(&env_file).await.unwrap();
        assert!(written.contains("RETELL_API_KEY=key_1234567890abcd"));

        let (_, view) = send(app, "GET", "/api/config", None).await;
        assert_eq!(view["retell"]["apiKey"], "key_***abcd");
        assert_eq!(view["retell"]["configured"], true);
        assert_eq!(view["twilio"]["configured"], false);

        let _ = tokio::fs::remove_file(&env_file).await;
    }

    #[tokio::test]
    async fn test_update_rejects_blank_key() {
        let app = create_router(test_support::state());
        let (status, body) = send(
            app,
            "PATCH",
            "/api/config/openai",
            Some(serde_json::json!({ "apiKey": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "apiKey is required");
    }

    #[tokio::test]
    async fn test_update_rejects_embedded_newlines() {
        let state = test_support::state();
        let env_file = state.config.env_file.clone();
        let app = create_router(state);

        for (uri, body) in [
            ("/api/config/retell", serde_json::json!({ "apiKey": "key_x\nDATABASE_URL=postgres://evil" })),
            ("/api/config/openai", serde_json::json!({ "apiKey": "sk-x\rPORT=1" })),
            (
                "/api/config/twilio",
                serde_json::json!({ "accountSid": "AC1", "authToken": "tok", "phoneNumber": "+1555\nPORT=1" }),
            ),
        ] {
            let (status, body) = send(app.clone(), "PATCH", uri, Some(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body["message"].as_str().unwrap().contains("single line"));
        }

        assert!(tokio::fs::read_to_string(&env_file).await.is_err());
        let (_, view) = send(app, "GET", "/api/config", None).await;
        assert_eq!(view["retell"]["configured"], false);
    }

    #[tokio::test]
    async fn test_unconfigured_checks_fail_softly() {
        for (uri, message) in [
            ("/api/config/test-retell", "Retell API key not configured"),
            ("/api/config/test-twilio", "Twilio credentials not configured"),
            ("/api/config/test-openai", "OpenAI API key not configured"),
        ] {
            let app = create_router(test_support::state());
            let (status, body) = send(app, "POST", uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], false);
            assert_eq!(body["message"], message);
        }
    }

    #[tokio::test]
    async fn test_openai_check_lists_models() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/models")
            .match_header("authorization", Matcher::Exact("Bearer sk-test-key".to_string()))
            .with_status(200)
            .with_body(r#"{"data":[{"id":"gpt-4"},{"id":"gpt-4o"}]}"#)
            .create_async()
            .await;

        let mut state = test_support::state();
        state.config.openai_base_url = server.url();
        state.integrations.write().await.openai_api_key = Some("sk-test-key".to_string());

        let (status, body) = send(create_router(state), "POST", "/api/config/test-openai", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["details"]["modelsCount"], 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_reports_not_tested() {
        let (status, body) = send(create_router(test_support::state()), "GET", "/api/config/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["retell"]["status"], "not_tested");
        assert_eq!(body["openai"]["configured"], false);
    }
}
