//! Direct Retell passthrough routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::retell::{CreatePhoneCall, CreateRetellAgent, RetellAgent, RetellCall, RetellError};
use super::{api_error, auth, ApiRejection, AppState};

#[derive(Debug, Serialize)]
pub struct AgentList {
    pub agents: Vec<RetellAgent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn retell_error(e: RetellError) -> ApiRejection {
    match e {
        RetellError::NotConfigured => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        RetellError::Api { status: 404, .. } => api_error(StatusCode::NOT_FOUND, e.to_string()),
        RetellError::Api { .. } | RetellError::Http(_) => {
            tracing::error!("Retell request failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Json(req): Json<CreateRetellAgent>,
) -> Result<(StatusCode, Json<RetellAgent>), ApiRejection> {
    let agent = state.retell().await.create_agent(&req).await.map_err(retell_error)?;
    tracing::info!("Retell agent {} created", agent.agent_id);
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
) -> Result<Json<AgentList>, ApiRejection> {
    let client = state.retell().await;
    if !client.is_configured() {
        return Ok(Json(AgentList {
            agents: Vec::new(),
            message: Some("Retell API key not configured".to_string()),
        }));
    }

    let agents = client.list_agents().await.map_err(retell_error)?;
    Ok(Json(AgentList { agents, message: None }))
}

pub async fn get_agent(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Path(id): Path<String>,
) -> Result<Json<RetellAgent>, ApiRejection> {
    state.retell().await.get_agent(&id).await.map(Json).map_err(retell_error)
}

pub async fn delete_agent(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiRejection> {
    state.retell().await.delete_agent(&id).await.map_err(retell_error)?;
    tracing::info!("Retell agent {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_phone_call(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Json(req): Json<CreatePhoneCall>,
) -> Result<(StatusCode, Json<RetellCall>), ApiRejection> {
    let call = state.retell().await.create_phone_call(&req).await.map_err(retell_error)?;
    Ok((StatusCode::CREATED, Json(call)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{create_router, test_support};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use mockito::Server;
    use tower::ServiceExt;

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("authorization", test_support::bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(retell_error(RetellError::NotConfigured).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            retell_error(RetellError::Api { status: 404, message: "gone".to_string() }).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            retell_error(RetellError::Api { status: 500, message: "boom".to_string() }).0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_list_without_key_is_empty() {
        let (status, body) = get(create_router(test_support::state()), "/api/integrations/retell/agents").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agents"], serde_json::json!([]));
        assert_eq!(body["message"], "Retell API key not configured");
    }

    #[tokio::test]
    async fn test_get_agent_without_key_is_bad_request() {
        let (status, _) = get(create_router(test_support::state()), "/api/integrations/retell/agents/agent_1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_agents_proxies() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/list-agents")
            .with_status(200)
            .with_body(r#"[{"agent_id":"agent_1","agent_name":"Front desk"}]"#)
            .create_async()
            .await;

        let mut state = test_support::state();
        state.config.retell_base_url = server.url();
        state.integrations.write().await.retell_api_key = Some("key_live".to_string());

        let (status, body) = get(create_router(state), "/api/integrations/retell/agents").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["agents"][0]["agent_id"], "agent_1");
        assert!(body.get("message").is_none());
        mock.assert_async().await;
    }
}
