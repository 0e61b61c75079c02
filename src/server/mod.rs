//! Server-side code for the voice agents platform
//!
//! This module contains all backend functionality:
//! - Database access (PostgreSQL via sqlx)
//! - Retell voice AI and Twilio telephony clients
//! - CRM and calendar adapters
//! - Outbound custom webhook delivery
//! - Authentication (JWT)
//! - API routes

pub mod db;
pub mod auth;
pub mod config;
pub mod retell;
pub mod twilio;
pub mod crm;
pub mod calendar;
pub mod webhooks;
pub mod config_api;
pub mod retell_api;
pub mod twilio_api;
pub mod crm_api;
pub mod calendar_api;
pub mod webhooks_api;
pub mod provider_webhooks;

use axum::{
    routing::{delete, get, post, put},
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{CorsLayer, Any};
use axum::http::Method;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::*;
use config::{AppConfig, IntegrationSettings};
use serde::Serialize;

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub http: reqwest::Client,
    pub config: AppConfig,
    pub jwt_secret: String,
    /// Credentials replaceable at runtime through `/api/config`
    pub integrations: Arc<RwLock<IntegrationSettings>>,
    pub crm: crm::CrmService,
    pub calendar: calendar::CalendarService,
    pub webhooks: webhooks::WebhookDispatcher,
}

impl AppState {
    pub fn new(db: PgPool, config: AppConfig, integrations: IntegrationSettings) -> Self {
        let http = reqwest::Client::new();
        let store = Arc::new(webhooks::PgWebhookStore::new(db.clone()));
        Self {
            crm: crm::CrmService::new(db.clone(), http.clone()),
            calendar: calendar::CalendarService::new(db.clone(), http.clone()),
            webhooks: webhooks::WebhookDispatcher::new(store, http.clone()),
            jwt_secret: config.jwt_secret.clone(),
            integrations: Arc::new(RwLock::new(integrations)),
            db,
            http,
            config,
        }
    }

    /// Retell client bound to the current API key
    pub async fn retell(&self) -> retell::RetellClient {
        let api_key = self.integrations.read().await.retell_api_key.clone();
        retell::RetellClient::new(
            self.http.clone(),
            api_key,
            &self.config.retell_base_url,
            &self.config.retell_llm_websocket_base,
        )
    }

    /// Twilio client, if credentials are configured
    pub async fn twilio(&self) -> Option<twilio::TwilioClient> {
        let settings = self.integrations.read().await;
        twilio::TwilioClient::new(
            self.http.clone(),
            settings.twilio_account_sid.as_deref(),
            settings.twilio_auth_token.as_deref(),
            &self.config.twilio_base_url,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

pub type ApiRejection = (StatusCode, Json<ApiError>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiRejection {
    (status, Json(ApiError { message: message.into() }))
}

pub fn db_error(e: sqlx::Error) -> ApiRejection {
    tracing::error!("Database error: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
}

/// Create the Axum router with all API routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/api/health", get(health_check))

        // Auth routes
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))

        // Agent routes
        .route("/api/agents", get(get_agents).post(create_agent))
        .route("/api/agents/{id}", get(get_agent).patch(update_agent).delete(delete_agent))
        .route("/api/agents/{id}/publish", post(publish_agent))

        // Call routes
        .route("/api/calls", get(get_calls).post(create_call))
        .route("/api/calls/analytics", get(get_call_analytics))
        .route("/api/calls/{id}", get(get_call))

        // Integration settings
        .route("/api/config", get(config_api::get_config))
        .route("/api/config/status", get(config_api::get_status))
        .route("/api/config/retell", put(config_api::update_retell).patch(config_api::update_retell))
        .route("/api/config/twilio", put(config_api::update_twilio).patch(config_api::update_twilio))
        .route("/api/config/openai", put(config_api::update_openai).patch(config_api::update_openai))
        .route("/api/config/test-retell", post(config_api::test_retell))
        .route("/api/config/test-twilio", post(config_api::test_twilio))
        .route("/api/config/test-openai", post(config_api::test_openai))

        // Retell passthrough
        .route("/api/integrations/retell/agents", get(retell_api::list_agents).post(retell_api::create_agent))
        .route("/api/integrations/retell/agents/{id}", get(retell_api::get_agent).delete(retell_api::delete_agent))
        .route("/api/integrations/retell/calls", post(retell_api::create_phone_call))

        // Twilio telephony
        .route("/api/integrations/twilio/search", get(twilio_api::search_numbers))
        .route("/api/integrations/twilio/purchase", post(twilio_api::purchase_number))
        .route("/api/integrations/twilio/numbers", get(twilio_api::list_numbers))
        .route("/api/integrations/twilio/numbers/{id}", put(twilio_api::update_number).patch(twilio_api::update_number).delete(twilio_api::delete_number))
        .route("/api/integrations/twilio/sms", post(twilio_api::send_sms))
        .route("/api/integrations/twilio/verify-caller-id", post(twilio_api::verify_caller_id))
        .route("/api/integrations/twilio/usage", get(twilio_api::usage))

        // CRM
        .route("/api/integrations/crm/activities", get(crm_api::list_activities))
        .route("/api/integrations/crm/{provider}/leads", post(crm_api::create_lead))
        .route("/api/integrations/crm/{provider}/tickets", post(crm_api::create_ticket))
        .route("/api/integrations/crm/{provider}/sync-call", post(crm_api::sync_call))
        .route("/api/integrations/crm/{provider}/test", post(crm_api::test_connection))
        .route("/api/integrations/crm/{provider}/configure", put(crm_api::configure))

        // Calendar
        .route("/api/integrations/calendar/activities", get(calendar_api::list_activities))
        .route("/api/integrations/calendar/{provider}/availability", get(calendar_api::check_availability))
        .route("/api/integrations/calendar/{provider}/slots", get(calendar_api::available_slots))
        .route("/api/integrations/calendar/{provider}/events", get(calendar_api::list_events).post(calendar_api::create_event))
        .route("/api/integrations/calendar/{provider}/events/{event_id}", delete(calendar_api::cancel_event))
        .route("/api/integrations/calendar/{provider}/test", post(calendar_api::test_connection))
        .route("/api/integrations/calendar/{provider}/configure", put(calendar_api::configure))
        .route("/api/integrations/calendar/{provider}/auth-url", get(calendar_api::auth_url))
        .route("/api/integrations/calendar/{provider}/oauth/callback", post(calendar_api::oauth_callback))

        // Custom webhooks
        .route("/api/integrations/webhooks", get(webhooks_api::list_webhooks).post(webhooks_api::create_webhook))
        .route("/api/integrations/webhooks/{id}", get(webhooks_api::get_webhook).patch(webhooks_api::update_webhook).delete(webhooks_api::delete_webhook))
        .route("/api/integrations/webhooks/{id}/test", post(webhooks_api::test_webhook))
        .route("/api/integrations/webhooks/{id}/deliveries", get(webhooks_api::list_deliveries))
        .route("/api/integrations/webhooks/deliveries/{id}/retry", post(webhooks_api::retry_delivery))

        // Provider callbacks (unauthenticated)
        .route("/api/webhooks/retell/call-events", post(provider_webhooks::retell_call_events))
        .route("/api/webhooks/twilio/call-status", post(provider_webhooks::twilio_call_status))
        .route("/api/webhooks/twilio/incoming-call", post(provider_webhooks::twilio_incoming_call))
        .route("/api/webhooks/twilio/sms", post(provider_webhooks::twilio_sms))
        .route("/api/webhooks/custom/{organization_id}", post(provider_webhooks::custom_ack))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// Health check
async fn health_check() -> &'static str {
    "OK"
}

// ============== Agent Routes ==============

async fn get_agents(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Query(query): Query<AgentListQuery>,
) -> Result<Json<Vec<Agent>>, ApiRejection> {
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    db::agents::get_all(&state.db, claims.organization_id, search)
        .await
        .map(Json)
        .map_err(db_error)
}

async fn get_agent(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<Agent>, ApiRejection> {
    db::agents::get_by_id(&state.db, id, claims.organization_id)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), ApiRejection> {
    req.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let agent = db::agents::create(&state.db, claims.organization_id, req)
        .await
        .map_err(db_error)?;
    tracing::info!("Agent {} created for org {}", agent.id, claims.organization_id);
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn update_agent(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<Agent>, ApiRejection> {
    req.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    db::agents::update(&state.db, id, claims.organization_id, req)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))
}

async fn delete_agent(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiRejection> {
    match db::agents::archive(&state.db, id, claims.organization_id).await {
        Ok(true) => Ok(StatusCode::NO_CONTENT),
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, "Agent not found")),
        Err(e) => Err(db_error(e)),
    }
}

/// Create the agent on Retell and remember its remote id
async fn publish_agent(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<Agent>, ApiRejection> {
    let agent = db::agents::get_by_id(&state.db, id, claims.organization_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))?;

    let remote = state
        .retell()
        .await
        .create_agent(&retell::CreateRetellAgent {
            name: agent.name.clone(),
            voice_id: agent.voice_id.clone(),
            llm_provider: agent.llm_provider.clone(),
            system_prompt: agent.system_prompt.clone(),
            first_message: agent.first_message.clone(),
            interrupt_sens: Some(agent.interrupt_sens),
            response_delay: Some(agent.response_delay),
        })
        .await
        .map_err(retell_api::retell_error)?;

    tracing::info!("Agent {} published to Retell as {}", agent.id, remote.agent_id);
    db::agents::set_retell_agent_id(&state.db, agent.id, claims.organization_id, &remote.agent_id)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))
}

// ============== Call Routes ==============

async fn get_calls(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<CallWithAgentSummary>>, ApiRejection> {
    let calls = db::calls::get_all(&state.db, claims.organization_id)
        .await
        .map_err(db_error)?;

    let mut agent_ids: Vec<Uuid> = calls.iter().filter_map(|c| c.agent_id).collect();
    agent_ids.sort();
    agent_ids.dedup();
    let agents = db::agents::get_summaries(&state.db, &agent_ids)
        .await
        .map_err(db_error)?;

    Ok(Json(
        calls
            .into_iter()
            .map(|call| {
                let agent = agents.iter().find(|a| Some(a.id) == call.agent_id).cloned();
                CallWithAgentSummary { call, agent }
            })
            .collect(),
    ))
}

async fn get_call(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<CallWithAgent>, ApiRejection> {
    let call = db::calls::get_by_id(&state.db, id, claims.organization_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Call not found"))?;

    let agent = match call.agent_id {
        Some(agent_id) => db::agents::get_by_id(&state.db, agent_id, claims.organization_id)
            .await
            .map_err(db_error)?,
        None => None,
    };
    Ok(Json(CallWithAgent { call, agent }))
}

async fn get_call_analytics(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<CallAnalytics>, ApiRejection> {
    db::calls::analytics(&state.db, claims.organization_id)
        .await
        .map(Json)
        .map_err(db_error)
}

/// Place an outbound call through Retell with one of the organization's agents
async fn create_call(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<CreateCallRequest>,
) -> Result<(StatusCode, Json<Call>), ApiRejection> {
    if req.to_number.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "toNumber is required"));
    }

    let agent = db::agents::get_by_id(&state.db, req.agent_id, claims.organization_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))?;
    let retell_agent_id = agent
        .retell_agent_id
        .clone()
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Agent has not been published to Retell"))?;

    let from_number = match req.from_number.filter(|n| !n.trim().is_empty()) {
        Some(number) => number,
        None => state
            .integrations
            .read()
            .await
            .twilio_phone_number
            .clone()
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "fromNumber is required"))?,
    };

    let remote = state
        .retell()
        .await
        .create_phone_call(&retell::CreatePhoneCall {
            from_number: from_number.clone(),
            to_number: req.to_number.clone(),
            override_agent_id: Some(retell_agent_id),
            retell_llm_dynamic_variables: req.dynamic_variables,
        })
        .await
        .map_err(retell_api::retell_error)?;

    let call = db::calls::create(
        &state.db,
        claims.organization_id,
        Some(agent.id),
        Some(&remote.call_id),
        CallDirection::Outbound,
        Some(&from_number),
        Some(&req.to_number),
        chrono::Utc::now(),
    )
    .await
    .map_err(db_error)?;

    tracing::info!("Outbound call {} placed via Retell ({})", call.id, remote.call_id);
    Ok((StatusCode::CREATED, Json(call)))
}

/// Initialize and start the server
pub async fn run_server(database_url: &str, port: u16) -> anyhow::Result<()> {
    // Initialize database
    let pool = db::init_pool(database_url).await?;

    // Run migrations (non-fatal if already applied)
    if let Err(e) = db::run_migrations(&pool).await {
        tracing::warn!("Migration warning (may be already applied): {}", e);
    }

    let config = AppConfig::from_env(port);
    let integrations = IntegrationSettings::from_env();
    if !integrations.retell_configured() {
        tracing::warn!("RETELL_API_KEY not configured, Retell features will be unavailable");
    }
    if !integrations.twilio_configured() {
        tracing::warn!("Twilio credentials not configured, telephony features will be unavailable");
    }

    let state = AppState::new(pool, config.clone(), integrations);

    let workers = state.webhooks.start(config.webhook_workers);
    let mut scheduler = state
        .webhooks
        .schedule_pruning(config.delivery_retention_days)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start delivery pruning job: {}", e))?;

    let dispatcher = state.webhooks.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background workers");
    dispatcher.shutdown();
    for worker in workers {
        let _ = worker.await;
    }
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown error: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_support::state());
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_org_routes_require_token() {
        for uri in ["/api/agents", "/api/calls", "/api/calls/analytics", "/api/config", "/api/integrations/webhooks"] {
            let app = create_router(test_support::state());
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_malformed_token_is_rejected() {
        let app = create_router(test_support::state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/agents")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_agent_is_rejected_before_database() {
        let app = create_router(test_support::state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/agents")
                    .header("authorization", test_support::bearer())
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "name": "Support",
                            "type": "inbound",
                            "systemPrompt": "Be kind",
                            "voiceId": "v1",
                            "temperature": 3.5
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["message"], "temperature must be between 0 and 2");
    }
}
