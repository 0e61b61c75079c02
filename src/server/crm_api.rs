//! CRM routes, dispatched on the `{provider}` path segment

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::crm::{CreateLead, CreateTicket, CrmError, CrmKind, CrmRecord, SyncCallOptions};
use super::{api_error, auth, ApiRejection, AppState};
use crate::models::{Activity, ActivityFilter, ConfigureIntegrationRequest, ConnectionTest, Integration};

#[derive(Debug, Default, Deserialize)]
pub struct TestConnectionRequest {
    #[serde(default)]
    pub credentials: serde_json::Value,
}

pub(crate) fn crm_error(e: CrmError) -> ApiRejection {
    match &e {
        CrmError::UnsupportedProvider(_) | CrmError::MissingCredential(_) | CrmError::ConnectionFailed(_) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        CrmError::CallNotFound => api_error(StatusCode::NOT_FOUND, e.to_string()),
        CrmError::Http(_) | CrmError::Api { .. } => {
            tracing::error!("CRM request failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
        CrmError::Database(_) => {
            tracing::error!("{}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

fn kind(provider: &str) -> Result<CrmKind, ApiRejection> {
    provider.parse().map_err(crm_error)
}

pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<CreateLead>,
) -> Result<(StatusCode, Json<CrmRecord>), ApiRejection> {
    let kind = kind(&provider)?;
    let record = state
        .crm
        .create_lead(claims.organization_id, kind, &req)
        .await
        .map_err(crm_error)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<CreateTicket>,
) -> Result<(StatusCode, Json<CrmRecord>), ApiRejection> {
    let kind = kind(&provider)?;
    let record = state
        .crm
        .create_ticket(claims.organization_id, kind, &req)
        .await
        .map_err(crm_error)?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn sync_call(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<SyncCallOptions>,
) -> Result<Json<CrmRecord>, ApiRejection> {
    let kind = kind(&provider)?;
    let record = state
        .crm
        .sync_call(claims.organization_id, kind, &req)
        .await
        .map_err(crm_error)?;
    Ok(Json(record))
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<TestConnectionRequest>,
) -> Result<Json<ConnectionTest>, ApiRejection> {
    let kind = kind(&provider)?;
    Ok(Json(state.crm.test_connection(kind, &req.credentials).await))
}

pub async fn configure(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<ConfigureIntegrationRequest>,
) -> Result<Json<Integration>, ApiRejection> {
    let kind = kind(&provider)?;
    let integration = state
        .crm
        .configure(claims.organization_id, kind, req.enabled, req.credentials, req.settings)
        .await
        .map_err(crm_error)?;
    tracing::info!("{} integration configured for org {}", kind.as_str(), claims.organization_id);
    Ok(Json(integration))
}

pub async fn list_activities(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Vec<Activity>>, ApiRejection> {
    state
        .crm
        .list_activities(claims.organization_id, &filter)
        .await
        .map(Json)
        .map_err(crm_error)
}
