//! Custom webhook management routes

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::db::{self, webhooks::{NewWebhook, WebhookChanges}};
use super::webhooks::{signing, validate_events, validate_url, DeliveryError};
use super::{api_error, auth, db_error, ApiRejection, AppState};
use crate::models::*;

const DEFAULT_DELIVERY_LIMIT: i64 = 50;
const MAX_DELIVERY_LIMIT: i64 = 500;

fn delivery_error(e: DeliveryError) -> ApiRejection {
    match e {
        DeliveryError::WebhookNotFound | DeliveryError::DeliveryNotFound => {
            api_error(StatusCode::NOT_FOUND, e.to_string())
        }
        DeliveryError::AlreadySucceeded | DeliveryError::InvalidUrl(_) | DeliveryError::UnsupportedEvent(_) => {
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        }
        DeliveryError::QueueClosed => {
            tracing::error!("{}", e);
            api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        DeliveryError::Database(e) => db_error(e),
    }
}

async fn owned_webhook(state: &AppState, id: Uuid, organization_id: Uuid) -> Result<CustomWebhook, ApiRejection> {
    db::webhooks::get_by_id(&state.db, id, organization_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| delivery_error(DeliveryError::WebhookNotFound))
}

pub async fn list_webhooks(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<CustomWebhook>>, ApiRejection> {
    db::webhooks::get_all(&state.db, claims.organization_id)
        .await
        .map(Json)
        .map_err(db_error)
}

pub async fn create_webhook(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<CreatedWebhook>), ApiRejection> {
    if req.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "name is required"));
    }
    validate_url(&req.url).map_err(delivery_error)?;
    validate_events(&req.events).map_err(delivery_error)?;

    let secret = req
        .secret
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(signing::generate_secret);

    let webhook = db::webhooks::create(
        &state.db,
        claims.organization_id,
        NewWebhook {
            name: req.name.trim().to_string(),
            url: req.url,
            events: req.events,
            method: req.method.unwrap_or_default(),
            headers: req.headers.unwrap_or_default(),
            secret: Some(secret.clone()),
            enabled: req.enabled.unwrap_or(true),
        },
    )
    .await
    .map_err(db_error)?;

    tracing::info!("Webhook {} created for org {}", webhook.id, claims.organization_id);
    Ok((StatusCode::CREATED, Json(CreatedWebhook { webhook, secret: Some(secret) })))
}

pub async fn get_webhook(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomWebhook>, ApiRejection> {
    owned_webhook(&state, id, claims.organization_id).await.map(Json)
}

pub async fn update_webhook(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateWebhookRequest>,
) -> Result<Json<CustomWebhook>, ApiRejection> {
    if let Some(url) = req.url.as_deref() {
        validate_url(url).map_err(delivery_error)?;
    }
    if let Some(events) = req.events.as_deref() {
        validate_events(events).map_err(delivery_error)?;
    }

    let changes = WebhookChanges {
        name: req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        url: req.url,
        events: req.events,
        method: req.method,
        headers: req.headers,
        secret: req.secret.map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty())),
        enabled: req.enabled,
    };

    db::webhooks::update(&state.db, id, claims.organization_id, changes)
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| delivery_error(DeliveryError::WebhookNotFound))
}

pub async fn delete_webhook(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiRejection> {
    match db::webhooks::soft_delete(&state.db, id, claims.organization_id).await {
        Ok(true) => {
            tracing::info!("Webhook {} deleted", id);
            Ok(StatusCode::NO_CONTENT)
        }
        Ok(false) => Err(delivery_error(DeliveryError::WebhookNotFound)),
        Err(e) => Err(db_error(e)),
    }
}

pub async fn test_webhook(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResult>, ApiRejection> {
    let webhook = owned_webhook(&state, id, claims.organization_id).await?;
    Ok(Json(state.webhooks.test(webhook.id).await))
}

pub async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveryListQuery>,
) -> Result<Json<Vec<WebhookDelivery>>, ApiRejection> {
    let webhook = owned_webhook(&state, id, claims.organization_id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_DELIVERY_LIMIT).clamp(1, MAX_DELIVERY_LIMIT);
    db::webhooks::list_deliveries(&state.db, webhook.id, limit)
        .await
        .map(Json)
        .map_err(db_error)
}

pub async fn retry_delivery(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<OperationResult>, ApiRejection> {
    state
        .webhooks
        .retry(id, claims.organization_id)
        .await
        .map_err(delivery_error)?;
    tracing::info!("Delivery {} queued for retry", id);
    Ok(Json(OperationResult::ok("Delivery queued for retry")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{create_router, test_support};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn post(uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = create_router(test_support::state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("authorization", test_support::bearer())
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(delivery_error(DeliveryError::DeliveryNotFound).0, StatusCode::NOT_FOUND);
        assert_eq!(delivery_error(DeliveryError::AlreadySucceeded).0, StatusCode::BAD_REQUEST);
        assert_eq!(delivery_error(DeliveryError::QueueClosed).0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_create_rejects_relative_url() {
        let (status, body) = post(
            "/api/integrations/webhooks",
            serde_json::json!({ "name": "CRM sync", "url": "/hooks/calls", "events": ["call.ended"] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Invalid webhook URL"));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_event() {
        let (status, body) = post(
            "/api/integrations/webhooks",
            serde_json::json!({ "name": "CRM sync", "url": "https://hooks.acme.test/calls", "events": ["call.exploded"] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Unsupported event: call.exploded");
    }

    #[tokio::test]
    async fn test_update_revalidates_url() {
        let response = create_router(test_support::state())
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/integrations/webhooks/{}", Uuid::new_v4()))
                    .header("authorization", test_support::bearer())
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::json!({ "url": "/relative" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["message"].as_str().unwrap().starts_with("Invalid webhook URL"));
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let (status, _) = post(
            "/api/integrations/webhooks",
            serde_json::json!({ "name": " ", "url": "https://hooks.acme.test/calls", "events": ["call.ended"] }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
