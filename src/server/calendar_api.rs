//! Calendar routes, dispatched on the `{provider}` path segment

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::calendar::{
    Availability, AvailabilityQuery, CalendarError, CalendarEvent, CalendarKind, CancelledEvent,
    CreateEvent, DaySlots, EventList, ListEventsQuery, OAuthTokens, SlotQuery,
};
use super::crm_api::TestConnectionRequest;
use super::{api_error, auth, ApiRejection, AppState};
use crate::models::{Activity, ActivityFilter, ConfigureIntegrationRequest, ConnectionTest, Integration};

#[derive(Debug, Serialize)]
pub struct AuthUrl {
    #[serde(rename = "authUrl")]
    pub auth_url: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: String,
}

fn calendar_error(e: CalendarError) -> ApiRejection {
    match &e {
        CalendarError::UnsupportedProvider(_)
        | CalendarError::MissingCredential(_)
        | CalendarError::InvalidInput(_)
        | CalendarError::ConnectionFailed(_) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        CalendarError::Api { status: 404, .. } => api_error(StatusCode::NOT_FOUND, e.to_string()),
        CalendarError::Http(_) | CalendarError::Api { .. } => {
            tracing::error!("Calendar request failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
        CalendarError::Database(_) => {
            tracing::error!("{}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

fn kind(provider: &str) -> Result<CalendarKind, ApiRejection> {
    provider.parse().map_err(calendar_error)
}

pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Availability>, ApiRejection> {
    let kind = kind(&provider)?;
    state
        .calendar
        .check_availability(claims.organization_id, kind, &query)
        .await
        .map(Json)
        .map_err(calendar_error)
}

pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<DaySlots>, ApiRejection> {
    let kind = kind(&provider)?;
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    state
        .calendar
        .find_available_slots(claims.organization_id, kind, date, query.slot_duration, query.timezone)
        .await
        .map(Json)
        .map_err(calendar_error)
}

pub async fn list_events(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<EventList>, ApiRejection> {
    let kind = kind(&provider)?;
    state
        .calendar
        .list_upcoming_events(claims.organization_id, kind, &query)
        .await
        .map(Json)
        .map_err(calendar_error)
}

pub async fn create_event(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<CreateEvent>,
) -> Result<(StatusCode, Json<CalendarEvent>), ApiRejection> {
    let kind = kind(&provider)?;
    let event = state
        .calendar
        .create_event(claims.organization_id, kind, &req)
        .await
        .map_err(calendar_error)?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn cancel_event(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path((provider, event_id)): Path<(String, String)>,
) -> Result<Json<CancelledEvent>, ApiRejection> {
    let kind = kind(&provider)?;
    state
        .calendar
        .cancel_event(claims.organization_id, kind, &event_id)
        .await
        .map(Json)
        .map_err(calendar_error)
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<TestConnectionRequest>,
) -> Result<Json<ConnectionTest>, ApiRejection> {
    let kind = kind(&provider)?;
    Ok(Json(state.calendar.test_connection(kind, &req.credentials).await))
}

pub async fn configure(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<ConfigureIntegrationRequest>,
) -> Result<Json<Integration>, ApiRejection> {
    let kind = kind(&provider)?;
    let integration = state
        .calendar
        .configure(claims.organization_id, kind, req.enabled, req.credentials, req.settings)
        .await
        .map_err(calendar_error)?;
    tracing::info!("Calendar {} configured for org {}", kind.as_str(), claims.organization_id);
    Ok(Json(integration))
}

pub async fn auth_url(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
) -> Result<Json<AuthUrl>, ApiRejection> {
    let kind = kind(&provider)?;
    let auth_url = state
        .calendar
        .auth_url(claims.organization_id, kind)
        .await
        .map_err(calendar_error)?;
    Ok(Json(AuthUrl { auth_url }))
}

pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(provider): Path<String>,
    Json(req): Json<OAuthCallback>,
) -> Result<Json<OAuthTokens>, ApiRejection> {
    let kind = kind(&provider)?;
    if req.code.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "code is required"));
    }
    state
        .calendar
        .exchange_code(claims.organization_id, kind, req.code.trim())
        .await
        .map(Json)
        .map_err(calendar_error)
}

pub async fn list_activities(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Query(filter): Query<ActivityFilter>,
) -> Result<Json<Vec<Activity>>, ApiRejection> {
    state
        .calendar
        .list_activities(claims.organization_id, &filter)
        .await
        .map(Json)
        .map_err(calendar_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{create_router, test_support};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_error_statuses() {
        assert_eq!(calendar_error(CalendarError::UnsupportedProvider("ical".into())).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            calendar_error(CalendarError::InvalidInput("endTime must be after startTime".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            calendar_error(CalendarError::Api { status: 404, message: "missing".into() }).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            calendar_error(CalendarError::Api { status: 503, message: "busy".into() }).0,
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_unknown_calendar_is_rejected() {
        let response = create_router(test_support::state())
            .oneshot(
                Request::builder()
                    .uri("/api/integrations/calendar/ical/auth-url")
                    .header("authorization", test_support::bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_slot_duration_is_rejected() {
        let response = create_router(test_support::state())
            .oneshot(
                Request::builder()
                    .uri("/api/integrations/calendar/google/slots?date=2025-03-14&slotDuration=1000000000000")
                    .header("authorization", test_support::bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
