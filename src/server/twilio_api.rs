//! Telephony routes: number inventory, SMS and caller ID over Twilio

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use super::db::{self, phone_numbers::NewPhoneNumber};
use super::twilio::{
    AvailableNumber, NumberPurchase, NumberSearch, SmsMessage, TwilioClient, TwilioError,
    ValidationRequest,
};
use super::{api_error, auth, db_error, ApiRejection, AppState};
use crate::models::*;

fn twilio_error(e: TwilioError) -> ApiRejection {
    match e {
        TwilioError::NotConfigured => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        TwilioError::Api { status: 400, .. } => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        TwilioError::Api { .. } | TwilioError::Http(_) => {
            tracing::error!("Twilio request failed: {}", e);
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn client(state: &AppState) -> Result<TwilioClient, ApiRejection> {
    state.twilio().await.ok_or_else(|| twilio_error(TwilioError::NotConfigured))
}

/// Callback URLs registered on every purchased number
struct Callbacks {
    voice: String,
    status: String,
    sms: String,
}

impl Callbacks {
    fn new(public_base: &str) -> Self {
        let base = public_base.trim_end_matches('/');
        Self {
            voice: format!("{}/api/webhooks/twilio/incoming-call", base),
            status: format!("{}/api/webhooks/twilio/call-status", base),
            sms: format!("{}/api/webhooks/twilio/sms", base),
        }
    }
}

pub async fn search_numbers(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Query(query): Query<SearchNumbersQuery>,
) -> Result<Json<Vec<AvailableNumber>>, ApiRejection> {
    let twilio = client(&state).await?;
    twilio
        .search_local_numbers(&NumberSearch::from(&query))
        .await
        .map(Json)
        .map_err(twilio_error)
}

pub async fn purchase_number(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Json(req): Json<PurchaseNumberRequest>,
) -> Result<(StatusCode, Json<PhoneNumber>), ApiRejection> {
    if req.phone_number.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "phoneNumber is required"));
    }
    let twilio = client(&state).await?;

    if let Some(agent_id) = req.agent_id {
        db::agents::get_by_id(&state.db, agent_id, claims.organization_id)
            .await
            .map_err(db_error)?
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))?;
    }

    let callbacks = Callbacks::new(&state.config.public_webhook_url);
    let friendly_name = req.friendly_name.as_deref().unwrap_or(&req.phone_number);
    let purchased = twilio
        .purchase_number(&NumberPurchase {
            phone_number: &req.phone_number,
            friendly_name,
            voice_url: &callbacks.voice,
            status_callback_url: &callbacks.status,
            sms_url: &callbacks.sms,
        })
        .await
        .map_err(twilio_error)?;
    tracing::info!("Purchased {} ({}) for org {}", purchased.phone_number, purchased.sid, claims.organization_id);

    let number = db::phone_numbers::create(
        &state.db,
        NewPhoneNumber {
            organization_id: claims.organization_id,
            number: &purchased.phone_number,
            provider_id: &purchased.sid,
            agent_id: req.agent_id,
            capabilities: purchased.capabilities.clone(),
            country: None,
            friendly_name: purchased.friendly_name.as_deref().or(Some(friendly_name)),
            metadata: serde_json::json!({
                "voiceUrl": callbacks.voice,
                "statusCallback": callbacks.status,
                "smsUrl": callbacks.sms,
            }),
        },
    )
    .await
    .map_err(db_error)?;

    Ok((StatusCode::CREATED, Json(number)))
}

pub async fn list_numbers(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<Vec<PhoneNumberWithAgent>>, ApiRejection> {
    let numbers = db::phone_numbers::get_all(&state.db, claims.organization_id)
        .await
        .map_err(db_error)?;

    let mut agent_ids: Vec<Uuid> = numbers.iter().filter_map(|n| n.agent_id).collect();
    agent_ids.sort();
    agent_ids.dedup();
    let agents = db::agents::get_summaries(&state.db, &agent_ids)
        .await
        .map_err(db_error)?;

    Ok(Json(
        numbers
            .into_iter()
            .map(|number| {
                let agent = agents.iter().find(|a| Some(a.id) == number.agent_id).cloned();
                PhoneNumberWithAgent { number, agent }
            })
            .collect(),
    ))
}

pub async fn update_number(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateNumberRequest>,
) -> Result<Json<PhoneNumber>, ApiRejection> {
    let existing = db::phone_numbers::get_by_id(&state.db, id, claims.organization_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Phone number not found"))?;

    if let Some(agent_id) = req.agent_id {
        db::agents::get_by_id(&state.db, agent_id, claims.organization_id)
            .await
            .map_err(db_error)?
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Agent not found"))?;
    }

    if let Some(name) = req.friendly_name.as_deref() {
        client(&state)
            .await?
            .update_friendly_name(&existing.provider_id, name)
            .await
            .map_err(twilio_error)?;
    }

    db::phone_numbers::update(&state.db, id, claims.organization_id, req.agent_id, req.friendly_name.as_deref())
        .await
        .map_err(db_error)?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Phone number not found"))
}

/// Release the number at Twilio, then hide it locally
pub async fn delete_number(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiRejection> {
    let existing = db::phone_numbers::get_by_id(&state.db, id, claims.organization_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Phone number not found"))?;

    client(&state)
        .await?
        .release_number(&existing.provider_id)
        .await
        .map_err(twilio_error)?;

    db::phone_numbers::soft_delete(&state.db, id, claims.organization_id)
        .await
        .map_err(db_error)?;
    tracing::info!("Released {} for org {}", existing.number, claims.organization_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn send_sms(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Json(req): Json<SendSmsRequest>,
) -> Result<Json<SmsMessage>, ApiRejection> {
    if req.to.trim().is_empty() || req.body.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "to and body are required"));
    }
    client(&state)
        .await?
        .send_sms(&req.to, &req.from, &req.body)
        .await
        .map(Json)
        .map_err(twilio_error)
}

pub async fn verify_caller_id(
    State(state): State<Arc<AppState>>,
    _claims: auth::Claims,
    Json(req): Json<VerifyCallerIdRequest>,
) -> Result<Json<ValidationRequest>, ApiRejection> {
    client(&state)
        .await?
        .create_validation_request(&req.phone_number, &req.phone_number)
        .await
        .map(Json)
        .map_err(twilio_error)
}

pub async fn usage(
    State(state): State<Arc<AppState>>,
    claims: auth::Claims,
) -> Result<Json<TelephonyUsage>, ApiRejection> {
    let active_numbers = db::phone_numbers::count_active(&state.db, claims.organization_id)
        .await
        .map_err(db_error)?;
    let calls_last_30_days = db::calls::count_since(&state.db, claims.organization_id, Utc::now() - Duration::days(30))
        .await
        .map_err(db_error)?;

    Ok(Json(TelephonyUsage { active_numbers, calls_last_30_days }))
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

    #[test]
    fn test_callbacks_use_public_base() {
        let callbacks = Callbacks::new("https://voice.acme.test/");
        assert_eq!(callbacks.voice, "https://voice.acme.test/api/webhooks/twilio/incoming-call");
        assert_eq!(callbacks.status, "https://voice.acme.test/api/webhooks/twilio/call-status");
        assert_eq!(callbacks.sms, "https://voice.acme.test/api/webhooks/twilio/sms");
    }

    #[tokio::test]
    async fn test_unconfigured_search_is_bad_request() {
        let app = create_router(test_support::state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/integrations/twilio/search?areaCode=415")
                    .header("authorization", test_support::bearer())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sms_goes_through_twilio() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/Accounts/AC123/Messages.json")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("To".into(), "+15550001111".into()),
                Matcher::UrlEncoded("Body".into(), "Your appointment is confirmed".into()),
            ]))
            .with_status(201)
            .with_body(r#"{"sid":"SM1","status":"queued","to":"+15550001111","from":"+15550002222"}"#)
            .create_async()
            .await;

        let mut state = test_support::state();
        state.config.twilio_base_url = server.url();
        {
            let mut settings = state.integrations.write().await;
            settings.twilio_account_sid = Some("AC123".to_string());
            settings.twilio_auth_token = Some("token".to_string());
        }

        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/integrations/twilio/sms")
                    .header("authorization", test_support::bearer())
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "to": "+15550001111",
                            "from": "+15550002222",
                            "body": "Your appointment is confirmed"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let sms: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(sms["sid"], "SM1");
        mock.assert_async().await;
    }
}
