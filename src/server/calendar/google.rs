//! Google Calendar adapter (Calendar API v3, primary calendar)

use reqwest::Client;
use serde_json::json;

use super::oauth::{self, OAuthApp, OAuthTokens};
use super::{
    credential, send_json, Availability, AvailabilityQuery, BusyPeriod, CalendarError, CalendarEvent,
    CalendarKind, CalendarProvider, CancelledEvent, CreateEvent, EventList, ListEventsQuery, DEFAULT_TIMEZONE,
};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/calendar https://www.googleapis.com/auth/calendar.events";

pub struct GoogleCalendarProvider {
    client: Client,
    base_url: String,
    app: OAuthApp,
    credentials: serde_json::Value,
}

impl GoogleCalendarProvider {
    pub fn from_credentials(client: Client, credentials: &serde_json::Value) -> Result<Self, CalendarError> {
        let client_id = credential(credentials, "clientId", "GOOGLE_CLIENT_ID")
            .ok_or(CalendarError::MissingCredential("clientId"))?;
        let client_secret = credential(credentials, "clientSecret", "GOOGLE_CLIENT_SECRET")
            .ok_or(CalendarError::MissingCredential("clientSecret"))?;

        Ok(Self {
            client,
            base_url: credential(credentials, "baseUrl", "GOOGLE_CALENDAR_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            app: OAuthApp {
                client_id,
                client_secret,
                redirect_uri: credential(credentials, "redirectUri", "GOOGLE_REDIRECT_URI"),
                authorize_url: AUTHORIZE_URL.to_string(),
                token_url: credential(credentials, "tokenUrl", "GOOGLE_TOKEN_URL")
                    .unwrap_or_else(|| TOKEN_URL.to_string()),
                scope: SCOPE.to_string(),
                extra_params: vec![("access_type", "offline"), ("prompt", "consent")],
            },
            credentials: credentials.clone(),
        })
    }

    async fn token(&self) -> Result<String, CalendarError> {
        oauth::access_token(&self.app, &self.client, &self.credentials).await
    }

    fn event_from(item: &serde_json::Value) -> CalendarEvent {
        let time = |key: &str| {
            item[key]["dateTime"]
                .as_str()
                .or_else(|| item[key]["date"].as_str())
                .map(str::to_string)
        };
        CalendarEvent {
            id: item["id"].as_str().unwrap_or_default().to_string(),
            summary: item["summary"].as_str().map(str::to_string),
            description: item["description"].as_str().map(str::to_string),
            start_time: time("start"),
            end_time: time("end"),
            location: item["location"].as_str().map(str::to_string),
            html_link: item["htmlLink"].as_str().map(str::to_string),
            attendees: item["attendees"].clone(),
        }
    }
}

#[async_trait::async_trait]
impl CalendarProvider for GoogleCalendarProvider {
    fn kind(&self) -> CalendarKind {
        CalendarKind::Google
    }

    async fn check_availability(&self, query: &AvailabilityQuery) -> Result<Availability, CalendarError> {
        let token = self.token().await?;
        let request = self
            .client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "timeMin": query.start_time.to_rfc3339(),
                "timeMax": query.end_time.to_rfc3339(),
                "timeZone": query.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE),
                "items": [{ "id": "primary" }],
            }));
        let response = send_json(request).await?;

        let busy: Vec<BusyPeriod> = serde_json::from_value(response["calendars"]["primary"]["busy"].clone())
            .unwrap_or_default();
        tracing::info!("Checked availability: {} busy periods found", busy.len());
        Ok(Availability::new(query, busy))
    }

    async fn create_event(&self, event: &CreateEvent) -> Result<CalendarEvent, CalendarError> {
        let token = self.token().await?;
        let timezone = event.timezone();
        let attendees: Vec<_> = event.attendees.iter().map(|email| json!({ "email": email })).collect();

        let request = self
            .client
            .post(format!("{}/calendars/primary/events", self.base_url))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token)
            .json(&json!({
                "summary": event.summary,
                "description": event.description,
                "location": event.location,
                "start": { "dateTime": event.start_time.to_rfc3339(), "timeZone": timezone },
                "end": { "dateTime": event.end_time.to_rfc3339(), "timeZone": timezone },
                "attendees": attendees,
                "reminders": {
                    "useDefault": false,
                    "overrides": [
                        { "method": "email", "minutes": 24 * 60 },
                        { "method": "popup", "minutes": 30 },
                    ],
                },
                "extendedProperties": {
                    "private": { "call_id": event.call_id, "created_by": "voice-agents" },
                },
            }));
        let response = send_json(request).await?;

        let created = Self::event_from(&response);
        tracing::info!("Event created in Google Calendar: {}", created.id);
        Ok(created)
    }

    async fn list_upcoming_events(&self, query: &ListEventsQuery) -> Result<EventList, CalendarError> {
        let token = self.token().await?;
        let mut params = vec![
            ("timeMin", query.time_min().to_rfc3339()),
            ("maxResults", query.max_results().to_string()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(time_max) = query.time_max {
            params.push(("timeMax", time_max.to_rfc3339()));
        }

        let request = self
            .client
            .get(format!("{}/calendars/primary/events", self.base_url))
            .query(&params)
            .bearer_auth(token);
        let response = send_json(request).await?;

        let events: Vec<CalendarEvent> = response["items"]
            .as_array()
            .map(|items| items.iter().map(Self::event_from).collect())
            .unwrap_or_default();
        Ok(EventList { total: events.len(), events })
    }

    async fn cancel_event(&self, event_id: &str) -> Result<CancelledEvent, CalendarError> {
        let token = self.token().await?;
        let request = self
            .client
            .delete(format!("{}/calendars/primary/events/{}", self.base_url, event_id))
            .query(&[("sendUpdates", "all")])
            .bearer_auth(token);
        send_json(request).await?;

        tracing::info!("Event cancelled in Google Calendar: {}", event_id);
        Ok(CancelledEvent { success: true, event_id: event_id.to_string() })
    }

    async fn test_connection(&self) -> Result<serde_json::Value, CalendarError> {
        let token = self.token().await?;
        let request = self
            .client
            .get(format!("{}/users/me/calendarList", self.base_url))
            .query(&[("maxResults", "1")])
            .bearer_auth(token);
        let response = send_json(request).await?;
        let count = response["items"].as_array().map(Vec::len).unwrap_or(0);
        Ok(json!({ "connected": true, "calendarCount": count }))
    }

    fn auth_url(&self) -> Result<String, CalendarError> {
        self.app.consent_url()
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, CalendarError> {
        self.app.exchange_code(&self.client, code).await
    }
}
