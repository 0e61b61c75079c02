//! Outlook adapter (Microsoft Graph v1.0, signed-in user's calendar)

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::json;

use super::oauth::{self, OAuthApp, OAuthTokens};
use super::{
    credential, send_json, Availability, AvailabilityQuery, BusyPeriod, CalendarError, CalendarEvent,
    CalendarKind, CalendarProvider, CancelledEvent, CreateEvent, EventList, ListEventsQuery,
};

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const SCOPE: &str = "https://graph.microsoft.com/Calendars.ReadWrite offline_access";

pub struct OutlookCalendarProvider {
    client: Client,
    base_url: String,
    app: OAuthApp,
    credentials: serde_json::Value,
}

/// Graph returns zone-less timestamps with 7 fractional digits
fn graph_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let raw = value["dateTime"].as_str()?;
    raw.parse::<NaiveDateTime>()
        .ok()
        .map(|t| t.and_utc())
        .or_else(|| raw.parse::<DateTime<Utc>>().ok())
}

fn graph_stamp(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl OutlookCalendarProvider {
    pub fn from_credentials(client: Client, credentials: &serde_json::Value) -> Result<Self, CalendarError> {
        let client_id = credential(credentials, "clientId", "MICROSOFT_CLIENT_ID")
            .ok_or(CalendarError::MissingCredential("clientId"))?;
        let client_secret = credential(credentials, "clientSecret", "MICROSOFT_CLIENT_SECRET")
            .ok_or(CalendarError::MissingCredential("clientSecret"))?;

        Ok(Self {
            client,
            base_url: credential(credentials, "baseUrl", "MICROSOFT_GRAPH_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            app: OAuthApp {
                client_id,
                client_secret,
                redirect_uri: credential(credentials, "redirectUri", "MICROSOFT_REDIRECT_URI"),
                authorize_url: AUTHORIZE_URL.to_string(),
                token_url: credential(credentials, "tokenUrl", "MICROSOFT_TOKEN_URL")
                    .unwrap_or_else(|| TOKEN_URL.to_string()),
                scope: SCOPE.to_string(),
                extra_params: vec![("response_mode", "query")],
            },
            credentials: credentials.clone(),
        })
    }

    async fn token(&self) -> Result<String, CalendarError> {
        oauth::access_token(&self.app, &self.client, &self.credentials).await
    }

    fn event_from(item: &serde_json::Value) -> CalendarEvent {
        CalendarEvent {
            id: item["id"].as_str().unwrap_or_default().to_string(),
            summary: item["subject"].as_str().map(str::to_string),
            description: item["body"]["content"].as_str().map(str::to_string),
            start_time: item["start"]["dateTime"].as_str().map(str::to_string),
            end_time: item["end"]["dateTime"].as_str().map(str::to_string),
            location: item["location"]["displayName"].as_str().map(str::to_string),
            html_link: item["webLink"].as_str().map(str::to_string),
            attendees: item["attendees"].clone(),
        }
    }
}

#[async_trait::async_trait]
impl CalendarProvider for OutlookCalendarProvider {
    fn kind(&self) -> CalendarKind {
        CalendarKind::Outlook
    }

    /// Busy and tentative schedule items count as busy; times are exchanged in UTC
    async fn check_availability(&self, query: &AvailabilityQuery) -> Result<Availability, CalendarError> {
        let token = self.token().await?;
        let request = self
            .client
            .post(format!("{}/me/calendar/getSchedule", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "schedules": ["me"],
                "startTime": { "dateTime": graph_stamp(query.start_time), "timeZone": "UTC" },
                "endTime": { "dateTime": graph_stamp(query.end_time), "timeZone": "UTC" },
                "availabilityViewInterval": 30,
            }));
        let response = send_json(request).await?;

        let busy: Vec<BusyPeriod> = response["value"][0]["scheduleItems"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| matches!(item["status"].as_str(), Some("busy") | Some("tentative")))
                    .filter_map(|item| {
                        Some(BusyPeriod { start: graph_time(&item["start"])?, end: graph_time(&item["end"])? })
                    })
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!("Checked availability: {} busy periods found", busy.len());
        Ok(Availability::new(query, busy))
    }

    async fn create_event(&self, event: &CreateEvent) -> Result<CalendarEvent, CalendarError> {
        let token = self.token().await?;
        let attendees: Vec<_> = event
            .attendees
            .iter()
            .map(|email| json!({ "emailAddress": { "address": email }, "type": "required" }))
            .collect();

        let request = self
            .client
            .post(format!("{}/me/calendar/events", self.base_url))
            .bearer_auth(token)
            .json(&json!({
                "subject": event.summary,
                "body": { "contentType": "HTML", "content": event.description.as_deref().unwrap_or_default() },
                "start": { "dateTime": graph_stamp(event.start_time), "timeZone": "UTC" },
                "end": { "dateTime": graph_stamp(event.end_time), "timeZone": "UTC" },
                "location": { "displayName": event.location },
                "attendees": attendees,
                "isReminderOn": true,
                "reminderMinutesBeforeStart": 30,
                "extensions": [{
                    "@odata.type": "microsoft.graph.openTypeExtension",
                    "extensionName": "com.voiceagents.metadata",
                    "call_id": event.call_id,
                    "created_by": "voice-agents",
                }],
            }));
        let response = send_json(request).await?;

        let created = Self::event_from(&response);
        tracing::info!("Event created in Outlook Calendar: {}", created.id);
        Ok(created)
    }

    async fn list_upcoming_events(&self, query: &ListEventsQuery) -> Result<EventList, CalendarError> {
        let token = self.token().await?;
        let mut filters = vec![format!("start/dateTime ge '{}'", graph_stamp(query.time_min()))];
        if let Some(time_max) = query.time_max {
            filters.push(format!("end/dateTime le '{}'", graph_stamp(time_max)));
        }
        let params = [
            ("$top", query.max_results().to_string()),
            ("$orderby", "start/dateTime".to_string()),
            ("$select", "id,subject,body,start,end,location,attendees,webLink".to_string()),
            ("$filter", filters.join(" and ")),
        ];

        let request = self
            .client
            .get(format!("{}/me/calendar/events", self.base_url))
            .query(&params)
            .bearer_auth(token);
        let response = send_json(request).await?;

        let events: Vec<CalendarEvent> = response["value"]
            .as_array()
            .map(|items| items.iter().map(Self::event_from).collect())
            .unwrap_or_default();
        Ok(EventList { total: events.len(), events })
    }

    async fn cancel_event(&self, event_id: &str) -> Result<CancelledEvent, CalendarError> {
        let token = self.token().await?;
        let request = self
            .client
            .delete(format!("{}/me/calendar/events/{}", self.base_url, event_id))
            .bearer_auth(token);
        send_json(request).await?;

        tracing::info!("Event cancelled in Outlook Calendar: {}", event_id);
        Ok(CancelledEvent { success: true, event_id: event_id.to_string() })
    }

    async fn test_connection(&self) -> Result<serde_json::Value, CalendarError> {
        let token = self.token().await?;
        let request = self.client.get(format!("{}/me/calendar", self.base_url)).bearer_auth(token);
        let response = send_json(request).await?;
        Ok(json!({ "connected": true, "calendarName": response["name"] }))
    }

    fn auth_url(&self) -> Result<String, CalendarError> {
        self.app.consent_url()
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, CalendarError> {
        self.app.exchange_code(&self.client, code).await
    }
}
