//! Calendar integrations (Google Calendar, Outlook via Microsoft Graph)

pub mod oauth;
pub mod google;
pub mod outlook;

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Activity, ActivityFilter, ConnectionTest, Integration};
use crate::server::crm::connection_report;
use crate::server::db::{self, activities::ActivityLog};

pub use google::GoogleCalendarProvider;
pub use oauth::OAuthTokens;
pub use outlook::OutlookCalendarProvider;

pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";
pub const DEFAULT_SLOT_MINUTES: i64 = 30;
/// Business hours used for slot search, in UTC
pub const BUSINESS_START_HOUR: u32 = 9;
pub const BUSINESS_END_HOUR: u32 = 18;

#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("Unsupported calendar provider: {0}")]
    UnsupportedProvider(String),
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Connection test failed: {0}")]
    ConnectionFailed(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarKind {
    Google,
    Outlook,
}

impl CalendarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarKind::Google => "google",
            CalendarKind::Outlook => "outlook",
        }
    }

    /// Key under which the integration row is stored
    pub fn integration_key(&self) -> String {
        format!("calendar_{}", self.as_str())
    }
}

impl FromStr for CalendarKind {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(CalendarKind::Google),
            "outlook" => Ok(CalendarKind::Outlook),
            other => Err(CalendarError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityQuery {
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusyPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Availability {
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    #[serde(rename = "busyPeriods")]
    pub busy_periods: Vec<BusyPeriod>,
    pub available: bool,
}

impl Availability {
    pub fn new(query: &AvailabilityQuery, busy_periods: Vec<BusyPeriod>) -> Self {
        Self {
            start_time: query.start_time,
            end_time: query.end_time,
            timezone: query.timezone.clone().unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            available: busy_periods.is_empty(),
            busy_periods,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvent {
    pub summary: String,
    pub description: Option<String>,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    pub location: Option<String>,
    #[serde(rename = "callId")]
    pub call_id: Option<Uuid>,
}

impl CreateEvent {
    pub fn validate(&self) -> Result<(), CalendarError> {
        if self.summary.trim().is_empty() {
            return Err(CalendarError::InvalidInput("summary is required".to_string()));
        }
        if self.end_time <= self.start_time {
            return Err(CalendarError::InvalidInput("endTime must be after startTime".to_string()));
        }
        Ok(())
    }

    pub fn timezone(&self) -> &str {
        self.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "startTime")]
    pub start_time: Option<String>,
    #[serde(rename = "endTime")]
    pub end_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "htmlLink", skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    #[serde(default)]
    pub attendees: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventList {
    pub total: usize,
    pub events: Vec<CalendarEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListEventsQuery {
    #[serde(rename = "maxResults")]
    pub max_results: Option<u32>,
    #[serde(rename = "timeMin")]
    pub time_min: Option<DateTime<Utc>>,
    #[serde(rename = "timeMax")]
    pub time_max: Option<DateTime<Utc>>,
}

impl ListEventsQuery {
    pub fn max_results(&self) -> u32 {
        self.max_results.unwrap_or(10)
    }

    pub fn time_min(&self) -> DateTime<Utc> {
        self.time_min.unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelledEvent {
    pub success: bool,
    #[serde(rename = "eventId")]
    pub event_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub timezone: String,
    #[serde(rename = "slotDuration")]
    pub slot_duration: i64,
    #[serde(rename = "totalSlots")]
    pub total_slots: usize,
    #[serde(rename = "availableSlots")]
    pub available_slots: usize,
    pub slots: Vec<TimeSlot>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotQuery {
    pub date: Option<NaiveDate>,
    #[serde(rename = "slotDuration")]
    pub slot_duration: Option<i64>,
    pub timezone: Option<String>,
}

/// Business-hours window for a day
pub fn business_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let at = |hour| {
        let time = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);
        date.and_time(time).and_utc()
    };
    (at(BUSINESS_START_HOUR), at(BUSINESS_END_HOUR))
}

/// Slot length in minutes, bounded by the business window
pub fn slot_step(slot_minutes: i64) -> Result<Duration, CalendarError> {
    let window = i64::from(BUSINESS_END_HOUR - BUSINESS_START_HOUR) * 60;
    if slot_minutes <= 0 || slot_minutes > window {
        return Err(CalendarError::InvalidInput(format!(
            "slotDuration must be between 1 and {} minutes",
            window
        )));
    }
    Ok(Duration::minutes(slot_minutes))
}

/// Split business hours into consecutive slots; a slot is taken when it
/// overlaps any busy period. The last slot may run past closing time.
pub fn split_into_slots(date: NaiveDate, slot_minutes: i64, busy: &[BusyPeriod]) -> Result<Vec<TimeSlot>, CalendarError> {
    let (day_start, day_end) = business_window(date);
    let step = slot_step(slot_minutes)?;

    let mut slots = Vec::new();
    let mut start = day_start;
    while start < day_end {
        let end = start + step;
        let available = !busy.iter().any(|b| start < b.end && end > b.start);
        slots.push(TimeSlot { start, end, available });
        start = end;
    }
    Ok(slots)
}

#[async_trait::async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> CalendarKind;

    async fn check_availability(&self, query: &AvailabilityQuery) -> Result<Availability, CalendarError>;

    async fn create_event(&self, event: &CreateEvent) -> Result<CalendarEvent, CalendarError>;

    async fn list_upcoming_events(&self, query: &ListEventsQuery) -> Result<EventList, CalendarError>;

    async fn cancel_event(&self, event_id: &str) -> Result<CancelledEvent, CalendarError>;

    async fn test_connection(&self) -> Result<serde_json::Value, CalendarError>;

    fn auth_url(&self) -> Result<String, CalendarError>;

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, CalendarError>;
}

pub(crate) fn credential(credentials: &serde_json::Value, key: &str, env_key: &str) -> Option<String> {
    credentials
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(env_key).ok().filter(|v| !v.is_empty()))
}

pub(crate) async fn send_json(request: RequestBuilder) -> Result<serde_json::Value, CalendarError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(CalendarError::Api { status: status.as_u16(), message });
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| CalendarError::Api {
        status: status.as_u16(),
        message: format!("Invalid JSON response: {}", e),
    })
}

/// Orchestrates calendar adapters for an organization
#[derive(Clone)]
pub struct CalendarService {
    pool: PgPool,
    http: Client,
}

impl CalendarService {
    pub fn new(pool: PgPool, http: Client) -> Self {
        Self { pool, http }
    }

    pub fn provider(&self, kind: CalendarKind, credentials: &serde_json::Value) -> Result<Box<dyn CalendarProvider>, CalendarError> {
        Ok(match kind {
            CalendarKind::Google => Box::new(GoogleCalendarProvider::from_credentials(self.http.clone(), credentials)?),
            CalendarKind::Outlook => Box::new(OutlookCalendarProvider::from_credentials(self.http.clone(), credentials)?),
        })
    }

    async fn provider_for_org(&self, organization_id: Uuid, kind: CalendarKind) -> Result<Box<dyn CalendarProvider>, CalendarError> {
        let stored = db::integrations::get(&self.pool, organization_id, &kind.integration_key()).await?;
        let credentials = stored
            .map(|Integration { credentials, .. }| credentials.0)
            .unwrap_or(serde_json::Value::Null);
        self.provider(kind, &credentials)
    }

    pub async fn check_availability(
        &self,
        organization_id: Uuid,
        kind: CalendarKind,
        query: &AvailabilityQuery,
    ) -> Result<Availability, CalendarError> {
        if query.end_time <= query.start_time {
            return Err(CalendarError::InvalidInput("endTime must be after startTime".to_string()));
        }
        tracing::info!("Checking availability in {} for org {}", kind.as_str(), organization_id);
        let provider = self.provider_for_org(organization_id, kind).await?;
        provider.check_availability(query).await
    }

    pub async fn create_event(
        &self,
        organization_id: Uuid,
        kind: CalendarKind,
        event: &CreateEvent,
    ) -> Result<CalendarEvent, CalendarError> {
        event.validate()?;
        tracing::info!("Creating event in {} for org {}", kind.as_str(), organization_id);
        let provider = self.provider_for_org(organization_id, kind).await?;
        let created = provider.create_event(event).await?;

        db::activities::record(
            &self.pool,
            ActivityLog::Calendar,
            organization_id,
            kind.as_str(),
            "event_created",
            event.call_id,
            Some(&created.id),
            serde_json::to_value(&created).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        Ok(created)
    }

    pub async fn list_upcoming_events(
        &self,
        organization_id: Uuid,
        kind: CalendarKind,
        query: &ListEventsQuery,
    ) -> Result<EventList, CalendarError> {
        let provider = self.provider_for_org(organization_id, kind).await?;
        provider.list_upcoming_events(query).await
    }

    pub async fn cancel_event(
        &self,
        organization_id: Uuid,
        kind: CalendarKind,
        event_id: &str,
    ) -> Result<CancelledEvent, CalendarError> {
        let provider = self.provider_for_org(organization_id, kind).await?;
        let cancelled = provider.cancel_event(event_id).await?;

        db::activities::record(
            &self.pool,
            ActivityLog::Calendar,
            organization_id,
            kind.as_str(),
            "event_cancelled",
            None,
            Some(event_id),
            serde_json::json!({ "cancelled": true }),
        )
        .await?;
        Ok(cancelled)
    }

    pub async fn find_available_slots(
        &self,
        organization_id: Uuid,
        kind: CalendarKind,
        date: NaiveDate,
        slot_minutes: Option<i64>,
        timezone: Option<String>,
    ) -> Result<DaySlots, CalendarError> {
        let slot_duration = slot_minutes.unwrap_or(DEFAULT_SLOT_MINUTES);
        slot_step(slot_duration)?;
        let timezone = timezone.unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
        let (start_time, end_time) = business_window(date);

        let availability = self
            .check_availability(
                organization_id,
                kind,
                &AvailabilityQuery { start_time, end_time, timezone: Some(timezone.clone()) },
            )
            .await?;

        let slots = split_into_slots(date, slot_duration, &availability.busy_periods)?;
        Ok(DaySlots {
            date,
            timezone,
            slot_duration,
            total_slots: slots.len(),
            available_slots: slots.iter().filter(|s| s.available).count(),
            slots,
        })
    }

    pub async fn test_connection(&self, kind: CalendarKind, credentials: &serde_json::Value) -> ConnectionTest {
        let result = match self.provider(kind, credentials) {
            Ok(provider) => provider.test_connection().await,
            Err(e) => Err(e),
        };
        connection_report(kind.as_str(), result)
    }

    pub async fn list_activities(&self, organization_id: Uuid, filter: &ActivityFilter) -> Result<Vec<Activity>, CalendarError> {
        Ok(db::activities::list(&self.pool, ActivityLog::Calendar, organization_id, filter).await?)
    }

    pub async fn configure(
        &self,
        organization_id: Uuid,
        kind: CalendarKind,
        enabled: bool,
        credentials: serde_json::Value,
        settings: Option<serde_json::Value>,
    ) -> Result<Integration, CalendarError> {
        if enabled {
            let report = self.test_connection(kind, &credentials).await;
            if !report.success {
                return Err(CalendarError::ConnectionFailed(report.error.unwrap_or_default()));
            }
        }

        let settings = settings.unwrap_or_else(|| serde_json::json!({}));
        Ok(db::integrations::upsert(
            &self.pool,
            organization_id,
            &kind.integration_key(),
            enabled,
            credentials,
            settings,
        )
        .await?)
    }

    /// Consent URL built from the organization's stored client credentials
    pub async fn auth_url(&self, organization_id: Uuid, kind: CalendarKind) -> Result<String, CalendarError> {
        self.provider_for_org(organization_id, kind).await?.auth_url()
    }

    pub async fn exchange_code(&self, organization_id: Uuid, kind: CalendarKind, code: &str) -> Result<OAuthTokens, CalendarError> {
        self.provider_for_org(organization_id, kind).await?.exchange_code(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn test_free_day_has_eighteen_half_hour_slots() {
        let slots = split_into_slots(date(), 30, &[]).unwrap();
        assert_eq!(slots.len(), 18);
        assert!(slots.iter().all(|s| s.available));
        assert_eq!(slots[0].start, at(9, 0));
        assert_eq!(slots[17].end, at(18, 0));
    }

    #[test]
    fn test_busy_period_blocks_overlapping_slots() {
        let busy = vec![BusyPeriod { start: at(10, 15), end: at(11, 0) }];
        let slots = split_into_slots(date(), 30, &busy).unwrap();
        let taken: Vec<_> = slots.iter().filter(|s| !s.available).map(|s| s.start).collect();
        assert_eq!(taken, vec![at(10, 0), at(10, 30)]);
    }

    #[test]
    fn test_adjacent_busy_period_does_not_block() {
        let busy = vec![BusyPeriod { start: at(8, 0), end: at(9, 0) }];
        let slots = split_into_slots(date(), 30, &busy).unwrap();
        assert!(slots[0].available);
    }

    #[test]
    fn test_busy_period_covering_slot() {
        let busy = vec![BusyPeriod { start: at(12, 0), end: at(14, 0) }];
        let slots = split_into_slots(date(), 60, &busy).unwrap();
        assert_eq!(slots.len(), 9);
        assert_eq!(slots.iter().filter(|s| !s.available).count(), 2);
    }

    #[test]
    fn test_uneven_duration_overruns_closing() {
        let slots = split_into_slots(date(), 45, &[]).unwrap();
        assert_eq!(slots.len(), 12);
        assert_eq!(slots.last().unwrap().end, at(18, 0));
        let slots = split_into_slots(date(), 40, &[]).unwrap();
        // 540 minutes / 40 leaves a final slot ending at 18:20
        assert_eq!(slots.len(), 14);
        assert_eq!(slots.last().unwrap().end, at(18, 20));
    }

    #[test]
    fn test_slot_duration_bounded_by_business_window() {
        assert_eq!(split_into_slots(date(), 540, &[]).unwrap().len(), 1);
        for minutes in [0, -15, 541, 1_000_000_000_000, i64::MAX] {
            assert!(matches!(
                split_into_slots(date(), minutes, &[]),
                Err(CalendarError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_kind_integration_key() {
        assert_eq!("outlook".parse::<CalendarKind>().unwrap().integration_key(), "calendar_outlook");
        assert!("icloud".parse::<CalendarKind>().is_err());
    }

    #[test]
    fn test_create_event_validation() {
        let mut event = CreateEvent {
            summary: "Demo".to_string(),
            description: None,
            start_time: at(10, 0),
            end_time: at(10, 30),
            timezone: None,
            attendees: vec![],
            location: None,
            call_id: None,
        };
        assert!(event.validate().is_ok());
        assert_eq!(event.timezone(), DEFAULT_TIMEZONE);
        event.end_time = at(9, 0);
        assert!(matches!(event.validate(), Err(CalendarError::InvalidInput(_))));
    }
}
