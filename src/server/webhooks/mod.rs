//! Outbound custom webhook delivery
//!
//! Jobs are queued on an unbounded channel and drained by a small worker
//! pool. A failed attempt is re-queued after an exponential backoff until
//! the job runs out of attempts. Every attempt is logged as a delivery row,
//! and a webhook whose last ten deliveries all failed is disabled.

pub mod signing;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{
    CustomWebhook, NewDelivery, OperationResult, WebhookDelivery, WebhookEvent, WebhookMethod,
    SUPPORTED_EVENTS, WEBHOOK_TEST,
};
pub use store::{PgWebhookStore, WebhookStore};

pub const MAX_ATTEMPTS: u32 = 3;
pub const BACKOFF_BASE: Duration = Duration::from_millis(2000);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const AGENT: &str = "VoiceAgents-Webhook/1.0";
/// Consecutive failures that disable a webhook
pub const FAILURE_WINDOW: i64 = 10;
pub const DISABLED_REASON: &str = "Too many consecutive failures";
/// Daily at 03:00 UTC
const PRUNE_SCHEDULE: &str = "0 0 3 * * *";
const MAX_RESPONSE_BODY: usize = 4096;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Webhook not found")]
    WebhookNotFound,
    #[error("Delivery not found")]
    DeliveryNotFound,
    #[error("Delivery was already successful")]
    AlreadySucceeded,
    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),
    #[error("Unsupported event: {0}")]
    UnsupportedEvent(String),
    #[error("Delivery queue is closed")]
    QueueClosed,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Absolute http(s) URL with a host
pub fn validate_url(raw: &str) -> Result<(), DeliveryError> {
    let url = url::Url::parse(raw).map_err(|e| DeliveryError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(()),
        "http" | "https" => Err(DeliveryError::InvalidUrl("missing host".to_string())),
        other => Err(DeliveryError::InvalidUrl(format!("unsupported scheme {}", other))),
    }
}

pub fn validate_events(events: &[String]) -> Result<(), DeliveryError> {
    if events.is_empty() {
        return Err(DeliveryError::UnsupportedEvent("at least one event is required".to_string()));
    }
    match events.iter().find(|e| !SUPPORTED_EVENTS.contains(&e.as_str())) {
        Some(unknown) => Err(DeliveryError::UnsupportedEvent(unknown.clone())),
        None => Ok(()),
    }
}

/// Delay before attempt `attempt + 1`, given `attempt` already failed
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryJob {
    pub webhook_id: Uuid,
    pub event: String,
    pub data: serde_json::Value,
    /// 1-based number of the next attempt
    pub attempt: u32,
    pub max_attempts: u32,
}

impl DeliveryJob {
    pub fn new(webhook_id: Uuid, event: &str, data: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            webhook_id,
            event: event.to_string(),
            data,
            attempt: 1,
            max_attempts,
        }
    }
}

/// Handle to the delivery queue, cheap to clone
#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Arc<dyn WebhookStore>,
    http: Client,
    sender: mpsc::UnboundedSender<DeliveryJob>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<DeliveryJob>>>,
    cancel: CancellationToken,
    backoff_base: Duration,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>, http: Client) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            http,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            cancel: CancellationToken::new(),
            backoff_base: BACKOFF_BASE,
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Spawn `workers` tasks draining the queue until shutdown
    pub fn start(&self, workers: usize) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting {} webhook delivery workers", workers.max(1));
        (0..workers.max(1))
            .map(|worker| {
                let dispatcher = self.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker).await })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn run_worker(&self, worker: usize) {
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = async { self.receiver.lock().await.recv().await } => job,
            };
            let Some(job) = job else { break };
            self.process(job).await;
        }
        tracing::debug!("Webhook worker {} stopped", worker);
    }

    fn enqueue(&self, job: DeliveryJob) -> Result<(), DeliveryError> {
        self.sender.send(job).map_err(|_| DeliveryError::QueueClosed)
    }

    /// Queue one job per active webhook of the organization subscribed to `event`
    pub async fn trigger(
        &self,
        event: &str,
        data: serde_json::Value,
        organization_id: Uuid,
    ) -> Result<usize, DeliveryError> {
        let webhooks = self.store.subscribed(organization_id, event).await?;
        if webhooks.is_empty() {
            tracing::debug!("No active webhooks for event {}", event);
            return Ok(0);
        }

        tracing::info!("Triggering {} webhooks for event {}", webhooks.len(), event);
        for webhook in &webhooks {
            self.enqueue(DeliveryJob::new(webhook.id, event, data.clone(), MAX_ATTEMPTS))?;
        }
        Ok(webhooks.len())
    }

    /// Fire-and-forget variant used by event sources that must not fail
    pub async fn notify(&self, event: &str, data: serde_json::Value, organization_id: Uuid) {
        if let Err(e) = self.trigger(event, data, organization_id).await {
            tracing::error!("Failed to trigger {} webhooks for org {}: {}", event, organization_id, e);
        }
    }

    async fn process(&self, job: DeliveryJob) {
        let delivered = match self.deliver(job.webhook_id, &job.event, &job.data).await {
            Ok(Some(delivery)) => delivery.success,
            Ok(None) => return,
            Err(e) => {
                tracing::error!("Webhook {} delivery errored: {}", job.webhook_id, e);
                false
            }
        };
        if delivered {
            return;
        }

        if job.attempt >= job.max_attempts {
            tracing::error!(
                "Webhook {} delivery of {} failed after {} attempts",
                job.webhook_id, job.event, job.attempt
            );
            return;
        }

        let delay = backoff_delay(self.backoff_base, job.attempt);
        let next = DeliveryJob { attempt: job.attempt + 1, ..job };
        tracing::warn!(
            "Retrying webhook {} in {:?} (attempt {}/{})",
            next.webhook_id, delay, next.attempt, next.max_attempts
        );

        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = dispatcher.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = dispatcher.enqueue(next) {
                        tracing::error!("Failed to requeue webhook delivery: {}", e);
                    }
                }
            }
        });
    }

    /// One delivery attempt. `None` when the webhook is gone or disabled.
    pub async fn deliver(
        &self,
        webhook_id: Uuid,
        event: &str,
        data: &serde_json::Value,
    ) -> Result<Option<WebhookDelivery>, DeliveryError> {
        let webhook = match self.store.webhook(webhook_id).await? {
            Some(w) if w.is_deliverable() => w,
            _ => {
                tracing::warn!("Webhook {} not found or disabled", webhook_id);
                return Ok(None);
            }
        };

        let payload = WebhookEvent::new(event, data.clone());
        let started = Instant::now();
        let outcome = self.send(&webhook, &payload).await;
        let duration_ms = i32::try_from(started.elapsed().as_millis()).unwrap_or(i32::MAX);

        let delivery = match outcome {
            Ok((status, body)) => {
                let success = (200..300).contains(&status);
                NewDelivery {
                    webhook_id,
                    event: event.to_string(),
                    payload,
                    response_status: Some(i32::from(status)),
                    response_body: Some(body),
                    duration_ms: Some(duration_ms),
                    success,
                    error_message: (!success).then(|| format!("Request failed with status code {}", status)),
                }
            }
            Err(e) => NewDelivery {
                webhook_id,
                event: event.to_string(),
                payload,
                response_status: None,
                response_body: None,
                duration_ms: Some(duration_ms),
                success: false,
                error_message: Some(e.to_string()),
            },
        };

        let recorded = self.store.record_delivery(&delivery).await?;
        if recorded.success {
            tracing::info!(
                "Webhook {} delivered successfully ({}ms, status {})",
                webhook_id,
                duration_ms,
                recorded.response_status.unwrap_or_default()
            );
        } else {
            tracing::error!(
                "Webhook {} delivery failed: {}",
                webhook_id,
                recorded.error_message.as_deref().unwrap_or("unknown error")
            );
            self.disable_if_failing(webhook_id).await?;
        }
        Ok(Some(recorded))
    }

    async fn disable_if_failing(&self, webhook_id: Uuid) -> Result<(), DeliveryError> {
        let outcomes = self.store.recent_outcomes(webhook_id, FAILURE_WINDOW).await?;
        if outcomes.len() as i64 >= FAILURE_WINDOW && outcomes.iter().all(|ok| !ok) {
            self.store.disable(webhook_id, DISABLED_REASON).await?;
            tracing::warn!("Webhook {} disabled due to consecutive failures", webhook_id);
        }
        Ok(())
    }

    /// Perform the HTTP request, returning status and (truncated) body
    async fn send(&self, webhook: &CustomWebhook, payload: &WebhookEvent) -> Result<(u16, String), reqwest::Error> {
        let body = serde_json::to_vec(payload).unwrap_or_default();
        let headers = request_headers(webhook, &body);

        let request = match webhook.method {
            WebhookMethod::Post => self.http.post(&webhook.url).body(body),
            WebhookMethod::Get => self.http.get(&webhook.url).query(&[
                ("event", payload.event.clone()),
                ("timestamp", payload.timestamp.clone()),
                ("data", payload.data.to_string()),
            ]),
        };

        let response = request.headers(headers).timeout(REQUEST_TIMEOUT).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text.chars().take(MAX_RESPONSE_BODY).collect()))
    }

    /// Send a `webhook.test` event once, outside the queue
    pub async fn test(&self, webhook_id: Uuid) -> OperationResult {
        let data = serde_json::json!({
            "test": true,
            "message": "This is a test webhook from Voice Agents",
            "timestamp": Utc::now().to_rfc3339(),
        });

        match self.deliver(webhook_id, WEBHOOK_TEST, &data).await {
            Ok(Some(delivery)) if delivery.success => OperationResult::ok("Test webhook sent successfully"),
            Ok(Some(delivery)) => OperationResult::failed(
                delivery.error_message.unwrap_or_else(|| "Delivery failed".to_string()),
            ),
            Ok(None) => OperationResult::failed("Webhook not found or disabled"),
            Err(e) => OperationResult::failed(e.to_string()),
        }
    }

    /// Re-queue a failed delivery for a single attempt
    pub async fn retry(&self, delivery_id: Uuid, organization_id: Uuid) -> Result<(), DeliveryError> {
        let delivery = self
            .store
            .delivery(delivery_id, organization_id)
            .await?
            .ok_or(DeliveryError::DeliveryNotFound)?;
        if delivery.success {
            return Err(DeliveryError::AlreadySucceeded);
        }

        let data = delivery.payload.0.data;
        self.enqueue(DeliveryJob::new(delivery.webhook_id, &delivery.event, data, 1))
    }

    /// Delete delivery logs older than `retention_days`
    pub async fn prune(&self, retention_days: i64) -> Result<u64, DeliveryError> {
        let before = Utc::now() - chrono::Duration::days(retention_days);
        let removed = self.store.prune(before).await?;
        tracing::info!("Pruned {} webhook deliveries older than {} days", removed, retention_days);
        Ok(removed)
    }

    pub async fn schedule_pruning(&self, retention_days: i64) -> Result<JobScheduler, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;
        let dispatcher = self.clone();
        let job = Job::new_async(PRUNE_SCHEDULE, move |_id, _scheduler| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move {
                if let Err(e) = dispatcher.prune(retention_days).await {
                    tracing::error!("Webhook delivery pruning failed: {}", e);
                }
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;
        Ok(scheduler)
    }
}

/// Default headers, then the webhook's own, then the signature
fn request_headers(webhook: &CustomWebhook, body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(AGENT));

    for (name, value) in webhook.headers.0.iter() {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Skipping invalid header {} on webhook {}", name, webhook.id),
        }
    }

    let signature = webhook
        .secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .and_then(|secret| signing::sign(secret, body));
    if let Some(Ok(value)) = signature.map(|s| HeaderValue::from_str(&s)) {
        headers.insert(signing::SIGNATURE_HEADER, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::store::memory::{self, MemoryStore};
    use super::*;
    use crate::models::{CALL_ENDED, CALL_STARTED};
    use mockito::Matcher;

    fn dispatcher(store: Arc<MemoryStore>) -> WebhookDispatcher {
        WebhookDispatcher::new(store, Client::new()).with_backoff_base(Duration::from_millis(20))
    }

    async fn wait_for_deliveries(store: &MemoryStore, webhook_id: Uuid, count: usize) -> Vec<WebhookDelivery> {
        for _ in 0..200 {
            let deliveries = store.deliveries_for(webhook_id).await;
            if deliveries.len() >= count {
                return deliveries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        store.deliveries_for(webhook_id).await
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(BACKOFF_BASE, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(BACKOFF_BASE, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(BACKOFF_BASE, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_url_validation() {
        assert!(validate_url("https://hooks.example.com/in").is_ok());
        assert!(validate_url("http://localhost:8080/hook").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("/relative").is_err());
    }

    #[test]
    fn test_event_validation() {
        assert!(validate_events(&["call.ended".to_string()]).is_ok());
        assert!(validate_events(&[]).is_err());
        assert!(matches!(
            validate_events(&["call.ended".to_string(), "lead.created".to_string()]),
            Err(DeliveryError::UnsupportedEvent(e)) if e == "lead.created"
        ));
    }

    #[test]
    fn test_custom_headers_cannot_forge_signature() {
        let mut webhook = memory::webhook(Uuid::new_v4(), "https://x.test", &[CALL_ENDED]);
        webhook.secret = Some("s3cret".to_string());
        webhook.headers.0.insert("X-Webhook-Signature".to_string(), "forged".to_string());
        webhook.headers.0.insert("X-Tenant".to_string(), "acme".to_string());

        let headers = request_headers(&webhook, b"{}");
        assert_eq!(headers[signing::SIGNATURE_HEADER], signing::sign("s3cret", b"{}").unwrap());
        assert_eq!(headers["x-tenant"], "acme");
        assert_eq!(headers[USER_AGENT], AGENT);
    }

    #[tokio::test]
    async fn test_post_delivery_is_signed_and_recorded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_header("user-agent", AGENT)
            .match_header("x-webhook-signature", Matcher::Regex("^[0-9a-f]{64}$".to_string()))
            .match_body(Matcher::PartialJson(serde_json::json!({"event": "call.ended", "data": {"callId": "c1"}})))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::default());
        let mut webhook = memory::webhook(Uuid::new_v4(), &format!("{}/hook", server.url()), &[CALL_ENDED]);
        webhook.secret = Some("s3cret".to_string());
        let id = webhook.id;
        store.insert(webhook).await;

        let delivery = dispatcher(store.clone())
            .deliver(id, CALL_ENDED, &serde_json::json!({"callId": "c1"}))
            .await
            .unwrap()
            .unwrap();

        assert!(delivery.success);
        assert_eq!(delivery.response_status, Some(200));
        assert_eq!(delivery.response_body.as_deref(), Some("ok"));
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.total_deliveries, 1);
        assert_eq!(stored.successful_deliveries, 1);
        assert!(stored.last_triggered_at.is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_delivery_uses_query_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/hook")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("event".into(), "call.started".into()),
                Matcher::UrlEncoded("data".into(), r#"{"callId":"c1"}"#.into()),
                Matcher::Regex("timestamp=".to_string()),
            ]))
            .with_status(204)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::default());
        let mut webhook = memory::webhook(Uuid::new_v4(), &format!("{}/hook", server.url()), &[CALL_STARTED]);
        webhook.method = WebhookMethod::Get;
        let id = webhook.id;
        store.insert(webhook).await;

        let delivery = dispatcher(store)
            .deliver(id, CALL_STARTED, &serde_json::json!({"callId": "c1"}))
            .await
            .unwrap()
            .unwrap();
        assert!(delivery.success);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_disabled_webhook_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let mut webhook = memory::webhook(Uuid::new_v4(), "http://127.0.0.1:9/hook", &[CALL_ENDED]);
        webhook.enabled = false;
        let id = webhook.id;
        store.insert(webhook).await;

        let result = dispatcher(store.clone()).deliver(id, CALL_ENDED, &serde_json::json!({})).await.unwrap();
        assert!(result.is_none());
        assert!(store.deliveries_for(id).await.is_empty());
        assert!(dispatcher(store).deliver(Uuid::new_v4(), CALL_ENDED, &serde_json::json!({})).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tenth_consecutive_failure_disables_webhook() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("boom")
            .expect(10)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::default());
        let webhook = memory::webhook(Uuid::new_v4(), &format!("{}/hook", server.url()), &[CALL_ENDED]);
        let id = webhook.id;
        store.insert(webhook).await;
        let dispatcher = dispatcher(store.clone());

        for _ in 0..9 {
            let delivery = dispatcher.deliver(id, CALL_ENDED, &serde_json::json!({})).await.unwrap().unwrap();
            assert!(!delivery.success);
            assert_eq!(delivery.response_status, Some(500));
        }
        assert!(store.get(id).await.unwrap().enabled);

        dispatcher.deliver(id, CALL_ENDED, &serde_json::json!({})).await.unwrap();
        let stored = store.get(id).await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.disabled_reason.as_deref(), Some(DISABLED_REASON));
        assert_eq!(stored.failed_deliveries, 10);
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_until_attempts_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(MAX_ATTEMPTS as usize)
            .create_async()
            .await;

        let org = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let webhook = memory::webhook(org, &format!("{}/hook", server.url()), &[CALL_ENDED]);
        let id = webhook.id;
        store.insert(webhook).await;
        // not subscribed to call.ended
        store.insert(memory::webhook(org, &format!("{}/other", server.url()), &[CALL_STARTED])).await;

        let dispatcher = dispatcher(store.clone());
        dispatcher.start(2);
        let queued = dispatcher.trigger(CALL_ENDED, serde_json::json!({"callId": "c1"}), org).await.unwrap();
        assert_eq!(queued, 1);

        let deliveries = wait_for_deliveries(&store, id, MAX_ATTEMPTS as usize).await;
        assert_eq!(deliveries.len(), MAX_ATTEMPTS as usize);
        assert!(deliveries.iter().all(|d| !d.success));
        // no fourth attempt
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.deliveries_for(id).await.len(), MAX_ATTEMPTS as usize);

        dispatcher.shutdown();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retry_rules() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server.mock("POST", "/ok").with_status(200).create_async().await;
        let _fail = server.mock("POST", "/fail").with_status(500).create_async().await;

        let org = Uuid::new_v4();
        let store = Arc::new(MemoryStore::default());
        let healthy = memory::webhook(org, &format!("{}/ok", server.url()), &[CALL_ENDED]);
        let broken = memory::webhook(org, &format!("{}/fail", server.url()), &[CALL_ENDED]);
        let (healthy_id, broken_id) = (healthy.id, broken.id);
        store.insert(healthy).await;
        store.insert(broken).await;
        let dispatcher = dispatcher(store.clone());

        let success = dispatcher.deliver(healthy_id, CALL_ENDED, &serde_json::json!({})).await.unwrap().unwrap();
        let failure = dispatcher
            .deliver(broken_id, CALL_ENDED, &serde_json::json!({"n": 2}))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(dispatcher.retry(success.id, org).await, Err(DeliveryError::AlreadySucceeded)));
        assert!(matches!(
            dispatcher.retry(failure.id, Uuid::new_v4()).await,
            Err(DeliveryError::DeliveryNotFound)
        ));
        dispatcher.retry(failure.id, org).await.unwrap();

        let job = dispatcher.receiver.lock().await.recv().await.unwrap();
        assert_eq!(job.webhook_id, broken_id);
        assert_eq!(job.max_attempts, 1);
        assert_eq!(job.data, serde_json::json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_webhook_test_reports_failure() {
        let store = Arc::new(MemoryStore::default());
        // nothing listens on the discard port
        let webhook = memory::webhook(Uuid::new_v4(), "http://127.0.0.1:9/hook", &[CALL_ENDED]);
        let id = webhook.id;
        store.insert(webhook).await;

        let result = dispatcher(store.clone()).test(id).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(store.deliveries_for(id).await[0].event, WEBHOOK_TEST);
    }

    #[tokio::test]
    async fn test_prune_removes_old_deliveries() {
        let store = Arc::new(MemoryStore::default());
        let webhook_id = Uuid::new_v4();
        let mut delivery = store
            .record_delivery(&NewDelivery {
                webhook_id,
                event: CALL_ENDED.to_string(),
                payload: WebhookEvent::new(CALL_ENDED, serde_json::json!({})),
                response_status: Some(200),
                response_body: None,
                duration_ms: Some(5),
                success: true,
                error_message: None,
            })
            .await
            .unwrap();
        delivery.id = Uuid::new_v4();
        delivery.created_at = Utc::now() - chrono::Duration::days(45);
        store.deliveries.lock().await.push(delivery);

        let removed = dispatcher(store.clone()).prune(30).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.deliveries_for(webhook_id).await.len(), 1);
    }
}
