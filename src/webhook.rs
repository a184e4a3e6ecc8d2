//! Webhook event fan-out (spec §4.6).
//!
//! Delivery never blocks the triggering request: callers `tokio::spawn`
//! [`WebhookDispatcher::dispatch`] and move on. Failures are logged and
//! recorded as [`crate::metadata::WebhookDelivery`] rows, never surfaced.

use crate::metadata::{MetadataStore, SiteConfig, WebhookDelivery};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const MAX_CONCURRENT_DELIVERIES: usize = 5;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DISABLE_AFTER_FAILURES: u32 = 5;

type HmacSha256 = Hmac<Sha256>;

/// Reject SSRF-prone targets before ever issuing a request (spec §4.6 step 1).
pub fn ssrf_guard(url: &str) -> Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("invalid url: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{other}' is not allowed")),
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| "url has no host".to_string())?
        .to_ascii_lowercase();
    if is_blocked_host(&host) {
        return Err(format!("host '{host}' is blocked"));
    }
    Ok(())
}

fn is_blocked_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host == "localhost" || host == "0.0.0.0" || host == "::1" {
        return true;
    }
    if host.starts_with("127.") || host.starts_with("10.") || host.starts_with("192.168.") || host.starts_with("169.254.") {
        return true;
    }
    if host.starts_with("fd00:") || host.starts_with("fe80:") {
        return true;
    }
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next() {
            if let Ok(octet) = second.parse::<u8>() {
                return (16..=31).contains(&octet);
            }
        }
    }
    false
}

fn sign(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookDispatcher {
    metadata: Arc<dyn MetadataStore>,
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("reqwest client builds with static config");
        Self { metadata, http }
    }

    /// Deliver `event_type` to every active webhook subscribed to it (or
    /// to `*`), in batches of at most [`MAX_CONCURRENT_DELIVERIES`].
    pub async fn dispatch(&self, event_type: &str, data: serde_json::Value) {
        let webhooks = match self.metadata.get_webhooks_for_event(event_type).await {
            Ok(hooks) => hooks,
            Err(e) => {
                tracing::warn!(error = %e, event_type, "failed to load webhooks for event");
                return;
            }
        };
        if webhooks.is_empty() {
            return;
        }
        let body = serde_json::json!({
            "event": event_type,
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        })
        .to_string();

        stream::iter(webhooks.into_iter().map(|webhook| {
            let body = body.clone();
            let event_type = event_type.to_string();
            async move {
                self.deliver_one(webhook, event_type, body).await;
            }
        }))
        .buffer_unordered(MAX_CONCURRENT_DELIVERIES)
        .collect::<Vec<()>>()
        .await;
    }

    async fn deliver_one(&self, webhook: crate::metadata::Webhook, event_type: String, body: String) {
        if let Err(reason) = ssrf_guard(&webhook.url) {
            tracing::warn!(webhook_id = %webhook.id, reason, "webhook url rejected by SSRF guard");
            let _ = self.metadata.record_webhook_failure(&webhook.id, true).await;
            let _ = self
                .metadata
                .record_webhook_delivery(WebhookDelivery {
                    id: Uuid::new_v4().to_string(),
                    webhook_id: webhook.id.clone(),
                    event_type,
                    payload: body,
                    status_code: 0,
                    success: false,
                    error: Some(reason),
                    duration_ms: 0,
                    at: Utc::now(),
                })
                .await;
            self.notify_admins_disabled(&webhook.id).await;
            return;
        }

        let delivery_id = Uuid::new_v4().to_string();
        let mut request = self
            .http
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Event", event_type.clone())
            .header("X-Webhook-Delivery", delivery_id.clone());
        if let Some(secret) = &webhook.secret {
            request = request.header("X-Webhook-Signature", sign(secret, &body));
        }

        let start = std::time::Instant::now();
        let outcome = request.body(body.clone()).send().await;
        let duration_ms = start.elapsed().as_millis() as i64;

        let (status_code, success, error) = match outcome {
            Ok(response) => {
                let status = response.status();
                (status.as_u16() as i32, status.is_success(), (!status.is_success()).then(|| format!("http {status}")))
            }
            Err(e) => (0, false, Some(e.to_string())),
        };

        if success {
            let _ = self.metadata.record_webhook_success(&webhook.id).await;
        } else {
            let new_failure_count = webhook.failure_count + 1;
            let disable = new_failure_count >= DISABLE_AFTER_FAILURES;
            let _ = self.metadata.record_webhook_failure(&webhook.id, disable).await;
            if disable {
                self.notify_admins_disabled(&webhook.id).await;
            }
        }

        let _ = self
            .metadata
            .record_webhook_delivery(WebhookDelivery {
                id: delivery_id,
                webhook_id: webhook.id,
                event_type,
                payload: body,
                status_code,
                success,
                error,
                duration_ms,
                at: Utc::now(),
            })
            .await;
    }

    /// Email delivery is out of scope (SMTP wire behavior is an external
    /// collaborator); this records the intent to notify so an operator
    /// reading logs can act on it.
    async fn notify_admins_disabled(&self, webhook_id: &str) {
        match self.metadata.get_site_config("admin_notification_email").await {
            Ok(Some(SiteConfig { value, .. })) => {
                tracing::info!(webhook_id, admin_email = %value, "webhook disabled after repeated failures, admin notification queued");
            }
            Ok(None) => {
                tracing::debug!(webhook_id, "webhook disabled after repeated failures, no admin_notification_email configured");
            }
            Err(e) => {
                tracing::debug!(webhook_id, error = %e, "failed to read admin_notification_email");
            }
        }
    }
}

</content>
