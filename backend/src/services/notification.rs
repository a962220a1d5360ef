//! Domain event notifications
//!
//! Events are published only after the producing transaction has committed.
//! Delivery is fire-and-forget: every event is logged, and when a webhook is
//! configured the JSON payload is POSTed from a spawned task so printing or
//! messaging collaborators never hold up the accounting core.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use shared::{PaymentStatus, ReturnStatus};
use uuid::Uuid;

use crate::config::NotificationConfig;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "X-Pos-Signature";

/// Something collaborators may want to react to
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    ReturnProcessed {
        order_return_id: Uuid,
        order_id: Uuid,
        total_refund: Decimal,
        total_quantity: Decimal,
        return_status: ReturnStatus,
        reverse_stock: bool,
    },
    PaymentsApplied {
        order_id: Uuid,
        paid: Decimal,
        total: Decimal,
        payment_status: PaymentStatus,
    },
    OrderCompleted {
        order_id: Uuid,
        total: Decimal,
        paid: Decimal,
        payment_status: PaymentStatus,
        table_id: Option<Uuid>,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::ReturnProcessed { .. } => "return_processed",
            DomainEvent::PaymentsApplied { .. } => "payments_applied",
            DomainEvent::OrderCompleted { .. } => "order_completed",
        }
    }

    /// Id of the record the event is about
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            DomainEvent::ReturnProcessed {
                order_return_id, ..
            } => *order_return_id,
            DomainEvent::PaymentsApplied { order_id, .. }
            | DomainEvent::OrderCompleted { order_id, .. } => *order_id,
        }
    }
}

/// Sink for committed domain events
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// Compute the base64 HMAC-SHA256 signature of a payload
pub fn sign_payload(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(BASE64.encode(mac.finalize().into_bytes()))
}

/// Webhook delivery client
#[derive(Clone)]
pub struct WebhookClient {
    url: String,
    secret: Option<String>,
    http_client: reqwest::Client,
}

impl WebhookClient {
    /// Create a new webhook client
    pub fn new(url: String, secret: Option<String>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url,
            secret,
            http_client,
        }
    }

    /// POST an event to the webhook
    pub async fn deliver(&self, event: &DomainEvent) -> Result<(), String> {
        let body = serde_json::to_vec(event)
            .map_err(|e| format!("Failed to encode {} event: {}", event.name(), e))?;

        let mut request = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(signature) = self
            .secret
            .as_deref()
            .and_then(|secret| sign_payload(secret, &body))
        {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| format!("Failed to deliver {} event: {}", event.name(), e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!(
                "Webhook rejected {} event with status {}",
                event.name(),
                response.status()
            ))
        }
    }
}

/// Default publisher: logs every event and forwards it to the webhook if any
#[derive(Clone, Default)]
pub struct Notifier {
    webhook: Option<WebhookClient>,
}

impl Notifier {
    /// Create a notifier that only logs
    pub fn log_only() -> Self {
        Self { webhook: None }
    }

    /// Create from notification configuration
    pub fn from_config(config: &NotificationConfig) -> Self {
        let webhook = config.webhook_url.clone().map(|url| {
            WebhookClient::new(
                url,
                config.webhook_secret.clone(),
                Duration::from_secs(config.timeout_secs),
            )
        });
        Self { webhook }
    }

    pub fn has_webhook(&self) -> bool {
        self.webhook.is_some()
    }
}

impl EventPublisher for Notifier {
    fn publish(&self, event: DomainEvent) {
        tracing::info!(
            event = event.name(),
            aggregate_id = %event.aggregate_id(),
            "Domain event published"
        );

        if let Some(webhook) = self.webhook.clone() {
            tokio::spawn(async move {
                if let Err(e) = webhook.deliver(&event).await {
                    tracing::error!("Failed to notify collaborators: {}", e);
                }
            });
        }
    }
}
