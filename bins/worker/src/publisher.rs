//! Outbox publishers shipped with the worker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderValue};

use tally_core::outbox::{OutboxMessage, PublishError, Publisher};
use tally_shared::config::{PublisherConfig, PublisherKind};

/// Longest response body kept in a rejection error.
const MAX_ERROR_BODY: usize = 512;

/// Builds the publisher selected by configuration.
///
/// # Errors
///
/// Returns an error if the webhook publisher has no endpoint or its HTTP
/// client cannot be built.
pub fn from_config(config: &PublisherConfig) -> anyhow::Result<Box<dyn Publisher>> {
    match config.kind {
        PublisherKind::Log => Ok(Box::new(LogPublisher)),
        PublisherKind::Webhook => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("publisher.endpoint is required for webhook"))?;
            Ok(Box::new(WebhookPublisher::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}

/// Writes each message to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, message: &OutboxMessage) -> Result<String, PublishError> {
        let payload = serde_json::to_string(&message.event)?;
        tracing::info!(
            record_id = %message.record_id,
            attempt = message.attempt,
            tenant_id = %message.event.tenant_id,
            reference = %message.event.document(),
            action = message.event.action.as_str(),
            payload = %payload,
            "Outbox event"
        );
        Ok(message.record_id.to_string())
    }
}

/// POSTs each message as JSON to an HTTP endpoint.
///
/// The record id goes out as `Idempotency-Key` so receivers can drop
/// redeliveries.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: Client,
    endpoint: String,
}

impl WebhookPublisher {
    /// Creates a publisher with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn publish(&self, message: &OutboxMessage) -> Result<String, PublishError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header("Idempotency-Key", message.record_id.to_string())
            .json(message)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate(&mut body, MAX_ERROR_BODY);
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let transport_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| message.record_id.to_string(), str::to_string);
        tracing::debug!(
            record_id = %message.record_id,
            status = status.as_u16(),
            transport_id = %transport_id,
            "Webhook accepted event"
        );
        Ok(transport_id)
    }
}

fn truncate(body: &mut String, max: usize) {
    if body.len() <= max {
        return;
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_core::events::{ChangeAction, ChangeEvent, ReferenceKind};
    use tally_shared::types::{OutboxRecordId, TenantId};
    use uuid::Uuid;

    fn message() -> OutboxMessage {
        let id = Uuid::now_v7();
        OutboxMessage {
            record_id: OutboxRecordId::from_uuid(id),
            attempt: 1,
            event: ChangeEvent {
                id,
                tenant_id: TenantId::new(),
                reference_type: ReferenceKind::Expense,
                reference_id: Uuid::now_v7(),
                action: ChangeAction::Create,
                old_object: None,
                new_object: None,
                transaction_date_time: Utc::now(),
                correlation_id: None,
            },
        }
    }

    #[tokio::test]
    async fn test_log_publisher_returns_record_id() {
        let message = message();
        let id = LogPublisher.publish(&message).await.unwrap();
        assert_eq!(id, message.record_id.to_string());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_transport_error() {
        let publisher =
            WebhookPublisher::new("http://127.0.0.1:9/events".to_string(), Duration::from_secs(1))
                .unwrap();
        let err = publisher.publish(&message()).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport(_)));
    }

    #[test]
    fn test_webhook_requires_endpoint() {
        let config = PublisherConfig {
            kind: PublisherKind::Webhook,
            endpoint: None,
            timeout_secs: 5,
        };
        assert!(from_config(&config).is_err());
    }

    #[test]
    fn test_log_is_default() {
        let publisher = from_config(&PublisherConfig::default()).unwrap();
        assert_eq!(publisher.name(), "log");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut body = "é".repeat(10);
        truncate(&mut body, 5);
        assert_eq!(body, "éé");
    }
}
