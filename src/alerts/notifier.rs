//! Notification fan-out to subscribers
//!
//! Delivery is best effort: every (subscriber, target) pair is attempted,
//! failures are logged per recipient and counted, and nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::config::{ChatBotConfig, DeliveryTarget, Subscriber};
use crate::storage::SubscriberStore;

/// A message ready for delivery
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub scope: String,
    pub title: String,
    pub body: String,
}

impl OutgoingMessage {
    pub fn alert(scope: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            title: "Environmental alert".to_string(),
            body: body.into(),
        }
    }

    pub fn report(scope: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            title: "Sensor report".to_string(),
            body: body.into(),
        }
    }
}

/// Counts from one fan-out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Sends messages to the active subscribers of a scope
pub struct Dispatcher {
    client: reqwest::Client,
    chat: Option<ChatBotConfig>,
    subscribers: Arc<SubscriberStore>,
}

impl Dispatcher {
    pub fn new(subscribers: Arc<SubscriberStore>, chat: Option<ChatBotConfig>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            chat,
            subscribers,
        }
    }

    /// Deliver to every target of every active subscriber in the scope
    pub async fn dispatch(&self, message: &OutgoingMessage) -> DispatchReport {
        let recipients = self.subscribers.active_for(&message.scope);

        let sends = recipients.iter().flat_map(|subscriber| {
            subscriber
                .targets
                .iter()
                .map(move |target| self.deliver(subscriber, target, message))
        });
        let results = join_all(sends).await;

        let mut report = DispatchReport {
            recipients: recipients.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        tracing::debug!(
            scope = %message.scope,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatch finished"
        );
        report
    }

    async fn deliver(
        &self,
        subscriber: &Subscriber,
        target: &DeliveryTarget,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        let result = self.send_target(subscriber, target, message).await;
        if let Err(e) = &result {
            tracing::error!(
                subscriber = %subscriber.id,
                channel = target.channel_name(),
                error = %e,
                "Failed to deliver notification"
            );
        }
        result
    }

    /// Send to a single target
    async fn send_target(
        &self,
        subscriber: &Subscriber,
        target: &DeliveryTarget,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        match target {
            DeliveryTarget::Log => {
                tracing::warn!(
                    subscriber = %subscriber.id,
                    scope = %message.scope,
                    "{}: {}",
                    message.title,
                    message.body
                );
                Ok(())
            }
            DeliveryTarget::Chat { chat_id } => self.send_chat(chat_id, message).await,
            DeliveryTarget::Push { endpoint } => self.send_push(endpoint, message).await,
        }
    }

    async fn send_chat(&self, chat_id: &str, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| DeliveryError::NotConfigured("chat bot token".to_string()))?;

        let payload = serde_json::json!({
            "chat_id": chat_id,
            "text": format!("{}\n{}", message.title, message.body),
        });
        self.post(&chat.send_message_url(), &payload).await
    }

    async fn send_push(&self, endpoint: &str, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let payload = serde_json::json!({
            "title": message.title,
            "body": message.body,
            "scope": message.scope,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.post(endpoint, &payload).await
    }

    async fn post(&self, url: &str, payload: &serde_json::Value) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// A channel send failed
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Endpoint returned status {0}")]
    Status(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(subscribers: Vec<Subscriber>) -> Arc<SubscriberStore> {
        let store = Arc::new(SubscriberStore::new());
        for s in subscribers {
            store.upsert(s);
        }
        store
    }

    #[tokio::test]
    async fn test_log_delivery_succeeds() {
        let store = store_with(vec![Subscriber::new("ops").with_target(DeliveryTarget::Log)]);
        let dispatcher = Dispatcher::new(store, None);

        let report = dispatcher
            .dispatch(&OutgoingMessage::alert("default", "aqi: 520 (>= 450)"))
            .await;
        assert_eq!(
            report,
            DispatchReport {
                recipients: 1,
                delivered: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let store = store_with(vec![
            Subscriber::new("a").with_target(DeliveryTarget::Chat {
                chat_id: "1".to_string(),
            }),
            Subscriber::new("b")
                .with_target(DeliveryTarget::Push {
                    endpoint: "http://127.0.0.1:1/push".to_string(),
                })
                .with_target(DeliveryTarget::Log),
            Subscriber::new("c").with_target(DeliveryTarget::Log).with_active(false),
            Subscriber::new("d").with_scope("lab").with_target(DeliveryTarget::Log),
        ]);
        // no chat bot configured, push endpoint refuses connections
        let dispatcher = Dispatcher::new(store, None);

        let report = dispatcher
            .dispatch(&OutgoingMessage::alert("default", "uv: 9.5 (>= 8.0)"))
            .await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
    }

    #[test]
    fn test_no_subscribers_is_empty_report() {
        let dispatcher = Dispatcher::new(Arc::new(SubscriberStore::new()), None);
        let report = tokio_test::block_on(dispatcher.dispatch(&OutgoingMessage::report("default", "ok")));
        assert_eq!(report, DispatchReport::default());
    }
}
