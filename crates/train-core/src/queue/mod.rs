//! Sequential consumption of queued webhook deliveries.
//!
//! One message at a time: fetch, handle fully (notifications included),
//! delete, wait. A message whose handling fails is left in place and comes
//! back once its visibility timeout lapses.

pub mod memory;
pub mod spool;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::service::{WebhookResponse, WebhookService};

pub use memory::MemoryQueue;
pub use spool::SpoolQueue;

/// A fetched message. `receipt` is only valid until the message is fetched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub receipt: String,
    /// Raw body as enqueued.
    pub body: String,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Store `body` and return its message id.
    async fn enqueue(&self, body: &Value) -> std::result::Result<String, QueueError>;

    /// Up to `max` visible messages, hidden from other fetches for `visibility`.
    async fn fetch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> std::result::Result<Vec<QueueMessage>, QueueError>;

    async fn delete(&self, id: &str, receipt: &str) -> std::result::Result<(), QueueError>;
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    Empty,
    Handled { id: String, response: WebhookResponse },
    /// Not JSON; deleted without handling.
    Poison { id: String },
    /// Handling failed; left for redelivery.
    Retained { id: String, error: String },
}

pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    service: Arc<WebhookService>,
    visibility: Duration,
    poll_interval: Duration,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        service: Arc<WebhookService>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            service,
            visibility: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
        }
    }

    /// Fetch and fully process at most one message.
    pub async fn process_next(&self) -> Result<Consumed> {
        let Some(message) = self.queue.fetch(1, self.visibility).await?.into_iter().next() else {
            return Ok(Consumed::Empty);
        };

        let payload: Value = match serde_json::from_str(&message.body) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(id = %message.id, error = %err, "dropping message that is not JSON");
                self.queue.delete(&message.id, &message.receipt).await?;
                return Ok(Consumed::Poison { id: message.id });
            }
        };

        let handled = self
            .service
            .handle(&payload)
            .instrument(obs::webhook_span(&message.id))
            .await;
        match handled {
            Ok(response) => {
                self.queue.delete(&message.id, &message.receipt).await?;
                tracing::debug!(id = %message.id, code = response.code, "message processed");
                Ok(Consumed::Handled {
                    id: message.id,
                    response,
                })
            }
            Err(err) => {
                tracing::error!(id = %message.id, error = %err, "message left for redelivery");
                Ok(Consumed::Retained {
                    id: message.id,
                    error: err.to_string(),
                })
            }
        }
    }

    /// Poll until `shutdown` resolves. Shutdown is only observed between messages.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "queue consumer started"
        );
        loop {
            match self.process_next().await {
                Ok(Consumed::Empty) => {}
                Ok(outcome) => {
                    tracing::trace!(?outcome, "poll finished");
                    METRICS.flush();
                }
                Err(err) => tracing::warn!(error = %err, "queue poll failed"),
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        METRICS.flush();
        tracing::info!("queue consumer stopped");
    }
}
