//! In-process queue.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::QueueError;

use super::{MessageQueue, QueueMessage};

#[derive(Debug)]
struct Stored {
    id: String,
    body: String,
    receipt: Option<String>,
    visible_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<Stored>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw body without checking that it is JSON.
    pub fn push_raw(&self, body: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().push(Stored {
            id: id.clone(),
            body: body.to_string(),
            receipt: None,
            visible_at: Instant::now(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Stored>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, body: &Value) -> Result<String, QueueError> {
        Ok(self.push_raw(&serde_json::to_string(body)?))
    }

    async fn fetch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut messages = self.lock();
        Ok(messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .take(max)
            .map(|m| {
                let receipt = Uuid::new_v4().to_string();
                m.receipt = Some(receipt.clone());
                m.visible_at = now + visibility;
                QueueMessage {
                    id: m.id.clone(),
                    receipt,
                    body: m.body.clone(),
                }
            })
            .collect())
    }

    async fn delete(&self, id: &str, receipt: &str) -> Result<(), QueueError> {
        let mut messages = self.lock();
        let position = messages
            .iter()
            .position(|m| m.id == id && m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| QueueError::UnknownMessage { id: id.to_string() })?;
        messages.remove(position);
        Ok(())
    }
}
