//! Directory-backed queue: one JSON envelope file per message.
//!
//! File names start with the enqueue time so a directory listing is FIFO.
//! A fetched message records its receipt and visibility deadline in the
//! envelope; deleting requires the current receipt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use uuid::Uuid;

use crate::error::QueueError;

use super::{MessageQueue, QueueMessage};

const EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    id: String,
    body: String,
    #[serde(default)]
    receipt: Option<String>,
    /// Unix milliseconds before which the message stays hidden.
    #[serde(default)]
    visible_after: i64,
}

pub struct SpoolQueue {
    dir: PathBuf,
}

impl SpoolQueue {
    /// Open (creating if needed) the spool at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Write via a temp file and rename so readers never see partial envelopes.
    async fn write(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let tmp = self.dir.join(format!(".{}.tmp", envelope.id));
        fs::write(&tmp, serde_json::to_vec(envelope)?).await?;
        fs::rename(&tmp, self.path_for(&envelope.id)).await?;
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Envelope, QueueError> {
        Ok(serde_json::from_slice(&fs::read(path).await?)?)
    }

    /// Envelope files in enqueue order.
    async fn entries(&self) -> Result<Vec<PathBuf>, QueueError> {
        let mut paths = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Store a raw body without checking that it is JSON.
    pub async fn enqueue_raw(&self, body: &str) -> Result<String, QueueError> {
        let id = format!(
            "{:020}-{}",
            Utc::now().timestamp_micros(),
            Uuid::new_v4().simple()
        );
        self.write(&Envelope {
            id: id.clone(),
            body: body.to_string(),
            receipt: None,
            visible_after: 0,
        })
        .await?;
        tracing::debug!(id = %id, dir = %self.dir.display(), "message spooled");
        Ok(id)
    }
}

#[async_trait]
impl MessageQueue for SpoolQueue {
    async fn enqueue(&self, body: &Value) -> Result<String, QueueError> {
        self.enqueue_raw(&serde_json::to_string(body)?).await
    }

    async fn fetch(
        &self,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Utc::now().timestamp_millis();
        let hidden_for = i64::try_from(visibility.as_millis()).unwrap_or(i64::MAX);
        let mut fetched = Vec::new();
        for path in self.entries().await? {
            if fetched.len() >= max {
                break;
            }
            let mut envelope = match self.read(&path).await {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable envelope"
                    );
                    continue;
                }
            };
            if envelope.visible_after > now {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            envelope.receipt = Some(receipt.clone());
            envelope.visible_after = now.saturating_add(hidden_for);
            self.write(&envelope).await?;
            fetched.push(QueueMessage {
                id: envelope.id,
                receipt,
                body: envelope.body,
            });
        }
        Ok(fetched)
    }

    async fn delete(&self, id: &str, receipt: &str) -> Result<(), QueueError> {
        let path = self.path_for(id);
        let unknown = || QueueError::UnknownMessage { id: id.to_string() };
        let envelope = match self.read(&path).await {
            Ok(envelope) => envelope,
            Err(QueueError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(unknown())
            }
            Err(err) => return Err(err),
        };
        if envelope.receipt.as_deref() != Some(receipt) {
            return Err(unknown());
        }
        fs::remove_file(&path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_fetch_delete() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path().join("spool")).await.unwrap();
        let id = queue.enqueue(&json!({ "zen": "hi" })).await.unwrap();

        let fetched = queue.fetch(1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, id);
        assert_eq!(fetched[0].body, r#"{"zen":"hi"}"#);

        assert!(queue.fetch(1, Duration::from_secs(60)).await.unwrap().is_empty());

        assert!(matches!(
            queue.delete(&id, "stale").await,
            Err(QueueError::UnknownMessage { .. })
        ));
        queue.delete(&id, &fetched[0].receipt).await.unwrap();
        assert!(queue.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_visibility_redelivers() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).await.unwrap();
        queue.enqueue_raw("raw").await.unwrap();
        let first = queue.fetch(1, Duration::ZERO).await.unwrap();
        let second = queue.fetch(1, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].body, "raw");
    }

    #[tokio::test]
    async fn test_fifo_order_and_corrupt_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).await.unwrap();
        let first = queue.enqueue_raw("1").await.unwrap();
        let second = queue.enqueue_raw("2").await.unwrap();
        std::fs::write(dir.path().join("00000000000000000000-broken.json"), "{").unwrap();

        let fetched = queue.fetch(5, Duration::from_secs(60)).await.unwrap();
        let ids: Vec<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    }

    #[tokio::test]
    async fn test_delete_missing_message() {
        let dir = tempfile::tempdir().unwrap();
        let queue = SpoolQueue::open(dir.path()).await.unwrap();
        assert!(matches!(
            queue.delete("nope", "r").await,
            Err(QueueError::UnknownMessage { .. })
        ));
    }
}
