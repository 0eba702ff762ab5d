//! Outbound chat notifications.
//!
//! Managers only produce message text keyed by [`Channel`]. This module
//! groups that text by channel and status category, picks the colour and
//! title for each category, and posts everything through the registered
//! [`Notifier`]s with a wait-for-all join.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::manager::{Category, Channel, HttpCategories};
use crate::metrics::METRICS;
use crate::obs;

pub const SUCCESS_COLOR: &str = "#36A64F";
pub const ERROR_COLOR: &str = "#FF0000";
pub const SUCCESS_TITLE: &str = ":steam_locomotive: RELEASE TRAIN UPDATE :steam_locomotive:";
pub const ERROR_TITLE: &str = ":scream: RELEASE TRAIN ERROR :scream:";

/// A formatted message ready for a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel: String,
    pub color: String,
    pub title: String,
    pub text: String,
}

impl ChatMessage {
    /// Colour and title follow the category: success reads as an update,
    /// anything else as an error.
    pub fn for_category(
        channel: impl Into<String>,
        category: Category,
        text: impl Into<String>,
    ) -> Self {
        let (color, title) = match category {
            Category::Success => (SUCCESS_COLOR, SUCCESS_TITLE),
            _ => (ERROR_COLOR, ERROR_TITLE),
        };
        Self {
            channel: channel.into(),
            color: color.to_string(),
            title: title.to_string(),
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// The result channel this notifier serves.
    fn channel(&self) -> Channel;

    async fn post(&self, message: &ChatMessage) -> Result<(), NotifyError>;
}

/// Counts from one delivery round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct NotificationRouter {
    notifiers: Vec<Arc<dyn Notifier>>,
    destination: String,
}

impl NotificationRouter {
    /// `destination` is the chat channel every message is posted to.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            notifiers: Vec::new(),
            destination: destination.into(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Messages for `channel`, in category order then result order.
    pub fn compose(&self, categories: &HttpCategories, channel: Channel) -> Vec<ChatMessage> {
        categories
            .iter()
            .flat_map(|(category, results)| {
                results.iter().filter_map(move |result| {
                    result
                        .notification(channel)
                        .map(|text| ChatMessage::for_category(&self.destination, category, text))
                })
            })
            .collect()
    }

    /// Post every notification and wait for all posts to settle.
    ///
    /// Failed posts are logged and counted, never returned.
    pub async fn deliver(&self, categories: &HttpCategories) -> DeliveryReport {
        let mut posts = Vec::new();
        for notifier in &self.notifiers {
            for message in self.compose(categories, notifier.channel()) {
                let notifier = Arc::clone(notifier);
                posts.push(async move {
                    let outcome = notifier.post(&message).await;
                    (notifier.channel(), outcome)
                });
            }
        }

        let mut report = DeliveryReport::default();
        if posts.is_empty() {
            tracing::debug!("nothing to notify");
            return report;
        }

        for (channel, outcome) in join_all(posts).await {
            match outcome {
                Ok(()) => {
                    report.delivered += 1;
                    METRICS.inc_notifications_sent();
                }
                Err(err) => {
                    report.failed += 1;
                    METRICS.inc_notification_failures();
                    tracing::warn!(
                        channel = %channel,
                        error = %err,
                        "notification delivery failed"
                    );
                }
            }
        }
        obs::emit_notifications_sent(report.delivered, report.failed);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingNotifier;
    use crate::manager::ManagerResult;

    fn categories() -> HttpCategories {
        HttpCategories::from_results(&[
            ManagerResult::ok("a").with_slack("merged web"),
            ManagerResult::accepted("b"),
            ManagerResult::bad_request("c").with_slack("could not merge api"),
        ])
    }

    #[test]
    fn test_compose_colours_by_category() {
        let router = NotificationRouter::new("#trains");
        let messages = router.compose(&categories(), Channel::Slack);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].color, SUCCESS_COLOR);
        assert_eq!(messages[0].title, SUCCESS_TITLE);
        assert_eq!(messages[0].channel, "#trains");
        assert_eq!(messages[1].color, ERROR_COLOR);
        assert_eq!(messages[1].text, "could not merge api");
    }

    #[tokio::test]
    async fn test_deliver_counts_failures_without_failing() {
        let slack = Arc::new(RecordingNotifier::failing_after(1));
        let router = NotificationRouter::new("#trains").with_notifier(slack.clone());
        let report = router.deliver(&categories()).await;
        assert_eq!(report, DeliveryReport { delivered: 1, failed: 1 });
        assert_eq!(slack.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_nothing() {
        let slack = Arc::new(RecordingNotifier::new());
        let router = NotificationRouter::new("#trains").with_notifier(slack.clone());
        let report = router
            .deliver(&HttpCategories::from_results(&[ManagerResult::accepted("a")]))
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert!(slack.messages().is_empty());
    }
}
