//! Webhook managers and the machinery that runs them.
//!
//! A manager is a named handler bound to the event shapes it claims. The
//! [`registry`] validates descriptors once at startup, the [`dispatcher`]
//! fans a delivery out to every matching manager, and [`aggregate`] reduces
//! the per-manager outcomes to one webhook verdict.

pub mod aggregate;
pub mod dispatcher;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TrainConfig;
use crate::error::Result;
use crate::event::WebhookEvent;
use crate::github::GitHubApi;
use crate::manifest::changelog::ChangelogWriter;
use crate::manifest::tag::ReleaseTagger;

pub use aggregate::{aggregate, Category, HttpCategories, VerdictStatus, WebhookStatus};
pub use dispatcher::{DispatchMode, Dispatcher, Settled};
pub use registry::{default_registry, ManagerDescriptor, ManagerRegistry, RegistryBuilder};

/// Status codes a manager may report.
pub mod status {
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const INTERNAL_ERROR: u16 = 500;

    pub const RECOGNISED: [u16; 6] = [
        OK,
        ACCEPTED,
        BAD_REQUEST,
        UNAUTHORIZED,
        FORBIDDEN,
        INTERNAL_ERROR,
    ];

    pub fn is_recognised(code: u16) -> bool {
        RECOGNISED.contains(&code)
    }
}

/// Notification channels a result may address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Slack,
}

impl Channel {
    pub const ALL: [Channel; 1] = [Channel::Slack];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Slack => "slack",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Notifications = BTreeMap<Channel, String>;

/// Outcome of one manager for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerResult {
    pub code: u16,
    pub manager: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
}

impl ManagerResult {
    pub fn new(manager: impl Into<String>, code: u16) -> Self {
        Self {
            code,
            manager: manager.into(),
            notifications: None,
        }
    }

    /// 202: the delivery was not for this manager, or there was nothing to do.
    pub fn accepted(manager: impl Into<String>) -> Self {
        Self::new(manager, status::ACCEPTED)
    }

    pub fn ok(manager: impl Into<String>) -> Self {
        Self::new(manager, status::OK)
    }

    pub fn bad_request(manager: impl Into<String>) -> Self {
        Self::new(manager, status::BAD_REQUEST)
    }

    pub fn with_notification(mut self, channel: Channel, text: impl Into<String>) -> Self {
        self.notifications
            .get_or_insert_with(BTreeMap::new)
            .insert(channel, text.into());
        self
    }

    pub fn with_slack(self, text: impl Into<String>) -> Self {
        self.with_notification(Channel::Slack, text)
    }

    pub fn notification(&self, channel: Channel) -> Option<&str> {
        self.notifications
            .as_ref()
            .and_then(|n| n.get(&channel))
            .map(String::as_str)
    }

    pub fn category(&self) -> Option<Category> {
        Category::of(self.code)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.category(),
            Some(Category::ClientError | Category::ServerError)
        )
    }
}

/// A webhook manager.
///
/// `handle` converts its own failures into 400-class results where it can;
/// an `Err` (or a panic) is turned into a 500 result by the dispatcher.
#[async_trait]
pub trait Manager: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &WebhookEvent) -> Result<ManagerResult>;
}

/// Capabilities shared by the built-in managers.
#[derive(Clone)]
pub struct ManagerContext {
    pub github: Arc<dyn GitHubApi>,
    pub config: Arc<TrainConfig>,
    pub changelog: Arc<dyn ChangelogWriter>,
    pub tagger: Arc<dyn ReleaseTagger>,
}

impl ManagerContext {
    pub fn platform_repo(&self) -> &str {
        &self.config.platform.repo
    }

    /// Installation repositories other than the platform repository.
    pub async fn component_repos(&self) -> Result<Vec<String>> {
        let repos = self.github.list_installation_repos().await?;
        Ok(repos
            .into_iter()
            .map(|r| r.name)
            .filter(|name| name != self.platform_repo())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_builders() {
        let result = ManagerResult::ok("trainManager").with_slack("all aboard");
        assert_eq!(result.code, 200);
        assert_eq!(result.notification(Channel::Slack), Some("all aboard"));
        assert!(!result.is_failure());

        let failed = ManagerResult::bad_request("trainManager");
        assert!(failed.is_failure());
        assert!(failed.notifications.is_none());
    }

    #[test]
    fn test_result_serializes_channel_names() {
        let result = ManagerResult::accepted("backmergeManager").with_slack("hi");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["code"], 202);
        assert_eq!(json["notifications"]["slack"], "hi");

        let bare = serde_json::to_value(ManagerResult::ok("x")).unwrap();
        assert!(bare.get("notifications").is_none());
    }

    #[test]
    fn test_recognised_codes() {
        assert!(status::is_recognised(202));
        assert!(status::is_recognised(500));
        assert!(!status::is_recognised(418));
    }
}
