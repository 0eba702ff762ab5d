//! HTTP clients behind the release train capabilities.
//!
//! [`GitHubClient`] implements [`train_core::GitHubApi`] over the GitHub REST
//! API; [`SlackNotifier`] implements [`train_core::Notifier`] over Slack's Web
//! API.

pub mod error;
pub mod github;
pub mod slack;

pub use error::ClientError;
pub use github::GitHubClient;
pub use slack::SlackNotifier;

const USER_AGENT: &str = concat!("release-train/", env!("CARGO_PKG_VERSION"));
