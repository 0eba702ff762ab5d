//! Release train configuration.
//!
//! Loaded from an optional TOML file and then overridden by environment
//! variables. Every section has defaults so an empty file is a valid config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub env: Environment,
    pub platform: PlatformConfig,
    pub github: GitHubConfig,
    pub slack: SlackConfig,
    pub queue: QueueConfig,
    pub security: SecurityConfig,
}

/// The platform repository and the branch policy around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Repository holding the manifest and changelog.
    pub repo: String,
    pub manifest: String,
    pub changelog: String,
    pub branches: ReleaseBranches,
    /// Pushed branch -> branch it must be backmerged into.
    pub backmerge: BTreeMap<String, String>,
    /// Release branch -> branch its platform PR targets.
    pub promotions: BTreeMap<String, String>,
    pub labels: ConflictLabels,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            repo: "platform".to_string(),
            manifest: "manifest.json".to_string(),
            changelog: "CHANGELOG.md".to_string(),
            branches: ReleaseBranches::default(),
            backmerge: BTreeMap::from([("beta".to_string(), "release-beta".to_string())]),
            promotions: BTreeMap::from([("release-beta".to_string(), "stable".to_string())]),
            labels: ConflictLabels::default(),
        }
    }
}

impl PlatformConfig {
    /// Backmerge target for `branch`, if it requires one.
    pub fn backmerge_target(&self, branch: &str) -> Option<&str> {
        self.backmerge.get(branch).map(String::as_str)
    }

    /// Branch the platform PR for `branch` targets.
    pub fn next_base(&self, branch: &str) -> Option<&str> {
        self.promotions.get(branch).map(String::as_str)
    }

    pub fn is_release_branch(&self, branch: &str) -> bool {
        self.branches.all().contains(&branch)
    }

    pub fn is_stable(&self, branch: &str) -> bool {
        self.branches.stable == branch
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseBranches {
    pub beta: String,
    pub stable: String,
}

impl Default for ReleaseBranches {
    fn default() -> Self {
        Self {
            beta: "release-beta".to_string(),
            stable: "stable".to_string(),
        }
    }
}

impl ReleaseBranches {
    pub fn all(&self) -> [&str; 2] {
        [self.beta.as_str(), self.stable.as_str()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictLabels {
    pub backmerge_conflict: String,
    pub beta_fix: String,
}

impl Default for ConflictLabels {
    fn default() -> Self {
        Self {
            backmerge_conflict: "backmerge-conflict".to_string(),
            beta_fix: "beta-fix".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
            webhook_secret: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub channel: String,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_url: "https://slack.com/api".to_string(),
            token: None,
            channel: "#release-train".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub spool_dir: PathBuf,
    /// Seconds to wait between polls.
    pub poll_interval_secs: u64,
    /// Seconds a fetched message stays invisible to other consumers.
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from(".release-train/queue"),
            poll_interval_secs: 5,
            visibility_timeout_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared tokens accepted in place of a payload signature.
    #[serde(skip_serializing)]
    pub tokens: Vec<String>,
    /// Endpoints that skip request validation.
    pub whitelisted: Vec<String>,
}

impl TrainConfig {
    /// Load from `path` (when given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("TRAIN_ENV") {
            self.env = match env.to_ascii_lowercase().as_str() {
                "development" | "dev" => Environment::Development,
                _ => Environment::Production,
            };
        }
        if let Some(url) = lookup("GITHUB_API_URL") {
            self.github.api_url = url;
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(secret) = lookup("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(token) = lookup("SLACK_TOKEN") {
            self.slack.token = Some(token);
        }
        if let Some(channel) = lookup("SLACK_CHANNEL") {
            self.slack.channel = channel;
        }
        if let Some(dir) = lookup("TRAIN_SPOOL_DIR") {
            self.queue.spool_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.repo.trim().is_empty() {
            return Err(ConfigError::Invalid("platform.repo must not be empty".into()));
        }
        if self.platform.manifest.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "platform.manifest must not be empty".into(),
            ));
        }
        if self.platform.branches.beta == self.platform.branches.stable {
            return Err(ConfigError::Invalid(
                "platform.branches.beta and platform.branches.stable must differ".into(),
            ));
        }
        for (head, target) in &self.platform.backmerge {
            if head == target {
                return Err(ConfigError::Invalid(format!(
                    "branch \"{head}\" cannot be backmerged into itself"
                )));
            }
        }
        if self.queue.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "queue.poll_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.platform.backmerge_target("beta"), Some("release-beta"));
        assert_eq!(config.platform.next_base("release-beta"), Some("stable"));
        assert!(config.platform.is_release_branch("stable"));
        assert!(!config.platform.is_release_branch("beta"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let raw = r#"
            env = "development"

            [platform]
            repo = "astro-platform"

            [platform.backmerge]
            hotfix = "release-beta"
        "#;
        let config = TrainConfig::from_toml(raw).unwrap();
        assert!(config.env.is_development());
        assert_eq!(config.platform.repo, "astro-platform");
        assert_eq!(config.platform.manifest, "manifest.json");
        assert_eq!(config.platform.backmerge_target("hotfix"), Some("release-beta"));
        assert_eq!(config.platform.backmerge_target("beta"), None);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TRAIN_ENV", "dev"),
            ("GITHUB_TOKEN", "ghs_secret"),
            ("SLACK_CHANNEL", "#trains"),
        ]);
        let mut config = TrainConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert!(config.env.is_development());
        assert_eq!(config.github.token.as_deref(), Some("ghs_secret"));
        assert_eq!(config.slack.channel, "#trains");
    }

    #[test]
    fn test_self_backmerge_is_invalid() {
        let mut config = TrainConfig::default();
        config
            .platform
            .backmerge
            .insert("stable".to_string(), "stable".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = TrainConfig::default();
        config.github.token = Some("ghs_secret".to_string());
        config.security.tokens = vec!["shared".to_string()];
        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("ghs_secret"));
        assert!(!rendered.contains("shared"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.toml");
        std::fs::write(&path, "[queue]\npoll_interval_secs = 9\n").unwrap();
        let config = TrainConfig::from_file(&path).unwrap();
        assert_eq!(config.queue.poll_interval(), Duration::from_secs(9));
    }
}
