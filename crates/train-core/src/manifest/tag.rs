//! Release tags on the platform repository: `X.Y.Z-<branch>`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::github::{GitHubApi, NewTag, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpLevel {
    Major,
    Minor,
    Patch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ReleaseVersion {
    pub const INITIAL: ReleaseVersion = ReleaseVersion {
        major: 1,
        minor: 0,
        patch: 0,
    };

    /// Parse a plain `X.Y.Z` core version.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// Parse `X.Y.Z-<branch>`; `None` for tags of other branches.
    pub fn from_tag(tag: &str, branch: &str) -> Option<Self> {
        tag.strip_suffix(branch)
            .and_then(|rest| rest.strip_suffix('-'))
            .and_then(Self::parse)
    }

    pub fn bump(self, level: BumpLevel) -> Self {
        match level {
            BumpLevel::Major => Self {
                major: self.major + 1,
                minor: 0,
                patch: 0,
            },
            BumpLevel::Minor => Self {
                minor: self.minor + 1,
                patch: 0,
                ..self
            },
            BumpLevel::Patch => Self {
                patch: self.patch + 1,
                ..self
            },
        }
    }

    pub fn tag_name(self, branch: &str) -> String {
        format!("{self}-{branch}")
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Next tag name for `branch` given the existing tags.
pub fn next_tag(tags: &[Tag], branch: &str, level: BumpLevel) -> String {
    tags.iter()
        .filter_map(|t| ReleaseVersion::from_tag(&t.name, branch))
        .max()
        .map(|latest| latest.bump(level))
        .unwrap_or(ReleaseVersion::INITIAL)
        .tag_name(branch)
}

/// Cuts release tags; returns the created tag name.
#[async_trait]
pub trait ReleaseTagger: Send + Sync {
    async fn create(
        &self,
        owner: &str,
        branch: &str,
        sha: &str,
        level: BumpLevel,
    ) -> Result<String>;
}

/// Creates an annotated tag object plus its `refs/tags/` ref.
pub struct GitTagger {
    github: Arc<dyn GitHubApi>,
    repo: String,
}

impl GitTagger {
    pub fn new(github: Arc<dyn GitHubApi>, repo: impl Into<String>) -> Self {
        Self {
            github,
            repo: repo.into(),
        }
    }
}

#[async_trait]
impl ReleaseTagger for GitTagger {
    async fn create(
        &self,
        owner: &str,
        branch: &str,
        sha: &str,
        level: BumpLevel,
    ) -> Result<String> {
        if sha.is_empty() {
            return Err(TrainError::Tag(format!("no commit to tag on {branch}")));
        }
        let tags = self.github.list_tags(owner, &self.repo).await?;
        let version = next_tag(&tags, branch, level);
        let tag = self
            .github
            .create_tag(
                owner,
                &self.repo,
                &NewTag {
                    tag: version.clone(),
                    message: format!("Release {version}"),
                    object: sha.to_string(),
                },
            )
            .await?;
        self.github
            .create_ref(owner, &self.repo, &format!("refs/tags/{}", tag.tag), &tag.sha)
            .await?;
        tracing::info!(tag = %version, branch = %branch, "release tagged");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeGitHub;

    fn tags(names: &[&str]) -> Vec<Tag> {
        names
            .iter()
            .map(|n| Tag {
                name: n.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_first_tag_for_branch() {
        assert_eq!(
            next_tag(&tags(&["3.1.0-stable"]), "release-beta", BumpLevel::Patch),
            "1.0.0-release-beta"
        );
    }

    #[test]
    fn test_bumps_highest_matching_tag() {
        let existing = tags(&[
            "1.0.9-release-beta",
            "1.0.10-release-beta",
            "9.9.9-stable",
            "not-a-version-release-beta",
        ]);
        assert_eq!(
            next_tag(&existing, "release-beta", BumpLevel::Patch),
            "1.0.11-release-beta"
        );
        assert_eq!(
            next_tag(&existing, "release-beta", BumpLevel::Minor),
            "1.1.0-release-beta"
        );
        assert_eq!(
            next_tag(&existing, "release-beta", BumpLevel::Major),
            "2.0.0-release-beta"
        );
    }

    #[test]
    fn test_branch_suffix_must_be_whole() {
        assert_eq!(ReleaseVersion::from_tag("1.2.3-xbeta", "beta"), None);
        assert_eq!(
            ReleaseVersion::from_tag("1.2.3-beta", "beta"),
            ReleaseVersion::parse("1.2.3")
        );
    }

    #[tokio::test]
    async fn test_git_tagger_creates_tag_and_ref() {
        let github = Arc::new(FakeGitHub::new());
        github.add_tag("platform", "1.0.0-release-beta");
        let tagger = GitTagger::new(github.clone(), "platform");

        let version = tagger
            .create("acme", "release-beta", "abc123", BumpLevel::Patch)
            .await
            .unwrap();
        assert_eq!(version, "1.0.1-release-beta");
        assert!(github.ref_sha("platform", "tags/1.0.1-release-beta").is_some());
    }
}
