//! Platform changelog maintenance.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::error::Result;
use crate::event::refs::short_sha;
use crate::github::{FileUpdate, GitHubApi};

use super::{file_url, Manifest};

/// Records what changed between two manifests and returns the changelog URL.
#[async_trait]
pub trait ChangelogWriter: Send + Sync {
    async fn update(
        &self,
        owner: &str,
        branch: &str,
        previous: &Manifest,
        current: &Manifest,
    ) -> Result<String>;
}

/// Prepends a dated section to a markdown file in the platform repository.
pub struct ManifestChangelog {
    github: Arc<dyn GitHubApi>,
    repo: String,
    path: String,
}

impl ManifestChangelog {
    pub fn new(
        github: Arc<dyn GitHubApi>,
        repo: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            github,
            repo: repo.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl ChangelogWriter for ManifestChangelog {
    async fn update(
        &self,
        owner: &str,
        branch: &str,
        previous: &Manifest,
        current: &Manifest,
    ) -> Result<String> {
        let url = file_url(owner, &self.repo, branch, &self.path);
        let section = render_section(Utc::now().date_naive(), current, previous);
        let Some(section) = section else {
            tracing::debug!(branch = %branch, "manifest unchanged, changelog left as is");
            return Ok(url);
        };

        let existing = self
            .github
            .get_file(owner, &self.repo, &self.path, branch)
            .await?;
        let (content, sha) = match existing {
            Some(file) => (prepend_section(&section, &file.content), Some(file.sha)),
            None => (format!("{section}\n"), None),
        };

        self.github
            .put_file(
                owner,
                &self.repo,
                &FileUpdate {
                    path: self.path.clone(),
                    branch: branch.to_string(),
                    content,
                    message: "Update changelog".to_string(),
                    sha,
                },
            )
            .await?;
        tracing::info!(branch = %branch, url = %url, "changelog updated");
        Ok(url)
    }
}

/// A `### <date>` section listing `repo: old -> new` per changed repo, or
/// `None` when nothing changed.
pub fn render_section(
    date: NaiveDate,
    current: &Manifest,
    previous: &Manifest,
) -> Option<String> {
    let changes = current.changes_since(previous);
    if changes.is_empty() {
        return None;
    }
    let mut section = format!("### {}\n", date.format("%B %-d, %Y"));
    for (repo, old, new) in changes {
        match old {
            Some(old) => section.push_str(&format!(
                "* **{repo}:** `{}` → `{}`\n",
                short_sha(old),
                short_sha(new)
            )),
            None => section.push_str(&format!("* **{repo}:** `{}` (new)\n", short_sha(new))),
        }
    }
    section.push_str("---");
    Some(section)
}

pub fn prepend_section(section: &str, existing: &str) -> String {
    let existing = existing.trim();
    if existing.is_empty() {
        format!("{section}\n")
    } else {
        format!("{section}\n{existing}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeGitHub;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 1, 8).unwrap()
    }

    #[test]
    fn test_render_section() {
        let previous =
            Manifest::new().with_overrides([("web", "1111111aaaa"), ("api", "2222222")]);
        let current = Manifest::new().with_overrides([
            ("web", "3333333bbbb"),
            ("api", "2222222"),
            ("docs", "4444444cccc"),
        ]);
        let section = render_section(date(), &current, &previous).unwrap();
        assert_eq!(
            section,
            "### January 8, 2019\n\
             * **docs:** `4444444` (new)\n\
             * **web:** `1111111` → `3333333`\n\
             ---"
        );
    }

    #[test]
    fn test_render_section_without_changes() {
        let manifest = Manifest::new().with_overrides([("web", "1")]);
        assert!(render_section(date(), &manifest, &manifest).is_none());
    }

    #[test]
    fn test_prepend_keeps_history() {
        let merged = prepend_section("### New\n---", "### Old\n---\n");
        assert_eq!(merged, "### New\n---\n### Old\n---\n");
    }

    #[tokio::test]
    async fn test_update_writes_through_file_api() {
        let github = Arc::new(FakeGitHub::new());
        github.set_file("platform", "CHANGELOG.md", "release-beta", "### Old\n---\n");
        let writer = ManifestChangelog::new(github.clone(), "platform", "CHANGELOG.md");

        let previous = Manifest::new().with_overrides([("web", "1111111")]);
        let current = Manifest::new().with_overrides([("web", "2222222")]);
        let url = writer
            .update("acme", "release-beta", &previous, &current)
            .await
            .unwrap();

        assert_eq!(
            url,
            "https://github.com/acme/platform/blob/release-beta/CHANGELOG.md"
        );
        let content = github
            .file("platform", "CHANGELOG.md", "release-beta")
            .unwrap();
        assert!(content.contains("`1111111` → `2222222`"));
        assert!(content.ends_with("### Old\n---\n"));
    }
}
