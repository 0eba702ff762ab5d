//! Keeps the manifest in step with pushes to release branches.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, TrainError};
use crate::event::refs::branch_from_ref;
use crate::event::{PushEvent, WebhookEvent};
use crate::github::PullRequest;
use crate::manager::{Manager, ManagerContext, ManagerResult};
use crate::train::release_pr::ensure_release_pr;

use super::tag::BumpLevel;
use super::{commit_manifest, read_manifest};

/// What a manifest update changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestUpdate {
    pub repo: String,
    pub branch: String,
    pub sha: String,
    pub release_pr: Option<PullRequest>,
    pub changelog_url: String,
    pub tag: String,
}

pub struct ManifestUpdateManager {
    ctx: ManagerContext,
}

impl ManifestUpdateManager {
    pub const NAME: &'static str = "manifestUpdateManager";

    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx }
    }

    /// Pushed release branch, or `None` when the push is not ours.
    fn branch<'a>(&self, push: &'a PushEvent) -> Option<&'a str> {
        let platform = &self.ctx.config.platform;
        if push.repository.name == platform.repo {
            return None;
        }
        branch_from_ref(&push.ref_name)
            .ok()
            .filter(|branch| platform.is_release_branch(branch))
    }

    /// Record `sha` for `repo` on `branch`; `None` when already recorded.
    pub async fn update(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<Option<ManifestUpdate>> {
        let github = self.ctx.github.as_ref();
        let platform = &self.ctx.config.platform;

        let previous = read_manifest(github, owner, &platform.repo, &platform.manifest, branch)
            .await?;
        if previous.get(repo) == Some(sha) {
            return Ok(None);
        }
        let manifest = previous.clone().with_overrides([(repo, sha)]);
        let commit =
            commit_manifest(github, owner, &platform.repo, &platform.manifest, branch, &manifest)
                .await?;
        tracing::info!(
            manager = Self::NAME,
            repo = %repo,
            branch = %branch,
            commit = %commit.sha,
            "manifest updated"
        );

        let release_pr = match platform.next_base(branch) {
            Some(next) if !platform.is_stable(branch) => {
                Some(ensure_release_pr(github, owner, &platform.repo, branch, next).await?)
            }
            _ => None,
        };

        let changelog_url = self
            .ctx
            .changelog
            .update(owner, branch, &previous, &manifest)
            .await?;
        let tag = self
            .ctx
            .tagger
            .create(owner, branch, &commit.sha, BumpLevel::Patch)
            .await?;

        Ok(Some(ManifestUpdate {
            repo: repo.to_string(),
            branch: branch.to_string(),
            sha: sha.to_string(),
            release_pr,
            changelog_url,
            tag,
        }))
    }
}

pub fn render_success(update: &ManifestUpdate) -> String {
    let mut lines = vec![format!(
        "Manifest update successful on `{}` for `{}` :kissing_smiling_eyes:",
        update.branch, update.repo
    )];
    if let Some(pr) = &update.release_pr {
        lines.push(format!("Check the PR <{}|here>", pr.html_url));
    }
    lines.push(format!("Check the full changelog <{}|here>", update.changelog_url));
    lines.push(format!("Tagged as `{}`", update.tag));
    lines.join("\n")
}

pub fn render_failure(branch: &str, repo: &str, error: &dyn std::fmt::Display) -> String {
    format!(
        "Error updating manifest on `{branch}` for `{repo}` :scream:\n\n*Error:*\n```{error}```"
    )
}

fn is_deletion(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}

#[async_trait]
impl Manager for ManifestUpdateManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<ManagerResult> {
        let WebhookEvent::Push(push) = event else {
            return Ok(ManagerResult::accepted(Self::NAME));
        };
        let Some(branch) = self.branch(push) else {
            return Ok(ManagerResult::accepted(Self::NAME));
        };
        let repo = push.repository.name.as_str();
        if push.after.as_deref().is_some_and(is_deletion) {
            return Ok(ManagerResult::accepted(Self::NAME));
        }

        let outcome = match push.after.as_deref() {
            Some(sha) => {
                self.update(&push.repository.owner.login, repo, branch, sha)
                    .await
            }
            None => Err(TrainError::InvalidPayload(
                "push to a release branch without an `after` sha".to_string(),
            )),
        };

        match outcome {
            Ok(Some(update)) => {
                Ok(ManagerResult::ok(Self::NAME).with_slack(render_success(&update)))
            }
            Ok(None) => {
                tracing::debug!(manager = Self::NAME, repo = %repo, "manifest already current");
                Ok(ManagerResult::accepted(Self::NAME))
            }
            Err(err) => {
                tracing::error!(
                    manager = Self::NAME,
                    repo = %repo,
                    branch = %branch,
                    error = %err,
                    "manifest update failed"
                );
                Ok(ManagerResult::bad_request(Self::NAME)
                    .with_slack(render_failure(branch, repo, &err)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::TrainConfig;
    use crate::error::ApiError;
    use crate::event::EventShape;
    use crate::fakes::{FakeGitHub, GitHubCall, StaticChangelog, StaticTagger};
    use crate::manager::Channel;
    use crate::manifest::Manifest;

    fn manager(github: Arc<FakeGitHub>, tagger: Arc<StaticTagger>) -> ManifestUpdateManager {
        ManifestUpdateManager::new(ManagerContext {
            github,
            config: Arc::new(TrainConfig::default()),
            changelog: Arc::new(StaticChangelog::new()),
            tagger,
        })
    }

    fn push(repo: &str, branch: &str, after: &str) -> WebhookEvent {
        EventShape::Push
            .parse(&json!({
                "ref": format!("refs/heads/{branch}"),
                "after": after,
                "commits": [{ "id": after, "message": "bump" }],
                "head_commit": { "id": after },
                "repository": { "name": repo, "owner": { "login": "acme" } },
                "sender": { "login": "octocat" },
                "installation": { "id": 1 }
            }))
            .unwrap()
    }

    fn github() -> Arc<FakeGitHub> {
        let github = Arc::new(FakeGitHub::new());
        github.set_branch("platform", "release-beta", "p0");
        github.set_branch("platform", "stable", "s0");
        github.set_file(
            "platform",
            "manifest.json",
            "release-beta",
            "{\"web\": \"old\", \"api\": \"a1\"}",
        );
        github
    }

    #[tokio::test]
    async fn test_gate() {
        let github = github();
        let m = manager(github.clone(), Arc::new(StaticTagger::new()));
        for event in [
            push("platform", "release-beta", "abc"),
            push("web", "beta", "abc"),
            push("web", "release-beta", "0000000000000000000000000000000000000000"),
        ] {
            assert_eq!(m.handle(&event).await.unwrap().code, 202);
        }
        assert!(github.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_sha_is_accepted() {
        let github = github();
        let result = manager(github.clone(), Arc::new(StaticTagger::new()))
            .handle(&push("api", "release-beta", "a1"))
            .await
            .unwrap();
        assert_eq!(result.code, 202);
        assert!(github.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_beta_update_commits_and_opens_release_pr() {
        let github = github();
        let tagger = Arc::new(StaticTagger::new());
        let result = manager(github.clone(), tagger.clone())
            .handle(&push("web", "release-beta", "new"))
            .await
            .unwrap();
        assert_eq!(result.code, 200);

        match &github.calls_to("create_tree")[0] {
            GitHubCall::CreateTree { entries, .. } => {
                let manifest = Manifest::parse(&entries[0].content).unwrap();
                assert_eq!(manifest.get("web"), Some("new"));
                assert_eq!(manifest.get("api"), Some("a1"));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(github.calls_to("create_pull_request").len(), 1);
        assert_eq!(tagger.tags()[0].0, "release-beta");

        let text = result.notification(Channel::Slack).unwrap();
        assert!(text.starts_with("Manifest update successful on `release-beta` for `web`"));
        assert!(text.contains("Check the PR <"));
    }

    #[tokio::test]
    async fn test_stable_update_has_no_release_pr() {
        let github = github();
        let result = manager(github.clone(), Arc::new(StaticTagger::new()))
            .handle(&push("web", "stable", "new"))
            .await
            .unwrap();
        assert_eq!(result.code, 200);
        assert!(github.calls_to("search_issues").is_empty());
        assert!(!result.notification(Channel::Slack).unwrap().contains("Check the PR"));
    }

    #[tokio::test]
    async fn test_commit_failure_is_client_error() {
        let github = github();
        github.fail_on("create_commit", ApiError::new(500, "boom"));
        let result = manager(github, Arc::new(StaticTagger::new()))
            .handle(&push("web", "release-beta", "new"))
            .await
            .unwrap();
        assert_eq!(result.code, 400);
        assert!(result
            .notification(Channel::Slack)
            .unwrap()
            .starts_with("Error updating manifest on `release-beta` for `web` :scream:"));
    }
}
