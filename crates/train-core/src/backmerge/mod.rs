//! Backmerge engine.
//!
//! A push to a branch with a configured backmerge target (`beta` ->
//! `release-beta` by default) is merged forward into that target. Conflicts
//! get a deterministic resolution branch and a pull request into the target.
//!
//! Deciding what happened ([`BackmergeReport`]) is kept apart from rendering
//! it ([`notifications`]).

pub mod naming;
pub mod notifications;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;

use crate::error::Result;
use crate::event::refs::{branch_from_ref, heads_ref};
use crate::event::{PushEvent, WebhookEvent};
use crate::github::{NewPullRequest, PullRequest, PullRequestState};
use crate::manager::{Manager, ManagerContext, ManagerResult};

pub use notifications::{BackmergeReport, ConflictPr, MergeOutcome, RepoMerge};

/// Branch pair a push was gated through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackmergePlan {
    pub owner: String,
    pub head: String,
    pub back: String,
}

pub struct BackmergeManager {
    ctx: ManagerContext,
}

impl BackmergeManager {
    pub const NAME: &'static str = "backmergeManager";

    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx }
    }

    /// `None` when the push does not call for a backmerge.
    pub fn plan(&self, push: &PushEvent) -> Option<BackmergePlan> {
        let platform = &self.ctx.config.platform;
        if push.repository.name == platform.repo || push.commits.is_empty() {
            return None;
        }
        let head = branch_from_ref(&push.ref_name).ok()?;
        let back = platform.backmerge_target(head)?;
        Some(BackmergePlan {
            owner: push.repository.owner.login.clone(),
            head: head.to_string(),
            back: back.to_string(),
        })
    }

    /// Merge `plan.head` into `plan.back` across `repos`.
    pub async fn backmerge(
        &self,
        plan: &BackmergePlan,
        repos: &[String],
        push: &PushEvent,
    ) -> Result<BackmergeReport> {
        let github = self.ctx.github.as_ref();
        let owner = plan.owner.as_str();

        let tips = join_all(repos.iter().map(|repo| async move {
            let head = github.get_ref(owner, repo, &heads_ref(&plan.head)).await?;
            let back = github.get_ref(owner, repo, &heads_ref(&plan.back)).await?;
            Ok::<_, crate::error::TrainError>((repo.clone(), head.sha, back.sha))
        }))
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        let backmergeable: Vec<_> = tips
            .into_iter()
            .filter(|(_, head_sha, back_sha)| head_sha != back_sha)
            .collect();

        let merges = join_all(backmergeable.into_iter().map(|(repo, head_sha, back_sha)| {
            let message = naming::backmerge_commit_message(&plan.head, &head_sha, &push.commits);
            async move {
                let outcome = match github
                    .merge(owner, &repo, &plan.back, &plan.head, &message)
                    .await
                {
                    Ok(response) if response.status == 204 => MergeOutcome::Ignored,
                    Ok(response) => MergeOutcome::Merged {
                        commit: response.commit,
                    },
                    Err(err) if err.is_status(409) => MergeOutcome::Conflict,
                    Err(err) => MergeOutcome::Failed {
                        reason: err.to_string(),
                    },
                };
                tracing::info!(
                    manager = Self::NAME,
                    repo = %repo,
                    outcome = ?outcome,
                    "backmerge attempted"
                );
                RepoMerge {
                    repo,
                    head_sha,
                    back_sha,
                    outcome,
                }
            }
        }))
        .await;

        let attempts = join_all(
            merges
                .iter()
                .filter(|m| m.outcome == MergeOutcome::Conflict)
                .map(|m| async move { (m.repo.clone(), self.open_conflict_pr(plan, m).await) }),
        )
        .await;

        let mut conflict_prs = Vec::new();
        let mut unresolved = Vec::new();
        for (repo, attempt) in attempts {
            match attempt {
                Ok(pr) => conflict_prs.push(pr),
                Err(err) => {
                    tracing::warn!(
                        manager = Self::NAME,
                        repo = %repo,
                        error = %err,
                        "could not open conflict resolution PR"
                    );
                    unresolved.push((repo, err.to_string()));
                }
            }
        }

        Ok(BackmergeReport {
            owner: plan.owner.clone(),
            head: plan.head.clone(),
            back: plan.back.clone(),
            merges,
            conflict_prs,
            unresolved,
        })
    }

    /// Point the resolution branch at head and open (or reuse) its PR into back.
    async fn open_conflict_pr(
        &self,
        plan: &BackmergePlan,
        merge: &RepoMerge,
    ) -> Result<ConflictPr> {
        let github = self.ctx.github.as_ref();
        let owner = plan.owner.as_str();
        let repo = merge.repo.as_str();
        let branch = naming::conflict_branch_name(&plan.back, &merge.head_sha, &merge.back_sha);

        match github
            .create_ref(owner, repo, &format!("refs/{}", heads_ref(&branch)), &merge.head_sha)
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_status(422) => {
                github
                    .update_ref(owner, repo, &heads_ref(&branch), &merge.head_sha, true)
                    .await?;
            }
            Err(err) => return Err(err.into()),
        }

        let author = self.head_author(owner, repo, &plan.head).await;
        let pr = NewPullRequest {
            title: naming::resolution_pr_title(Utc::now().date_naive()),
            head: branch.clone(),
            base: plan.back.clone(),
            body: Some(naming::resolution_pr_body(
                &plan.head,
                &plan.back,
                author.as_deref(),
                &branch,
            )),
        };
        let created = match github.create_pull_request(owner, repo, &pr).await {
            Ok(created) => created,
            Err(err) if err.is_status(422) => self
                .existing_pr(owner, repo, &branch)
                .await?
                .ok_or(err)?,
            Err(err) => return Err(err.into()),
        };

        let labels = self.conflict_labels(&plan.back);
        if let Err(err) = github.add_labels(owner, repo, created.number, &labels).await {
            tracing::warn!(
                manager = Self::NAME,
                repo = %repo,
                pr = created.number,
                error = %err,
                "could not label conflict resolution PR"
            );
        }

        Ok(ConflictPr {
            repo: repo.to_string(),
            branch,
            number: created.number,
            html_url: created.html_url,
            author,
        })
    }

    /// Login of whoever opened the latest open PR from `head`.
    async fn head_author(&self, owner: &str, repo: &str, head: &str) -> Option<String> {
        match self
            .ctx
            .github
            .list_pull_requests(owner, repo, &format!("{owner}:{head}"), PullRequestState::Open)
            .await
        {
            Ok(prs) => prs.into_iter().next().and_then(|pr| pr.user_login),
            Err(err) => {
                tracing::debug!(repo = %repo, error = %err, "author lookup failed");
                None
            }
        }
    }

    async fn existing_pr(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<PullRequest>> {
        let prs = self
            .ctx
            .github
            .list_pull_requests(owner, repo, &format!("{owner}:{branch}"), PullRequestState::Open)
            .await?;
        Ok(prs.into_iter().next())
    }

    fn conflict_labels(&self, back: &str) -> Vec<String> {
        let platform = &self.ctx.config.platform;
        let mut labels = Vec::with_capacity(2);
        if back == platform.branches.beta {
            labels.push(platform.labels.beta_fix.clone());
        }
        labels.push(platform.labels.backmerge_conflict.clone());
        labels
    }
}

#[async_trait]
impl Manager for BackmergeManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<ManagerResult> {
        let WebhookEvent::Push(push) = event else {
            return Ok(ManagerResult::accepted(Self::NAME));
        };
        let Some(plan) = self.plan(push) else {
            return Ok(ManagerResult::accepted(Self::NAME));
        };

        let repos = vec![push.repository.name.clone()];
        match self.backmerge(&plan, &repos, push).await {
            Ok(report) if report.merges.is_empty() => {
                tracing::debug!(
                    manager = Self::NAME,
                    head = %plan.head,
                    back = %plan.back,
                    "nothing to backmerge"
                );
                Ok(ManagerResult::accepted(Self::NAME))
            }
            Ok(report) => {
                Ok(ManagerResult::ok(Self::NAME).with_slack(notifications::render_success(&report)))
            }
            Err(err) => {
                tracing::error!(
                    manager = Self::NAME,
                    repo = %push.repository.name,
                    error = %err,
                    "backmerge failed"
                );
                Ok(ManagerResult::bad_request(Self::NAME).with_slack(
                    notifications::render_failure(
                        &push.repository.name,
                        &plan.head,
                        &plan.back,
                        &err,
                    ),
                ))
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
    use crate::github::MergeResponse;
    use crate::manager::Channel;

    fn manager(github: Arc<FakeGitHub>) -> BackmergeManager {
        BackmergeManager::new(ManagerContext {
            github,
            config: Arc::new(TrainConfig::default()),
            changelog: Arc::new(StaticChangelog::new()),
            tagger: Arc::new(StaticTagger::new()),
        })
    }

    fn push(repo: &str, git_ref: &str, commits: usize) -> WebhookEvent {
        let commits: Vec<_> = (0..commits)
            .map(|i| json!({ "id": format!("c{i}ffffffff"), "message": format!("change {i}") }))
            .collect();
        EventShape::Push
            .parse(&json!({
                "ref": git_ref,
                "after": "1111111aaaa",
                "commits": commits,
                "head_commit": { "id": "1111111aaaa" },
                "repository": { "name": repo, "owner": { "login": "acme" } },
                "sender": { "login": "octocat" },
                "installation": { "id": 1 }
            }))
            .unwrap()
    }

    fn github_with_branches() -> Arc<FakeGitHub> {
        let github = Arc::new(FakeGitHub::new());
        github.set_branch("web", "beta", "1111111aaaa");
        github.set_branch("web", "release-beta", "2222222bbbb");
        github
    }

    #[tokio::test]
    async fn test_gate_ignores_platform_unmapped_and_empty_pushes() {
        let github = github_with_branches();
        let m = manager(github.clone());
        for event in [
            push("platform", "refs/heads/beta", 1),
            push("web", "refs/heads/feature", 1),
            push("web", "refs/heads/beta", 0),
            push("web", "refs/tags/v1.0.0", 1),
        ] {
            assert_eq!(m.handle(&event).await.unwrap().code, 202);
        }
        assert!(github.calls().is_empty());
    }

    #[tokio::test]
    async fn test_equal_tips_are_not_backmergeable() {
        let github = github_with_branches();
        github.set_branch("web", "release-beta", "1111111aaaa");
        let result = manager(github.clone())
            .handle(&push("web", "refs/heads/beta", 1))
            .await
            .unwrap();
        assert_eq!(result.code, 202);
        assert!(github.calls_to("merge").is_empty());
    }

    #[tokio::test]
    async fn test_merged_repo_is_reported() {
        let github = github_with_branches();
        let result = manager(github.clone())
            .handle(&push("web", "refs/heads/beta", 2))
            .await
            .unwrap();
        assert_eq!(result.code, 200);
        assert_eq!(result.manager, "backmergeManager");
        let text = result.notification(Channel::Slack).unwrap();
        assert!(text.contains("*web*: New head"));

        match &github.calls_to("merge")[0] {
            GitHubCall::Merge {
                base,
                head,
                message,
                ..
            } => {
                assert_eq!(base, "release-beta");
                assert_eq!(head, "beta");
                assert!(message.starts_with("Merge beta fix (1111111)"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_already_merged_is_ignored_not_failed() {
        let github = github_with_branches();
        github.set_merge_result(
            "web",
            Ok(MergeResponse {
                status: 204,
                commit: None,
            }),
        );
        let result = manager(github)
            .handle(&push("web", "refs/heads/beta", 1))
            .await
            .unwrap();
        assert_eq!(result.code, 200);
        assert!(result
            .notification(Channel::Slack)
            .unwrap()
            .contains("Already up to date: `web`"));
    }

    #[tokio::test]
    async fn test_conflict_opens_labelled_resolution_pr() {
        let github = github_with_branches();
        github.set_merge_result("web", Err(ApiError::new(409, "Merge conflict")));
        github.add_open_pr(
            "web",
            "acme:beta",
            PullRequest {
                number: 7,
                title: "fix login".to_string(),
                html_url: "https://github.com/acme/web/pull/7".to_string(),
                head_sha: "1111111aaaa".to_string(),
                user_login: Some("octocat".to_string()),
            },
        );

        let result = manager(github.clone())
            .handle(&push("web", "refs/heads/beta", 1))
            .await
            .unwrap();
        assert_eq!(result.code, 200);

        let branch = "release-beta-fix/conflict-1111111-2222222";
        assert_eq!(
            github.ref_sha("web", &format!("heads/{branch}")).as_deref(),
            Some("1111111aaaa")
        );
        match &github.calls_to("create_pull_request")[0] {
            GitHubCall::CreatePullRequest { pr, .. } => {
                assert_eq!(pr.head, branch);
                assert_eq!(pr.base, "release-beta");
                assert!(pr.title.starts_with("Backmerge conflict "));
                assert!(pr.body.as_deref().unwrap().contains("@octocat"));
            }
            other => panic!("unexpected call {other:?}"),
        }
        match &github.calls_to("add_labels")[0] {
            GitHubCall::AddLabels { labels, .. } => {
                assert_eq!(labels, &vec!["beta-fix".to_string(), "backmerge-conflict".to_string()]);
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert!(result
            .notification(Channel::Slack)
            .unwrap()
            .contains("Ping *@octocat*"));
    }

    #[tokio::test]
    async fn test_existing_resolution_branch_is_force_updated() {
        let github = github_with_branches();
        github.set_merge_result("web", Err(ApiError::new(409, "Merge conflict")));
        github.set_branch("web", "release-beta-fix/conflict-1111111-2222222", "0000000");

        manager(github.clone())
            .handle(&push("web", "refs/heads/beta", 1))
            .await
            .unwrap();

        let updates = github.calls_to("update_ref");
        assert_eq!(updates.len(), 1);
        assert!(matches!(&updates[0], GitHubCall::UpdateRef { force: true, .. }));
    }

    #[tokio::test]
    async fn test_label_failure_does_not_fail_backmerge() {
        let github = github_with_branches();
        github.set_merge_result("web", Err(ApiError::new(409, "Merge conflict")));
        github.fail_on("add_labels", ApiError::new(500, "boom"));
        let result = manager(github)
            .handle(&push("web", "refs/heads/beta", 1))
            .await
            .unwrap();
        assert_eq!(result.code, 200);
        assert!(result.notification(Channel::Slack).unwrap().contains("PR <"));
    }

    #[tokio::test]
    async fn test_missing_ref_is_a_client_error() {
        let github = Arc::new(FakeGitHub::new());
        github.set_branch("web", "beta", "1111111aaaa");
        let result = manager(github)
            .handle(&push("web", "refs/heads/beta", 1))
            .await
            .unwrap();
        assert_eq!(result.code, 400);
        assert!(result
            .notification(Channel::Slack)
            .unwrap()
            .starts_with("There was an error backmerging on `web` from `beta` to `release-beta`"));
    }
}
