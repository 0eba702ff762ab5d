//! Backmerge-conflict check on the open platform release PR.
//!
//! Whenever a pull request into a release branch changes (or someone asks for
//! a re-run from the check itself) the open platform PR into that branch gets
//! a `Backmerge conflict` check run. It fails while any open conflict
//! resolution PR into the same branch exists anywhere in the installation.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use crate::backmerge::naming::CONFLICT_TITLE;
use crate::error::Result;
use crate::event::WebhookEvent;
use crate::github::{
    CheckAction, CheckConclusion, CheckOutput, CheckRunState, IssueSummary, PullRequest,
};
use crate::manager::{Manager, ManagerContext, ManagerResult};
use crate::train::release_pr::find_release_pr;

pub const CHECK_NAME: &str = "Backmerge conflict";

/// Requested-action identifier that re-runs the check.
pub const RERUN_ACTION: &str = "rerequested";

/// Pull request actions that trigger the check.
pub const PR_ACTIONS: [&str; 5] = ["opened", "closed", "reopened", "edited", "synchronize"];

pub fn rerun_action() -> CheckAction {
    CheckAction {
        label: "Trigger again".to_string(),
        description: "Retrigger the backmerge conflict checker".to_string(),
        identifier: RERUN_ACTION.to_string(),
    }
}

/// Open conflict-resolution PRs into `base` across `repos` (`owner/name`).
pub fn conflicts_query<'a>(repos: impl IntoIterator<Item = &'a str>, base: &str) -> String {
    let repos: Vec<String> = repos.into_iter().map(|r| format!("repo:{r}")).collect();
    format!(
        "is:pr is:open {} base:{base} \"{CONFLICT_TITLE}\" in:title",
        repos.join(" ")
    )
}

/// Completed check run state for `platform_pr` given the conflicts found.
pub fn check_state(platform_pr: &PullRequest, conflicts: &[IssueSummary]) -> CheckRunState {
    let (conclusion, output) = if conflicts.is_empty() {
        (
            CheckConclusion::Success,
            CheckOutput {
                title: "Everything is OK :D".to_string(),
                summary: String::new(),
                text: "No conflicts found, please go ahead and merge".to_string(),
            },
        )
    } else {
        let plural = if conflicts.len() > 1 { "s" } else { "" };
        let urls: Vec<&str> = conflicts.iter().map(|c| c.html_url.as_str()).collect();
        (
            CheckConclusion::Failure,
            CheckOutput {
                title: format!("Found {} conflict{plural} across the platform", conflicts.len()),
                summary: "Please, fix the conflicts found, then re-trigger this check.".to_string(),
                text: format!("Conflicts:\n{}\n", urls.join("\n")),
            },
        )
    };
    CheckRunState {
        name: CHECK_NAME.to_string(),
        head_sha: platform_pr.head_sha.clone(),
        status: "completed".to_string(),
        conclusion,
        completed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        details_url: Some(format!("{}/checks", platform_pr.html_url)),
        output,
        actions: vec![rerun_action()],
    }
}

pub struct ConflictCheckManager {
    ctx: ManagerContext,
}

impl ConflictCheckManager {
    pub const NAME: &'static str = "backmergeConflictManager";

    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx }
    }

    /// Release branch the event concerns, when it should trigger the check.
    fn base<'a>(&self, event: &'a WebhookEvent) -> Option<&'a str> {
        match event {
            WebhookEvent::PullRequest(pr) if PR_ACTIONS.contains(&pr.action.as_str()) => {
                Some(pr.base())
            }
            WebhookEvent::CheckRun(check)
                if check
                    .requested_action
                    .as_ref()
                    .is_some_and(|a| a.identifier == RERUN_ACTION) =>
            {
                check
                    .check_run
                    .pull_requests
                    .first()
                    .map(|pr| pr.base.ref_name.as_str())
            }
            _ => None,
        }
    }

    /// Update the check on the platform PR into `base`.
    ///
    /// Returns the number of conflicts, or `None` when there is no platform PR.
    pub async fn check(
        &self,
        owner: &str,
        base: &str,
        platform_pr: &mut Option<PullRequest>,
    ) -> Result<Option<usize>> {
        let github = self.ctx.github.as_ref();
        let platform = self.ctx.platform_repo();

        *platform_pr = find_release_pr(github, owner, platform, base).await?;
        let Some(pr) = platform_pr.as_ref() else {
            tracing::debug!(manager = Self::NAME, base = %base, "no platform PR");
            return Ok(None);
        };

        let repos = github.list_installation_repos().await?;
        let conflicts = github
            .search_issues(&conflicts_query(
                repos.iter().map(|r| r.full_name.as_str()),
                base,
            ))
            .await?;
        tracing::info!(
            manager = Self::NAME,
            base = %base,
            repos = repos.len(),
            conflicts = conflicts.len(),
            "conflicts searched"
        );

        github
            .create_check_run(owner, platform, &check_state(pr, &conflicts))
            .await?;
        Ok(Some(conflicts.len()))
    }
}

pub fn render_failure(
    owner: &str,
    manager: &str,
    platform_pr: Option<&PullRequest>,
    error: &dyn std::fmt::Display,
) -> String {
    let retrigger = platform_pr
        .map(|pr| format!("Please try retriggering it <{}/checks|here>.\n\n", pr.html_url))
        .unwrap_or_default();
    format!(
        "Error updating check `{CHECK_NAME}`\n\n\
         Installation: *{owner}*\n\
         Method: `{manager}`\n\n\
         {retrigger}\
         Here is the error for debugging purposes:\n\n\
         ```{error}```"
    )
}

#[async_trait]
impl Manager for ConflictCheckManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<ManagerResult> {
        let Some(base) = self.base(event) else {
            return Ok(ManagerResult::accepted(Self::NAME));
        };
        let owner = event.repository().owner.login.as_str();

        let mut platform_pr = None;
        match self.check(owner, base, &mut platform_pr).await {
            Ok(None) | Ok(Some(0)) => Ok(ManagerResult::accepted(Self::NAME)),
            Ok(Some(_)) => Ok(ManagerResult::ok(Self::NAME)),
            Err(err) => {
                tracing::error!(
                    manager = Self::NAME,
                    base = %base,
                    error = %err,
                    "conflict check failed"
                );
                Ok(ManagerResult::bad_request(Self::NAME).with_slack(render_failure(
                    owner,
                    Self::NAME,
                    platform_pr.as_ref(),
                    &err,
                )))
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

    fn manager(github: Arc<FakeGitHub>) -> ConflictCheckManager {
        ConflictCheckManager::new(ManagerContext {
            github,
            config: Arc::new(TrainConfig::default()),
            changelog: Arc::new(StaticChangelog::new()),
            tagger: Arc::new(StaticTagger::new()),
        })
    }

    fn platform_pr() -> PullRequest {
        PullRequest {
            number: 5,
            title: "Release to stable".to_string(),
            html_url: "https://github.com/acme/platform/pull/5".to_string(),
            head_sha: "ppppppp5555".to_string(),
            user_login: None,
        }
    }

    fn summary(number: u64, url: &str) -> IssueSummary {
        IssueSummary {
            number,
            title: "Backmerge conflict 2019-01-08".to_string(),
            html_url: url.to_string(),
        }
    }

    fn github_with_platform_pr() -> Arc<FakeGitHub> {
        let github = Arc::new(FakeGitHub::new());
        github.add_repo("platform");
        github.add_repo("web");
        github.add_open_pr("platform", "acme:release-beta", platform_pr());
        github.add_search_result("repo:acme/platform base:stable", vec![summary(5, "x")]);
        github
    }

    fn pull_request(action: &str, base: &str) -> WebhookEvent {
        EventShape::PullRequest
            .parse(&json!({
                "action": action,
                "pull_request": {
                    "head": { "ref": "release-beta-fix/conflict-1-2", "sha": "abc" },
                    "base": { "ref": base },
                    "merged": false
                },
                "repository": { "name": "web", "owner": { "login": "acme" } },
                "installation": { "id": 1 }
            }))
            .unwrap()
    }

    fn rerun(identifier: &str) -> WebhookEvent {
        EventShape::CheckRun
            .parse(&json!({
                "action": "requested_action",
                "check_run": {
                    "head_sha": "ppppppp5555",
                    "pull_requests": [{ "base": { "ref": "stable" } }]
                },
                "requested_action": { "identifier": identifier },
                "repository": { "name": "platform", "owner": { "login": "acme" } },
                "installation": { "id": 1 }
            }))
            .unwrap()
    }

    #[test]
    fn test_conflicts_query() {
        assert_eq!(
            conflicts_query(["acme/web", "acme/api"], "stable"),
            "is:pr is:open repo:acme/web repo:acme/api base:stable \"Backmerge conflict\" in:title"
        );
    }

    #[test]
    fn test_check_state_failure_lists_urls() {
        let state = check_state(&platform_pr(), &[summary(1, "u1"), summary(2, "u2")]);
        assert_eq!(state.conclusion, CheckConclusion::Failure);
        assert_eq!(state.output.title, "Found 2 conflicts across the platform");
        assert_eq!(state.output.text, "Conflicts:\nu1\nu2\n");
        assert_eq!(
            state.details_url.as_deref(),
            Some("https://github.com/acme/platform/pull/5/checks")
        );
        assert_eq!(state.actions, vec![rerun_action()]);
    }

    #[tokio::test]
    async fn test_ignored_actions() {
        let github = github_with_platform_pr();
        let m = manager(github.clone());
        assert_eq!(m.handle(&pull_request("labeled", "stable")).await.unwrap().code, 202);
        assert_eq!(m.handle(&rerun("something_else")).await.unwrap().code, 202);
        assert!(github.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_platform_pr_is_accepted() {
        let github = Arc::new(FakeGitHub::new());
        let result = manager(github.clone())
            .handle(&pull_request("opened", "stable"))
            .await
            .unwrap();
        assert_eq!(result.code, 202);
        assert!(github.calls_to("create_check_run").is_empty());
    }

    #[tokio::test]
    async fn test_no_conflicts_passes_check() {
        let github = github_with_platform_pr();
        let result = manager(github.clone()).handle(&rerun(RERUN_ACTION)).await.unwrap();
        assert_eq!(result.code, 202);
        match &github.calls_to("create_check_run")[0] {
            GitHubCall::CreateCheckRun { repo, state } => {
                assert_eq!(repo, "platform");
                assert_eq!(state.conclusion, CheckConclusion::Success);
                assert_eq!(state.head_sha, "ppppppp5555");
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_conflicts_fail_check() {
        let github = github_with_platform_pr();
        github.add_search_result(
            "\"Backmerge conflict\" in:title",
            vec![summary(8, "https://github.com/acme/web/pull/8")],
        );
        let result = manager(github.clone())
            .handle(&pull_request("synchronize", "stable"))
            .await
            .unwrap();
        assert_eq!(result.code, 200);
        match &github.calls_to("create_check_run")[0] {
            GitHubCall::CreateCheckRun { state, .. } => {
                assert_eq!(state.conclusion, CheckConclusion::Failure);
                assert!(state.output.text.contains("/web/pull/8"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_check_failure_notifies_with_retrigger_link() {
        let github = github_with_platform_pr();
        github.fail_on("create_check_run", ApiError::new(403, "Resource not accessible"));
        let result = manager(github)
            .handle(&pull_request("opened", "stable"))
            .await
            .unwrap();
        assert_eq!(result.code, 400);
        let text = result.notification(Channel::Slack).unwrap();
        assert!(text.starts_with("Error updating check `Backmerge conflict`"));
        assert!(text.contains("<https://github.com/acme/platform/pull/5/checks|here>"));
        assert!(text.contains("Resource not accessible"));
    }
}
