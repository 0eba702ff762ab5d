//! Train-update engine.
//!
//! When a platform PR is merged into a release branch, that branch is moved
//! forward in every component repository. The move is gated: if a single
//! repository cannot be fast-forwarded, no ref is touched anywhere.

pub mod comparison;
pub mod notifications;
pub mod release_pr;

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::{Result, TrainError};
use crate::event::refs::heads_ref;
use crate::event::{PullRequestEvent, WebhookEvent};
use crate::manager::{Manager, ManagerContext, ManagerResult};
use crate::manifest::tag::BumpLevel;
use crate::manifest::{commit_manifest, file_url, read_manifest, Manifest};

pub use comparison::{ComparisonKind, RepoComparison, TrainPlan};
pub use notifications::TrainDeparture;

/// PR actions that report a merge.
pub const MERGE_ACTIONS: [&str; 2] = ["closed", "merge"];

/// How a gated train update ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainRun {
    /// At least one repository needs a merge commit; nothing was changed.
    Blocked(TrainPlan),
    Departed(TrainDeparture),
}

pub struct TrainManager {
    ctx: ManagerContext,
}

impl TrainManager {
    pub const NAME: &'static str = "trainManager";

    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx }
    }

    fn summoned(&self, event: &PullRequestEvent) -> bool {
        let platform = &self.ctx.config.platform;
        event.repository.name == platform.repo
            && platform.is_release_branch(event.base())
            && MERGE_ACTIONS.contains(&event.action.as_str())
            && event.pull_request.merged
    }

    /// Compare `base...head` in every repository, waiting for all of them.
    pub async fn compare_all(
        &self,
        owner: &str,
        repos: &[String],
        base: &str,
        head: &str,
    ) -> Result<Vec<RepoComparison>> {
        let github = self.ctx.github.as_ref();
        join_all(repos.iter().map(|repo| async move {
            let comparison = github.compare(owner, repo, base, head).await?;
            Ok::<_, TrainError>(RepoComparison::new(repo.clone(), comparison))
        }))
        .await
        .into_iter()
        .collect()
    }

    /// Move `base` to `head` across all component repositories.
    pub async fn depart(&self, owner: &str, head: &str, base: &str) -> Result<TrainRun> {
        let repos = self.ctx.component_repos().await?;
        let comparisons = self.compare_all(owner, &repos, base, head).await?;
        let plan = TrainPlan::partition(comparisons.iter().cloned());

        if !plan.can_depart() {
            tracing::warn!(
                manager = Self::NAME,
                base = %base,
                blocked = ?plan.blocked_repos(),
                "train cannot be fast-forwarded"
            );
            return Ok(TrainRun::Blocked(plan));
        }

        let targets = plan
            .fast_forward
            .iter()
            .map(|c| {
                c.new_head()
                    .map(|sha| (c.repo.clone(), sha.to_string()))
                    .ok_or_else(|| {
                        TrainError::Comparison(format!(
                            "comparison of `{base}...{head}` in {} lists no commits",
                            c.repo
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let advanced = self.advance(owner, base, targets).await?;

        let platform = &self.ctx.config.platform;
        let manifest_url = file_url(owner, &platform.repo, base, &platform.manifest);
        let mut departure = TrainDeparture {
            owner: owner.to_string(),
            head: head.to_string(),
            base: base.to_string(),
            advanced,
            up_to_date: plan.up_to_date.iter().map(|c| c.repo.clone()).collect(),
            release_pr: None,
            manifest_url,
            changelog_url: None,
            tag: None,
        };

        if !platform.is_stable(base) {
            self.release(owner, base, &comparisons, &mut departure)
                .await?;
        }

        Ok(TrainRun::Departed(departure))
    }

    /// Update every target ref concurrently; fails if any update failed.
    async fn advance(
        &self,
        owner: &str,
        base: &str,
        targets: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>> {
        let github = self.ctx.github.as_ref();
        let git_ref = heads_ref(base);
        let git_ref = git_ref.as_str();
        join_all(targets.into_iter().map(|(repo, sha)| async move {
            match github.update_ref(owner, &repo, git_ref, &sha, false).await {
                Ok(_) => {
                    tracing::info!(manager = Self::NAME, repo = %repo, sha = %sha, "ref advanced");
                    Ok((repo, sha))
                }
                Err(err) => {
                    tracing::error!(
                        manager = Self::NAME,
                        repo = %repo,
                        error = %err,
                        "ref advance failed"
                    );
                    Err(TrainError::from(err))
                }
            }
        }))
        .await
        .into_iter()
        .collect()
    }

    /// Manifest commit, release PR, changelog and tag for a non-stable branch.
    async fn release(
        &self,
        owner: &str,
        base: &str,
        comparisons: &[RepoComparison],
        departure: &mut TrainDeparture,
    ) -> Result<()> {
        let github = self.ctx.github.as_ref();
        let platform = &self.ctx.config.platform;

        let previous =
            read_manifest(github, owner, &platform.repo, &platform.manifest, base).await?;
        let manifest = Manifest::from_comparisons(
            comparisons
                .iter()
                .map(|c| (c.repo.as_str(), &c.comparison)),
        )
        .with_overrides(departure.advanced.iter().cloned());

        if let Some(next) = platform.next_base(base) {
            departure.release_pr = Some(
                release_pr::ensure_release_pr(github, owner, &platform.repo, base, next).await?,
            );
        }

        if manifest == previous {
            tracing::info!(manager = Self::NAME, base = %base, "manifest already current");
            return Ok(());
        }

        let commit =
            commit_manifest(github, owner, &platform.repo, &platform.manifest, base, &manifest)
                .await?;
        departure.changelog_url = Some(
            self.ctx
                .changelog
                .update(owner, base, &previous, &manifest)
                .await?,
        );
        departure.tag = Some(
            self.ctx
                .tagger
                .create(owner, base, &commit.sha, BumpLevel::Patch)
                .await?,
        );
        Ok(())
    }
}

#[async_trait]
impl Manager for TrainManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, event: &WebhookEvent) -> Result<ManagerResult> {
        let WebhookEvent::PullRequest(pr) = event else {
            return Ok(ManagerResult::accepted(Self::NAME));
        };
        if !self.summoned(pr) {
            return Ok(ManagerResult::accepted(Self::NAME));
        }

        let owner = pr.repository.owner.login.as_str();
        let (head, base) = (pr.head(), pr.base());
        tracing::info!(manager = Self::NAME, head = %head, base = %base, "train summoned");

        match self.depart(owner, head, base).await {
            Ok(TrainRun::Departed(departure)) => Ok(ManagerResult::ok(Self::NAME)
                .with_slack(notifications::render_departure(&departure))),
            Ok(TrainRun::Blocked(plan)) => Ok(ManagerResult::bad_request(Self::NAME).with_slack(
                notifications::render_blocked(owner, Self::NAME, head, base, &plan.blocked_repos()),
            )),
            Err(err) => {
                tracing::error!(
                    manager = Self::NAME,
                    head = %head,
                    base = %base,
                    error = %err,
                    "train update failed"
                );
                Ok(ManagerResult::bad_request(Self::NAME)
                    .with_slack(notifications::render_failure(head, base, &err)))
            }
        }
    }
}
