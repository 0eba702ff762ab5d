//! The open platform pull request that promotes a release branch.

use crate::error::Result;
use crate::github::{GitHubApi, NewPullRequest, PullRequest};

/// `is:pr is:open repo:<owner>/<repo> base:<base>`
pub fn release_pr_query(owner: &str, repo: &str, base: &str) -> String {
    format!("is:pr is:open repo:{owner}/{repo} base:{base}")
}

/// The open platform PR into `base`, if any.
pub async fn find_release_pr(
    github: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    base: &str,
) -> Result<Option<PullRequest>> {
    let found = github
        .search_issues(&release_pr_query(owner, repo, base))
        .await?;
    match found.first() {
        Some(item) => Ok(Some(github.get_pull_request(owner, repo, item.number).await?)),
        None => Ok(None),
    }
}

/// Reuse the open PR into `base`, else open `Release to <base>` from `head`.
pub async fn ensure_release_pr(
    github: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    head: &str,
    base: &str,
) -> Result<PullRequest> {
    if let Some(existing) = find_release_pr(github, owner, repo, base).await? {
        tracing::info!(repo = %repo, pr = existing.number, base = %base, "reusing release PR");
        return Ok(existing);
    }
    let created = github
        .create_pull_request(
            owner,
            repo,
            &NewPullRequest {
                title: format!("Release to {base}"),
                head: head.to_string(),
                base: base.to_string(),
                body: None,
            },
        )
        .await?;
    tracing::info!(repo = %repo, pr = created.number, base = %base, "opened release PR");
    Ok(created)
}
