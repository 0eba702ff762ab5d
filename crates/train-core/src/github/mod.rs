//! Hosting-platform capability surface.
//!
//! [`GitHubApi`] is the only way the engines talk to GitHub. Production wires
//! in the REST client from `train-clients`; tests use [`crate::fakes::FakeGitHub`].
//! Failed calls surface as [`ApiError`] carrying the HTTP status, which is what
//! the engines branch on (404 missing ref, 409 conflict, 422 ref exists).

pub mod types;

use async_trait::async_trait;

use crate::error::ApiError;

pub use types::*;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Repositories visible to the app installation.
    async fn list_installation_repos(&self) -> ApiResult<Vec<InstalledRepo>>;

    /// Search issues and pull requests with a GitHub search query.
    async fn search_issues(&self, query: &str) -> ApiResult<Vec<IssueSummary>>;

    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64)
        -> ApiResult<PullRequest>;

    /// List pull requests whose head is `head` (`owner:branch`).
    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        state: PullRequestState,
    ) -> ApiResult<Vec<PullRequest>>;

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &NewPullRequest,
    ) -> ApiResult<PullRequest>;

    async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> ApiResult<()>;

    /// Read a ref such as `heads/beta`.
    async fn get_ref(&self, owner: &str, repo: &str, git_ref: &str) -> ApiResult<GitRef>;

    /// Create a fully qualified ref such as `refs/heads/beta`. Fails with 422 when it exists.
    async fn create_ref(&self, owner: &str, repo: &str, git_ref: &str, sha: &str)
        -> ApiResult<GitRef>;

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
        force: bool,
    ) -> ApiResult<GitRef>;

    async fn get_tree(&self, owner: &str, repo: &str, tree_sha: &str) -> ApiResult<Tree>;

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> ApiResult<Tree>;

    async fn create_commit(&self, owner: &str, repo: &str, commit: &NewCommit)
        -> ApiResult<CommitInfo>;

    async fn list_tags(&self, owner: &str, repo: &str) -> ApiResult<Vec<Tag>>;

    async fn create_tag(&self, owner: &str, repo: &str, tag: &NewTag) -> ApiResult<TagObject>;

    /// Compare `base...head`.
    async fn compare(&self, owner: &str, repo: &str, base: &str, head: &str)
        -> ApiResult<Comparison>;

    /// Merge `head` into `base`. 404 and 409 come back as errors.
    async fn merge(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        commit_message: &str,
    ) -> ApiResult<MergeResponse>;

    async fn create_check_run(&self, owner: &str, repo: &str, state: &CheckRunState)
        -> ApiResult<()>;

    /// Read and decode a file; `None` when it does not exist at `git_ref`.
    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> ApiResult<Option<RepoFile>>;

    async fn put_file(&self, owner: &str, repo: &str, update: &FileUpdate) -> ApiResult<()>;
}
