//! In-memory fakes for the external capabilities (testing only).
//!
//! [`FakeGitHub`] keeps refs, comparisons, files and tags in memory, records
//! every call it receives and can be scripted to fail individual operations.
//! [`RecordingNotifier`], [`StaticChangelog`] and [`StaticTagger`] stand in
//! for the notification channel and the manifest collaborators.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{ApiError, NotifyError, Result};
use crate::github::*;
use crate::manager::Channel;
use crate::manifest::changelog::ChangelogWriter;
use crate::manifest::tag::{BumpLevel, ReleaseTagger};
use crate::manifest::Manifest;
use crate::notify::{ChatMessage, Notifier};

// ---------------------------------------------------------------------------
// FakeGitHub
// ---------------------------------------------------------------------------

/// One call received by [`FakeGitHub`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubCall {
    ListInstallationRepos,
    SearchIssues { query: String },
    GetPullRequest { repo: String, number: u64 },
    ListPullRequests { repo: String, head: String },
    CreatePullRequest { repo: String, pr: NewPullRequest },
    AddLabels { repo: String, number: u64, labels: Vec<String> },
    GetRef { repo: String, git_ref: String },
    CreateRef { repo: String, git_ref: String, sha: String },
    UpdateRef { repo: String, git_ref: String, sha: String, force: bool },
    GetTree { repo: String, sha: String },
    CreateTree { repo: String, base_tree: String, entries: Vec<TreeEntry> },
    CreateCommit { repo: String, commit: NewCommit },
    ListTags { repo: String },
    CreateTag { repo: String, tag: NewTag },
    Compare { repo: String, base: String, head: String },
    Merge { repo: String, base: String, head: String, message: String },
    CreateCheckRun { repo: String, state: CheckRunState },
    GetFile { repo: String, path: String, git_ref: String },
    PutFile { repo: String, update: FileUpdate },
}

impl GitHubCall {
    /// Operation name, as used by [`FakeGitHub::fail_on`].
    pub fn op(&self) -> &'static str {
        match self {
            GitHubCall::ListInstallationRepos => "list_installation_repos",
            GitHubCall::SearchIssues { .. } => "search_issues",
            GitHubCall::GetPullRequest { .. } => "get_pull_request",
            GitHubCall::ListPullRequests { .. } => "list_pull_requests",
            GitHubCall::CreatePullRequest { .. } => "create_pull_request",
            GitHubCall::AddLabels { .. } => "add_labels",
            GitHubCall::GetRef { .. } => "get_ref",
            GitHubCall::CreateRef { .. } => "create_ref",
            GitHubCall::UpdateRef { .. } => "update_ref",
            GitHubCall::GetTree { .. } => "get_tree",
            GitHubCall::CreateTree { .. } => "create_tree",
            GitHubCall::CreateCommit { .. } => "create_commit",
            GitHubCall::ListTags { .. } => "list_tags",
            GitHubCall::CreateTag { .. } => "create_tag",
            GitHubCall::Compare { .. } => "compare",
            GitHubCall::Merge { .. } => "merge",
            GitHubCall::CreateCheckRun { .. } => "create_check_run",
            GitHubCall::GetFile { .. } => "get_file",
            GitHubCall::PutFile { .. } => "put_file",
        }
    }

    /// Whether the call changes remote state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            GitHubCall::CreatePullRequest { .. }
                | GitHubCall::AddLabels { .. }
                | GitHubCall::CreateRef { .. }
                | GitHubCall::UpdateRef { .. }
                | GitHubCall::CreateTree { .. }
                | GitHubCall::CreateCommit { .. }
                | GitHubCall::CreateTag { .. }
                | GitHubCall::Merge { .. }
                | GitHubCall::CreateCheckRun { .. }
                | GitHubCall::PutFile { .. }
        )
    }

    pub fn repo(&self) -> Option<&str> {
        match self {
            GitHubCall::ListInstallationRepos | GitHubCall::SearchIssues { .. } => None,
            GitHubCall::GetPullRequest { repo, .. }
            | GitHubCall::ListPullRequests { repo, .. }
            | GitHubCall::CreatePullRequest { repo, .. }
            | GitHubCall::AddLabels { repo, .. }
            | GitHubCall::GetRef { repo, .. }
            | GitHubCall::CreateRef { repo, .. }
            | GitHubCall::UpdateRef { repo, .. }
            | GitHubCall::GetTree { repo, .. }
            | GitHubCall::CreateTree { repo, .. }
            | GitHubCall::CreateCommit { repo, .. }
            | GitHubCall::ListTags { repo }
            | GitHubCall::CreateTag { repo, .. }
            | GitHubCall::Compare { repo, .. }
            | GitHubCall::Merge { repo, .. }
            | GitHubCall::CreateCheckRun { repo, .. }
            | GitHubCall::GetFile { repo, .. }
            | GitHubCall::PutFile { repo, .. } => Some(repo),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    repos: Vec<String>,
    /// (repo, "heads/x" | "tags/x") -> sha
    refs: HashMap<(String, String), String>,
    comparisons: HashMap<(String, String, String), Comparison>,
    merges: HashMap<String, std::result::Result<MergeResponse, ApiError>>,
    files: HashMap<(String, String, String), RepoFile>,
    tags: HashMap<String, Vec<Tag>>,
    search: Vec<(String, Vec<IssueSummary>)>,
    open_prs: HashMap<(String, String), Vec<PullRequest>>,
    pull_requests: BTreeMap<(String, u64), PullRequest>,
    failures: HashMap<String, ApiError>,
    repo_failures: HashMap<(String, String), ApiError>,
    calls: Vec<GitHubCall>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Scriptable in-memory hosting API.
#[derive(Debug, Default)]
pub struct FakeGitHub {
    state: Mutex<FakeState>,
}

fn ref_key(git_ref: &str) -> String {
    git_ref.strip_prefix("refs/").unwrap_or(git_ref).to_string()
}

impl FakeGitHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&self, name: &str) {
        self.state.lock().unwrap().repos.push(name.to_string());
    }

    pub fn set_branch(&self, repo: &str, branch: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .refs
            .insert((repo.to_string(), format!("heads/{branch}")), sha.to_string());
    }

    pub fn set_comparison(&self, repo: &str, base: &str, head: &str, comparison: Comparison) {
        self.state.lock().unwrap().comparisons.insert(
            (repo.to_string(), base.to_string(), head.to_string()),
            comparison,
        );
    }

    /// Script the merge endpoint for `repo`; unscripted merges return 201.
    pub fn set_merge_result(
        &self,
        repo: &str,
        result: std::result::Result<MergeResponse, ApiError>,
    ) {
        self.state
            .lock()
            .unwrap()
            .merges
            .insert(repo.to_string(), result);
    }

    pub fn set_file(&self, repo: &str, path: &str, git_ref: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        let sha = format!("blob-{}", state.next_id());
        state.files.insert(
            (repo.to_string(), path.to_string(), git_ref.to_string()),
            RepoFile {
                content: content.to_string(),
                sha,
            },
        );
    }

    pub fn add_tag(&self, repo: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .tags
            .entry(repo.to_string())
            .or_default()
            .push(Tag {
                name: name.to_string(),
            });
    }

    /// Searches whose query contains `fragment` return `items`.
    pub fn add_search_result(&self, fragment: &str, items: Vec<IssueSummary>) {
        self.state
            .lock()
            .unwrap()
            .search
            .push((fragment.to_string(), items));
    }

    /// An open PR listed for `head` (`owner:branch`) and retrievable by number.
    pub fn add_open_pr(&self, repo: &str, head: &str, pr: PullRequest) {
        let mut state = self.state.lock().unwrap();
        state
            .pull_requests
            .insert((repo.to_string(), pr.number), pr.clone());
        state
            .open_prs
            .entry((repo.to_string(), head.to_string()))
            .or_default()
            .push(pr);
    }

    /// Make every call to `op` fail with `error`.
    pub fn fail_on(&self, op: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op.to_string(), error);
    }

    /// Make calls to `op` against `repo` fail with `error`.
    pub fn fail_on_repo(&self, op: &str, repo: &str, error: ApiError) {
        self.state
            .lock()
            .unwrap()
            .repo_failures
            .insert((op.to_string(), repo.to_string()), error);
    }

    pub fn calls(&self) -> Vec<GitHubCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<GitHubCall> {
        self.calls().into_iter().filter(|c| c.is_mutating()).collect()
    }

    pub fn calls_to(&self, op: &str) -> Vec<GitHubCall> {
        self.calls().into_iter().filter(|c| c.op() == op).collect()
    }

    pub fn ref_sha(&self, repo: &str, git_ref: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .refs
            .get(&(repo.to_string(), ref_key(git_ref)))
            .cloned()
    }

    pub fn file(&self, repo: &str, path: &str, git_ref: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&(repo.to_string(), path.to_string(), git_ref.to_string()))
            .map(|f| f.content.clone())
    }

    /// Record `call` and return the scripted failure for it, if any.
    fn record(&self, call: GitHubCall) -> std::result::Result<MutexGuard<'_, FakeState>, ApiError> {
        let mut state = self.state.lock().unwrap();
        let op = call.op();
        let failure = call
            .repo()
            .and_then(|repo| state.repo_failures.get(&(op.to_string(), repo.to_string())))
            .or_else(|| state.failures.get(op))
            .cloned();
        state.calls.push(call);
        match failure {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn list_installation_repos(&self) -> ApiResult<Vec<InstalledRepo>> {
        let state = self.record(GitHubCall::ListInstallationRepos)?;
        Ok(state
            .repos
            .iter()
            .map(|name| InstalledRepo {
                name: name.clone(),
                full_name: format!("acme/{name}"),
            })
            .collect())
    }

    async fn search_issues(&self, query: &str) -> ApiResult<Vec<IssueSummary>> {
        let state = self.record(GitHubCall::SearchIssues {
            query: query.to_string(),
        })?;
        Ok(state
            .search
            .iter()
            .filter(|(fragment, _)| query.contains(fragment.as_str()))
            .flat_map(|(_, items)| items.iter().cloned())
            .collect())
    }

    async fn get_pull_request(
        &self,
        _owner: &str,
        repo: &str,
        number: u64,
    ) -> ApiResult<PullRequest> {
        let state = self.record(GitHubCall::GetPullRequest {
            repo: repo.to_string(),
            number,
        })?;
        state
            .pull_requests
            .get(&(repo.to_string(), number))
            .cloned()
            .ok_or_else(|| ApiError::new(404, "Not Found"))
    }

    async fn list_pull_requests(
        &self,
        _owner: &str,
        repo: &str,
        head: &str,
        _state: PullRequestState,
    ) -> ApiResult<Vec<PullRequest>> {
        let state = self.record(GitHubCall::ListPullRequests {
            repo: repo.to_string(),
            head: head.to_string(),
        })?;
        Ok(state
            .open_prs
            .get(&(repo.to_string(), head.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &NewPullRequest,
    ) -> ApiResult<PullRequest> {
        let mut state = self.record(GitHubCall::CreatePullRequest {
            repo: repo.to_string(),
            pr: pr.clone(),
        })?;
        let number = state.next_id();
        let head_sha = state
            .refs
            .get(&(repo.to_string(), format!("heads/{}", pr.head)))
            .cloned()
            .unwrap_or_default();
        let created = PullRequest {
            number,
            title: pr.title.clone(),
            html_url: format!("https://github.com/{owner}/{repo}/pull/{number}"),
            head_sha,
            user_login: Some("release-train[bot]".to_string()),
        };
        state
            .pull_requests
            .insert((repo.to_string(), number), created.clone());
        Ok(created)
    }

    async fn add_labels(
        &self,
        _owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> ApiResult<()> {
        self.record(GitHubCall::AddLabels {
            repo: repo.to_string(),
            number,
            labels: labels.to_vec(),
        })?;
        Ok(())
    }

    async fn get_ref(&self, _owner: &str, repo: &str, git_ref: &str) -> ApiResult<GitRef> {
        let state = self.record(GitHubCall::GetRef {
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
        })?;
        let key = ref_key(git_ref);
        state
            .refs
            .get(&(repo.to_string(), key.clone()))
            .map(|sha| GitRef {
                ref_name: format!("refs/{key}"),
                sha: sha.clone(),
            })
            .ok_or_else(|| ApiError::new(404, "Not Found"))
    }

    async fn create_ref(
        &self,
        _owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
    ) -> ApiResult<GitRef> {
        let mut state = self.record(GitHubCall::CreateRef {
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
            sha: sha.to_string(),
        })?;
        let key = (repo.to_string(), ref_key(git_ref));
        if state.refs.contains_key(&key) {
            return Err(ApiError::new(422, "Reference already exists"));
        }
        state.refs.insert(key, sha.to_string());
        Ok(GitRef {
            ref_name: git_ref.to_string(),
            sha: sha.to_string(),
        })
    }

    async fn update_ref(
        &self,
        _owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
        force: bool,
    ) -> ApiResult<GitRef> {
        let mut state = self.record(GitHubCall::UpdateRef {
            repo: repo.to_string(),
            git_ref: git_ref.to_string(),
            sha: sha.to_string(),
            force,
        })?;
        let key = (repo.to_string(), ref_key(git_ref));
        match state.refs.get_mut(&key) {
            Some(current) => {
                *current = sha.to_string();
                Ok(GitRef {
                    ref_name: format!("refs/{}", key.1),
                    sha: sha.to_string(),
                })
            }
            None => Err(ApiError::new(422, "Reference does not exist")),
        }
    }

    async fn get_tree(&self, _owner: &str, repo: &str, tree_sha: &str) -> ApiResult<Tree> {
        self.record(GitHubCall::GetTree {
            repo: repo.to_string(),
            sha: tree_sha.to_string(),
        })?;
        Ok(Tree {
            sha: format!("tree-of-{tree_sha}"),
        })
    }

    async fn create_tree(
        &self,
        _owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> ApiResult<Tree> {
        let mut state = self.record(GitHubCall::CreateTree {
            repo: repo.to_string(),
            base_tree: base_tree.to_string(),
            entries: entries.to_vec(),
        })?;
        Ok(Tree {
            sha: format!("tree-{}", state.next_id()),
        })
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        commit: &NewCommit,
    ) -> ApiResult<CommitInfo> {
        let mut state = self.record(GitHubCall::CreateCommit {
            repo: repo.to_string(),
            commit: commit.clone(),
        })?;
        let sha = format!("commit-{}", state.next_id());
        Ok(CommitInfo {
            html_url: Some(format!("https://github.com/{owner}/{repo}/commit/{sha}")),
            sha,
        })
    }

    async fn list_tags(&self, _owner: &str, repo: &str) -> ApiResult<Vec<Tag>> {
        let state = self.record(GitHubCall::ListTags {
            repo: repo.to_string(),
        })?;
        Ok(state.tags.get(repo).cloned().unwrap_or_default())
    }

    async fn create_tag(&self, _owner: &str, repo: &str, tag: &NewTag) -> ApiResult<TagObject> {
        let mut state = self.record(GitHubCall::CreateTag {
            repo: repo.to_string(),
            tag: tag.clone(),
        })?;
        let sha = format!("tag-{}", state.next_id());
        state.tags.entry(repo.to_string()).or_default().push(Tag {
            name: tag.tag.clone(),
        });
        Ok(TagObject {
            tag: tag.tag.clone(),
            sha,
        })
    }

    async fn compare(
        &self,
        _owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> ApiResult<Comparison> {
        let state = self.record(GitHubCall::Compare {
            repo: repo.to_string(),
            base: base.to_string(),
            head: head.to_string(),
        })?;
        state
            .comparisons
            .get(&(repo.to_string(), base.to_string(), head.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::new(404, "Not Found"))
    }

    async fn merge(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        commit_message: &str,
    ) -> ApiResult<MergeResponse> {
        let mut state = self.record(GitHubCall::Merge {
            repo: repo.to_string(),
            base: base.to_string(),
            head: head.to_string(),
            message: commit_message.to_string(),
        })?;
        if let Some(scripted) = state.merges.get(repo) {
            return scripted.clone();
        }
        let sha = format!("merge-{}", state.next_id());
        Ok(MergeResponse {
            status: 201,
            commit: Some(CommitInfo {
                html_url: Some(format!("https://github.com/{owner}/{repo}/commit/{sha}")),
                sha,
            }),
        })
    }

    async fn create_check_run(
        &self,
        _owner: &str,
        repo: &str,
        state: &CheckRunState,
    ) -> ApiResult<()> {
        self.record(GitHubCall::CreateCheckRun {
            repo: repo.to_string(),
            state: state.clone(),
        })?;
        Ok(())
    }

    async fn get_file(
        &self,
        _owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> ApiResult<Option<RepoFile>> {
        let state = self.record(GitHubCall::GetFile {
            repo: repo.to_string(),
            path: path.to_string(),
            git_ref: git_ref.to_string(),
        })?;
        Ok(state
            .files
            .get(&(repo.to_string(), path.to_string(), git_ref.to_string()))
            .cloned())
    }

    async fn put_file(&self, _owner: &str, repo: &str, update: &FileUpdate) -> ApiResult<()> {
        let mut state = self.record(GitHubCall::PutFile {
            repo: repo.to_string(),
            update: update.clone(),
        })?;
        let key = (repo.to_string(), update.path.clone(), update.branch.clone());
        let current_sha = state.files.get(&key).map(|f| f.sha.clone());
        if current_sha != update.sha {
            return Err(ApiError::new(409, "file sha does not match"));
        }
        let sha = format!("blob-{}", state.next_id());
        state.files.insert(
            key,
            RepoFile {
                content: update.content.clone(),
                sha,
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Slack notifier that records posts; optionally fails after `n` successes.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<ChatMessage>>,
    fail_after: Option<usize>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(successes: usize) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail_after: Some(successes),
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn post(&self, message: &ChatMessage) -> std::result::Result<(), NotifyError> {
        let mut messages = self.messages.lock().unwrap();
        if self.fail_after.is_some_and(|n| messages.len() >= n) {
            return Err(NotifyError::Rejected {
                channel: message.channel.clone(),
                reason: "rate_limited".to_string(),
            });
        }
        messages.push(message.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticChangelog / StaticTagger
// ---------------------------------------------------------------------------

/// Changelog writer that records the manifests it saw and returns a fixed URL.
#[derive(Debug, Default)]
pub struct StaticChangelog {
    updates: Mutex<Vec<(String, Manifest, Manifest)>>,
}

impl StaticChangelog {
    pub fn new() -> Self {
        Self::default()
    }

    /// (branch, previous, current) per update.
    pub fn updates(&self) -> Vec<(String, Manifest, Manifest)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChangelogWriter for StaticChangelog {
    async fn update(
        &self,
        owner: &str,
        branch: &str,
        previous: &Manifest,
        current: &Manifest,
    ) -> Result<String> {
        self.updates.lock().unwrap().push((
            branch.to_string(),
            previous.clone(),
            current.clone(),
        ));
        Ok(format!("https://github.com/{owner}/platform/blob/{branch}/CHANGELOG.md"))
    }
}

/// Tagger that records requests and returns `1.0.<n>-<branch>`.
#[derive(Debug, Default)]
pub struct StaticTagger {
    tags: Mutex<Vec<(String, String, BumpLevel)>>,
}

impl StaticTagger {
    pub fn new() -> Self {
        Self::default()
    }

    /// (branch, sha, level) per request.
    pub fn tags(&self) -> Vec<(String, String, BumpLevel)> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseTagger for StaticTagger {
    async fn create(
        &self,
        _owner: &str,
        branch: &str,
        sha: &str,
        level: BumpLevel,
    ) -> Result<String> {
        let mut tags = self.tags.lock().unwrap();
        tags.push((branch.to_string(), sha.to_string(), level));
        Ok(format!("1.0.{}-{branch}", tags.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_ref_conflicts_with_existing() {
        let github = FakeGitHub::new();
        github.set_branch("web", "beta", "aaa");
        let err = github
            .create_ref("acme", "web", "refs/heads/beta", "bbb")
            .await
            .unwrap_err();
        assert!(err.is_status(422));
        let updated = github
            .update_ref("acme", "web", "heads/beta", "bbb", true)
            .await
            .unwrap();
        assert_eq!(updated.sha, "bbb");
    }

    #[tokio::test]
    async fn test_scripted_failures_are_recorded() {
        let github = FakeGitHub::new();
        github.fail_on_repo("get_ref", "api", ApiError::new(404, "Not Found"));
        github.set_branch("web", "beta", "aaa");
        github.set_branch("api", "beta", "aaa");
        assert!(github.get_ref("acme", "web", "heads/beta").await.is_ok());
        assert!(github.get_ref("acme", "api", "heads/beta").await.is_err());
        assert_eq!(github.calls_to("get_ref").len(), 2);
        assert!(github.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_static_tagger_counts() {
        let tagger = StaticTagger::new();
        let first = tagger
            .create("acme", "release-beta", "abc", BumpLevel::Patch)
            .await
            .unwrap();
        assert_eq!(first, "1.0.1-release-beta");
        assert_eq!(tagger.tags().len(), 1);
    }
}
