//! GitHub REST client.
//!
//! Every non-2xx response becomes an [`ApiError`] carrying the status and the
//! `message` field GitHub puts in error bodies, which is what the engines
//! branch on.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use train_core::config::GitHubConfig;
use train_core::github::*;
use train_core::ApiError;

use crate::error::{ClientError, Result};
use crate::USER_AGENT;

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: u32 = 100;

pub struct GitHubClient {
    http: Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or(ClientError::MissingCredential("github.token"))?;
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(&self.token)
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status, body = %body, "github request failed");
        Err(ApiError::new(status, error_message(&body)))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    match err.status() {
        Some(status) => ApiError::new(status.as_u16(), err.to_string()),
        None => ApiError::transport(err.to_string()),
    }
}

/// The `message` of a GitHub error body, or the raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.message)
        .unwrap_or_else(|_| body.to_string())
}

/// File contents come back base64 encoded with embedded newlines.
fn decode_content(encoded: &str) -> ApiResult<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|err| ApiError::transport(format!("invalid file encoding: {err}")))?;
    String::from_utf8(bytes).map_err(|err| ApiError::transport(format!("file is not utf-8: {err}")))
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RepositoriesPage {
    repositories: Vec<InstalledRepo>,
}

#[derive(Deserialize)]
struct SearchPage {
    items: Vec<IssueSummary>,
}

#[derive(Deserialize)]
struct WireUser {
    login: String,
}

#[derive(Deserialize)]
struct WireBranch {
    sha: String,
}

#[derive(Deserialize)]
struct WirePullRequest {
    number: u64,
    title: String,
    html_url: String,
    head: WireBranch,
    #[serde(default)]
    user: Option<WireUser>,
}

impl From<WirePullRequest> for PullRequest {
    fn from(pr: WirePullRequest) -> Self {
        PullRequest {
            number: pr.number,
            title: pr.title,
            html_url: pr.html_url,
            head_sha: pr.head.sha,
            user_login: pr.user.map(|u| u.login),
        }
    }
}

#[derive(Deserialize)]
struct WireObject {
    sha: String,
}

#[derive(Deserialize)]
struct WireRef {
    #[serde(rename = "ref")]
    ref_name: String,
    object: WireObject,
}

impl From<WireRef> for GitRef {
    fn from(r: WireRef) -> Self {
        GitRef {
            ref_name: r.ref_name,
            sha: r.object.sha,
        }
    }
}

#[derive(Serialize)]
struct WireTreeEntry<'a> {
    path: &'a str,
    mode: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireContent {
    content: String,
    sha: String,
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn list_installation_repos(&self) -> ApiResult<Vec<InstalledRepo>> {
        let page: RepositoriesPage = self
            .json(
                self.request(Method::GET, "/installation/repositories")
                    .query(&[("per_page", PER_PAGE)]),
            )
            .await?;
        Ok(page.repositories)
    }

    async fn search_issues(&self, query: &str) -> ApiResult<Vec<IssueSummary>> {
        let page: SearchPage = self
            .json(self.request(Method::GET, "/search/issues").query(&[("q", query)]))
            .await?;
        Ok(page.items)
    }

    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> ApiResult<PullRequest> {
        let pr: WirePullRequest = self
            .json(self.request(Method::GET, &format!("/repos/{owner}/{repo}/pulls/{number}")))
            .await?;
        Ok(pr.into())
    }

    async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        head: &str,
        state: PullRequestState,
    ) -> ApiResult<Vec<PullRequest>> {
        let prs: Vec<WirePullRequest> = self
            .json(
                self.request(Method::GET, &format!("/repos/{owner}/{repo}/pulls"))
                    .query(&[("head", head), ("state", state.as_str())]),
            )
            .await?;
        Ok(prs.into_iter().map(PullRequest::from).collect())
    }

    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        pr: &NewPullRequest,
    ) -> ApiResult<PullRequest> {
        let created: WirePullRequest = self
            .json(
                self.request(Method::POST, &format!("/repos/{owner}/{repo}/pulls"))
                    .json(pr),
            )
            .await?;
        Ok(created.into())
    }

    async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> ApiResult<()> {
        self.send(
            self.request(
                Method::POST,
                &format!("/repos/{owner}/{repo}/issues/{number}/labels"),
            )
            .json(&json!({ "labels": labels })),
        )
        .await?;
        Ok(())
    }

    async fn get_ref(&self, owner: &str, repo: &str, git_ref: &str) -> ApiResult<GitRef> {
        let found: WireRef = self
            .json(self.request(Method::GET, &format!("/repos/{owner}/{repo}/git/ref/{git_ref}")))
            .await?;
        Ok(found.into())
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
    ) -> ApiResult<GitRef> {
        let created: WireRef = self
            .json(
                self.request(Method::POST, &format!("/repos/{owner}/{repo}/git/refs"))
                    .json(&json!({ "ref": git_ref, "sha": sha })),
            )
            .await?;
        Ok(created.into())
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        sha: &str,
        force: bool,
    ) -> ApiResult<GitRef> {
        let updated: WireRef = self
            .json(
                self.request(
                    Method::PATCH,
                    &format!("/repos/{owner}/{repo}/git/refs/{git_ref}"),
                )
                .json(&json!({ "sha": sha, "force": force })),
            )
            .await?;
        Ok(updated.into())
    }

    async fn get_tree(&self, owner: &str, repo: &str, tree_sha: &str) -> ApiResult<Tree> {
        self.json(self.request(
            Method::GET,
            &format!("/repos/{owner}/{repo}/git/trees/{tree_sha}"),
        ))
        .await
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: &str,
        entries: &[TreeEntry],
    ) -> ApiResult<Tree> {
        let tree: Vec<WireTreeEntry<'_>> = entries
            .iter()
            .map(|e| WireTreeEntry {
                path: &e.path,
                mode: &e.mode,
                kind: "blob",
                content: &e.content,
            })
            .collect();
        self.json(
            self.request(Method::POST, &format!("/repos/{owner}/{repo}/git/trees"))
                .json(&json!({ "base_tree": base_tree, "tree": tree })),
        )
        .await
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        commit: &NewCommit,
    ) -> ApiResult<CommitInfo> {
        self.json(
            self.request(Method::POST, &format!("/repos/{owner}/{repo}/git/commits"))
                .json(commit),
        )
        .await
    }

    async fn list_tags(&self, owner: &str, repo: &str) -> ApiResult<Vec<Tag>> {
        self.json(
            self.request(Method::GET, &format!("/repos/{owner}/{repo}/tags"))
                .query(&[("per_page", PER_PAGE)]),
        )
        .await
    }

    async fn create_tag(&self, owner: &str, repo: &str, tag: &NewTag) -> ApiResult<TagObject> {
        self.json(
            self.request(Method::POST, &format!("/repos/{owner}/{repo}/git/tags"))
                .json(&json!({
                    "tag": tag.tag,
                    "message": tag.message,
                    "object": tag.object,
                    "type": "commit",
                })),
        )
        .await
    }

    async fn compare(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> ApiResult<Comparison> {
        self.json(self.request(
            Method::GET,
            &format!("/repos/{owner}/{repo}/compare/{base}...{head}"),
        ))
        .await
    }

    async fn merge(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
        commit_message: &str,
    ) -> ApiResult<MergeResponse> {
        let response = self
            .send(
                self.request(Method::POST, &format!("/repos/{owner}/{repo}/merges"))
                    .json(&json!({
                        "base": base,
                        "head": head,
                        "commit_message": commit_message,
                    })),
            )
            .await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(MergeResponse {
                status: status.as_u16(),
                commit: None,
            });
        }
        let commit: CommitInfo = response.json().await.map_err(transport_error)?;
        Ok(MergeResponse {
            status: status.as_u16(),
            commit: Some(commit),
        })
    }

    async fn create_check_run(
        &self,
        owner: &str,
        repo: &str,
        state: &CheckRunState,
    ) -> ApiResult<()> {
        self.send(
            self.request(Method::POST, &format!("/repos/{owner}/{repo}/check-runs"))
                .json(state),
        )
        .await?;
        Ok(())
    }

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> ApiResult<Option<RepoFile>> {
        let found = self
            .json::<WireContent>(
                self.request(Method::GET, &format!("/repos/{owner}/{repo}/contents/{path}"))
                    .query(&[("ref", git_ref)]),
            )
            .await;
        match found {
            Ok(file) => Ok(Some(RepoFile {
                content: decode_content(&file.content)?,
                sha: file.sha,
            })),
            Err(err) if err.is_status(404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put_file(&self, owner: &str, repo: &str, update: &FileUpdate) -> ApiResult<()> {
        let mut body = json!({
            "message": update.message,
            "content": STANDARD.encode(update.content.as_bytes()),
            "branch": update.branch,
        });
        if let Some(sha) = &update.sha {
            body["sha"] = json!(sha);
        }
        self.send(
            self.request(
                Method::PUT,
                &format!("/repos/{owner}/{repo}/contents/{}", update.path),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }
}
