//! Strongly-typed GitHub webhook payloads.
//!
//! Only the fields the managers rely on are modelled; everything else in the
//! delivery is ignored. A payload that lacks a required field does not parse,
//! which is how the classifier decides the payload is not of that shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Owner,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestBase {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDetails {
    #[serde(default)]
    pub number: Option<u64>,
    pub head: PullRequestHead,
    pub base: PullRequestBase,
    pub merged: bool,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// `pull_request` webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequestDetails,
    pub repository: Repository,
    pub installation: Installation,
}

impl PullRequestEvent {
    pub fn base(&self) -> &str {
        &self.pull_request.base.ref_name
    }

    pub fn head(&self) -> &str {
        &self.pull_request.head.ref_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// `push` webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_name: String,
    #[serde(default)]
    pub after: Option<String>,
    pub commits: Vec<PushCommit>,
    /// Kept opaque; only its presence matters.
    pub head_commit: serde_json::Map<String, serde_json::Value>,
    pub repository: Repository,
    pub sender: Sender,
    pub installation: Installation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunPullRequest {
    pub base: PullRequestBase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunDetails {
    #[serde(default)]
    pub head_sha: Option<String>,
    pub pull_requests: Vec<CheckRunPullRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAction {
    pub identifier: String,
}

/// `check_run` webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunEvent {
    pub action: String,
    pub check_run: CheckRunDetails,
    pub repository: Repository,
    #[serde(default)]
    pub requested_action: Option<RequestedAction>,
    pub installation: Installation,
}
