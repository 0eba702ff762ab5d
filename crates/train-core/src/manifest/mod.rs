//! The platform manifest: repo name -> commit SHA.
//!
//! The manifest is always written whole. Callers build the new mapping
//! locally (from comparisons or from the current file plus overrides) and
//! commit it to the platform repository in one tree/commit/ref update.

pub mod changelog;
pub mod tag;
pub mod update;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainError};
use crate::event::refs::heads_ref;
use crate::github::{CommitInfo, Comparison, GitHubApi, NewCommit, TreeEntry};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest(BTreeMap<String, String>);

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per comparison, using [`sha_from_comparison`].
    pub fn from_comparisons<'a, I>(comparisons: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Comparison)>,
    {
        Self(
            comparisons
                .into_iter()
                .filter_map(|(repo, c)| {
                    sha_from_comparison(c).map(|sha| (repo.to_string(), sha.to_string()))
                })
                .collect(),
        )
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| {
            TrainError::Manifest(format!("manifest is not a repo -> sha object: {e}"))
        })
    }

    /// Pretty JSON with a trailing newline, the on-disk format.
    pub fn render(&self) -> Result<String> {
        Ok(format!("{}\n", serde_json::to_string_pretty(&self.0)?))
    }

    pub fn get(&self, repo: &str) -> Option<&str> {
        self.0.get(repo).map(String::as_str)
    }

    pub fn insert(&mut self, repo: impl Into<String>, sha: impl Into<String>) -> Option<String> {
        self.0.insert(repo.into(), sha.into())
    }

    /// Supersede entries with `overrides`.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (repo, sha) in overrides {
            self.insert(repo, sha);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries whose SHA differs from `previous` (or that are new), with the old SHA.
    pub fn changes_since<'a>(
        &'a self,
        previous: &'a Manifest,
    ) -> Vec<(&'a str, Option<&'a str>, &'a str)> {
        self.iter()
            .filter_map(|(repo, sha)| match previous.get(repo) {
                Some(old) if old == sha => None,
                old => Some((repo, old, sha)),
            })
            .collect()
    }
}

/// SHA a repository sits at after a comparison: the last compared commit,
/// else the merge base, else the base commit.
pub fn sha_from_comparison(comparison: &Comparison) -> Option<&str> {
    comparison
        .commits
        .last()
        .or(comparison.merge_base_commit.as_ref())
        .or(comparison.base_commit.as_ref())
        .map(|c| c.sha.as_str())
}

/// Read the manifest at `branch`; a missing file is an empty manifest.
pub async fn read_manifest(
    github: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    path: &str,
    branch: &str,
) -> Result<Manifest> {
    match github.get_file(owner, repo, path, branch).await? {
        Some(file) => Manifest::parse(&file.content),
        None => Ok(Manifest::new()),
    }
}

/// Commit one file to the tip of `branch` and move the branch to the new commit.
pub async fn commit_file(
    github: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    branch: &str,
    entry: TreeEntry,
    message: &str,
) -> Result<CommitInfo> {
    let head = heads_ref(branch);
    let tip = github.get_ref(owner, repo, &head).await?;
    let tree = github.get_tree(owner, repo, &tip.sha).await?;
    let updated = github.create_tree(owner, repo, &tree.sha, &[entry]).await?;
    let commit = github
        .create_commit(
            owner,
            repo,
            &NewCommit {
                message: message.to_string(),
                tree: updated.sha,
                parents: vec![tip.sha],
            },
        )
        .await?;
    github
        .update_ref(owner, repo, &head, &commit.sha, false)
        .await?;
    Ok(commit)
}

pub async fn commit_manifest(
    github: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    path: &str,
    branch: &str,
    manifest: &Manifest,
) -> Result<CommitInfo> {
    let entry = TreeEntry::file(path, manifest.render()?);
    commit_file(github, owner, repo, branch, entry, "Update manifest").await
}

/// `https://github.com/<owner>/<repo>/blob/<branch>/<path>`.
pub fn file_url(owner: &str, repo: &str, branch: &str, path: &str) -> String {
    format!("https://github.com/{owner}/{repo}/blob/{branch}/{path}")
}
