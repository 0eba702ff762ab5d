//! What a backmerge run did, and how that reads in chat.

use serde::Serialize;

use crate::event::refs::short_sha;
use crate::github::CommitInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// 201
    Merged { commit: Option<CommitInfo> },
    /// 204: the back branch already contains head.
    Ignored,
    /// 409
    Conflict,
    /// 404 (missing ref) or any other failed call.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoMerge {
    pub repo: String,
    pub head_sha: String,
    pub back_sha: String,
    pub outcome: MergeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPr {
    pub repo: String,
    pub branch: String,
    pub number: u64,
    pub html_url: String,
    pub author: Option<String>,
}

/// Outcome of one backmerge of `head` into `back`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackmergeReport {
    pub owner: String,
    pub head: String,
    pub back: String,
    pub merges: Vec<RepoMerge>,
    pub conflict_prs: Vec<ConflictPr>,
    /// Conflicts whose resolution branch or PR could not be created.
    pub unresolved: Vec<(String, String)>,
}

impl BackmergeReport {
    fn with_outcome<'a>(
        &'a self,
        pred: impl Fn(&MergeOutcome) -> bool + 'a,
    ) -> impl Iterator<Item = &'a RepoMerge> + 'a {
        self.merges.iter().filter(move |m| pred(&m.outcome))
    }

    pub fn merged(&self) -> Vec<&RepoMerge> {
        self.with_outcome(|o| matches!(o, MergeOutcome::Merged { .. }))
            .collect()
    }

    pub fn ignored(&self) -> Vec<&RepoMerge> {
        self.with_outcome(|o| matches!(o, MergeOutcome::Ignored)).collect()
    }

    pub fn conflicts(&self) -> Vec<&RepoMerge> {
        self.with_outcome(|o| matches!(o, MergeOutcome::Conflict)).collect()
    }

    pub fn failed(&self) -> Vec<&RepoMerge> {
        self.with_outcome(|o| matches!(o, MergeOutcome::Failed { .. }))
            .collect()
    }
}

fn repo_url(owner: &str, repo: &str) -> String {
    format!("https://github.com/{owner}/{repo}")
}

pub fn render_success(report: &BackmergeReport) -> String {
    let mut sections = Vec::new();

    let merged = report.merged();
    if !merged.is_empty() {
        let mut lines = vec!["Successful backmerges :white_check_mark::".to_string()];
        for (i, m) in merged.iter().enumerate() {
            let head = match &m.outcome {
                MergeOutcome::Merged {
                    commit: Some(commit),
                } => match &commit.html_url {
                    Some(url) => format!("<{url}|{}>", short_sha(&commit.sha)),
                    None => format!("`{}`", short_sha(&commit.sha)),
                },
                _ => format!("`{}`", short_sha(&m.head_sha)),
            };
            lines.push(format!("  {}) *{}*: New head: {head}", i + 1, m.repo));
        }
        sections.push(lines.join("\n"));
    }

    if !report.conflict_prs.is_empty() {
        let mut lines = vec!["Conflicted backmerges :triumph::".to_string()];
        for (i, pr) in report.conflict_prs.iter().enumerate() {
            let ping = match &pr.author {
                Some(login) => format!(" Ping *@{login}* to fix it!"),
                None => String::new(),
            };
            lines.push(format!(
                "  {}) *{}*: PR <{}|#{}> created.{ping}",
                i + 1,
                pr.repo,
                pr.html_url,
                pr.number
            ));
        }
        sections.push(lines.join("\n"));
    }

    let failed: Vec<&str> = report
        .failed()
        .into_iter()
        .map(|m| m.repo.as_str())
        .chain(report.unresolved.iter().map(|(repo, _)| repo.as_str()))
        .collect();
    if !failed.is_empty() {
        let mut lines = vec![":scream: Failed backmerges :scream::".to_string()];
        for (i, repo) in failed.iter().enumerate() {
            lines.push(format!(
                "  {}) *<{}|{repo}>*",
                i + 1,
                repo_url(&report.owner, repo)
            ));
        }
        sections.push(lines.join("\n"));
    }

    let ignored = report.ignored();
    if !ignored.is_empty() {
        let repos: Vec<String> = ignored.iter().map(|m| format!("`{}`", m.repo)).collect();
        sections.push(format!("Already up to date: {}", repos.join(", ")));
    }

    format!(
        "Results of backmerging `{}` into `{}`:\n\n{}",
        report.head,
        report.back,
        sections.join("\n\n")
    )
}

pub fn render_failure(repo: &str, head: &str, back: &str, error: &dyn std::fmt::Display) -> String {
    format!(
        "There was an error backmerging on `{repo}` from `{head}` to `{back}`.\n\
         Please contact the team managing the release train.\n\n\
         *Error:*\n```{error}```"
    )
}
