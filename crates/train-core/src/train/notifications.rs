//! Chat text for train departures and refusals.

use serde::Serialize;

use crate::event::refs::short_sha;
use crate::github::PullRequest;

/// What a successful train update did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainDeparture {
    pub owner: String,
    pub head: String,
    pub base: String,
    /// (repo, new head) per advanced repository.
    pub advanced: Vec<(String, String)>,
    pub up_to_date: Vec<String>,
    pub release_pr: Option<PullRequest>,
    pub manifest_url: String,
    pub changelog_url: Option<String>,
    pub tag: Option<String>,
}

pub fn render_departure(departure: &TrainDeparture) -> String {
    let changes = match &departure.release_pr {
        Some(pr) => format!("<{}/files|here>", pr.html_url),
        None => format!("<{}|here>", departure.manifest_url),
    };
    let mut lines = vec![
        format!(
            "*TRAIN FOR `{}` HAS DEPARTED :steam_locomotive:*",
            departure.base.to_uppercase()
        ),
        format!("You can check the new changes that went with it {changes}"),
    ];
    if let Some(url) = &departure.changelog_url {
        lines.push(format!("Check the full changelog <{url}|here>"));
    }
    if let Some(tag) = &departure.tag {
        lines.push(format!("Tagged as `{tag}`"));
    }
    if !departure.advanced.is_empty() {
        let moved: Vec<String> = departure
            .advanced
            .iter()
            .map(|(repo, sha)| format!("`{repo}` → `{}`", short_sha(sha)))
            .collect();
        lines.push(format!("Advanced: {}", moved.join(", ")));
    }
    lines.push(String::new());
    lines.push(
        "This notification only means that all the codebases are updated correctly.".to_string(),
    );
    lines.join("\n")
}

pub fn render_blocked(
    owner: &str,
    manager: &str,
    head: &str,
    base: &str,
    repos: &[&str],
) -> String {
    let repos: Vec<String> = repos.iter().map(|r| format!("`{r}`")).collect();
    format!(
        "Error updating train from `{head}` to `{base}`\n\n\
         Installation: *{owner}*\n\
         Method: `{manager}`\n\n\
         Here is the error for debugging purposes:\n\n\
         The `{base}` branch in these repos can't be fast-forwarded to `{head}`'s HEAD: {}",
        repos.join(",")
    )
}

pub fn render_failure(head: &str, base: &str, error: &dyn std::fmt::Display) -> String {
    format!(
        "There was an error moving the train from `{head}` to `{base}`.\n\
         Please contact the team managing the release train.\n\n\
         *Error:*\n```{error}```"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn departure(release_pr: Option<PullRequest>) -> TrainDeparture {
        TrainDeparture {
            owner: "acme".to_string(),
            head: "beta".to_string(),
            base: "release-beta".to_string(),
            advanced: vec![("web".to_string(), "abcdef0123".to_string())],
            up_to_date: vec!["api".to_string()],
            release_pr,
            manifest_url: "https://github.com/acme/platform/blob/release-beta/manifest.json"
                .to_string(),
            changelog_url: Some("https://github.com/acme/platform/blob/x/CHANGELOG.md".into()),
            tag: Some("1.0.1-release-beta".to_string()),
        }
    }

    #[test]
    fn test_departure_links_release_pr_files() {
        let pr = PullRequest {
            number: 4,
            title: "Release to stable".to_string(),
            html_url: "https://github.com/acme/platform/pull/4".to_string(),
            head_sha: "x".to_string(),
            user_login: None,
        };
        let text = render_departure(&departure(Some(pr)));
        assert!(text.starts_with("*TRAIN FOR `RELEASE-BETA` HAS DEPARTED"));
        assert!(text.contains("<https://github.com/acme/platform/pull/4/files|here>"));
        assert!(text.contains("`web` → `abcdef0`"));
        assert!(text.contains("Tagged as `1.0.1-release-beta`"));
    }

    #[test]
    fn test_departure_links_manifest_without_pr() {
        let text = render_departure(&departure(None));
        assert!(text.contains("blob/release-beta/manifest.json|here>"));
    }

    #[test]
    fn test_blocked_names_every_repo() {
        let text = render_blocked("acme", "trainManager", "beta", "stable", &["api", "docs"]);
        assert!(text.contains("Installation: *acme*"));
        assert!(text.contains("Method: `trainManager`"));
        assert!(text.ends_with("fast-forwarded to `beta`'s HEAD: `api`,`docs`"));
    }
}
