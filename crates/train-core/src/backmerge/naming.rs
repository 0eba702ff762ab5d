//! Deterministic names and texts for backmerge commits and conflict PRs.

use chrono::NaiveDate;

use crate::event::refs::short_sha;
use crate::event::PushCommit;

/// Title every conflict-resolution PR starts with.
pub const CONFLICT_TITLE: &str = "Backmerge conflict";

/// `<back>-fix/conflict-<head7>-<back7>`.
///
/// Same inputs always give the same name, so a retried backmerge reuses the
/// branch instead of creating another one.
pub fn conflict_branch_name(back: &str, head_sha: &str, back_sha: &str) -> String {
    format!(
        "{back}-fix/conflict-{}-{}",
        short_sha(head_sha),
        short_sha(back_sha)
    )
}

pub fn resolution_pr_title(date: NaiveDate) -> String {
    format!("{CONFLICT_TITLE} {}", date.format("%Y-%m-%d"))
}

/// `@login` when the head branch has a known author, `Hey` otherwise.
pub fn author_mention(author: Option<&str>) -> String {
    match author {
        Some(login) if !login.is_empty() => format!("@{login}"),
        _ => "Hey".to_string(),
    }
}

pub fn resolution_pr_body(head: &str, back: &str, author: Option<&str>, branch: &str) -> String {
    format!(
        "Unable to automatically merge '{head}' into '{back}' due to merge conflicts.

{mention} please fix conflicts and merge this PR into {back}

# Merge instructions
## Always use MERGE and do not SQUASH nor REBASE :point_down:
```bash
git fetch
git checkout {branch}
git merge origin/{back}
```

**Actually fix the conflict**
```bash
git commit
git push origin HEAD
```

**Do not squash/rebase your commits.**
",
        mention = author_mention(author),
    )
}

/// `Merge <head> fix (<sha7>)` followed by one bullet per pushed commit.
pub fn backmerge_commit_message(head: &str, sha: &str, commits: &[PushCommit]) -> String {
    let mut message = format!("Merge {head} fix ({})\n", short_sha(sha));
    for commit in commits {
        let subject = commit.message.lines().next().unwrap_or_default();
        message.push_str(&format!("\n* {subject} ({})", short_sha(&commit.id)));
    }
    message
}
