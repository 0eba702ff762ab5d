//! Fast-forward classification of per-repo branch comparisons.

use serde::Serialize;

use crate::github::Comparison;

/// Exactly one of these holds for any comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    /// `behind_by == 0 && ahead_by == 0`
    UpToDate,
    /// `behind_by == 0 && ahead_by > 0`
    FastForward,
    /// `behind_by != 0`
    RequiresMergeCommit,
}

impl ComparisonKind {
    pub fn of(comparison: &Comparison) -> Self {
        if requires_merge_commit(comparison) {
            ComparisonKind::RequiresMergeCommit
        } else if comparison.ahead_by == 0 {
            ComparisonKind::UpToDate
        } else {
            ComparisonKind::FastForward
        }
    }
}

pub fn requires_merge_commit(comparison: &Comparison) -> bool {
    comparison.behind_by != 0
}

pub fn is_up_to_date(comparison: &Comparison) -> bool {
    !requires_merge_commit(comparison) && comparison.ahead_by == 0
}

pub fn is_fast_forward(comparison: &Comparison) -> bool {
    !requires_merge_commit(comparison) && comparison.ahead_by > 0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoComparison {
    pub repo: String,
    pub comparison: Comparison,
}

impl RepoComparison {
    pub fn new(repo: impl Into<String>, comparison: Comparison) -> Self {
        Self {
            repo: repo.into(),
            comparison,
        }
    }

    pub fn kind(&self) -> ComparisonKind {
        ComparisonKind::of(&self.comparison)
    }

    /// Commit the base branch moves to: the last compared commit.
    pub fn new_head(&self) -> Option<&str> {
        self.comparison.commits.last().map(|c| c.sha.as_str())
    }
}

/// Comparisons split by what the train has to do with them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainPlan {
    pub up_to_date: Vec<RepoComparison>,
    pub fast_forward: Vec<RepoComparison>,
    pub blocked: Vec<RepoComparison>,
}

impl TrainPlan {
    pub fn partition(comparisons: impl IntoIterator<Item = RepoComparison>) -> Self {
        let mut plan = Self::default();
        for c in comparisons {
            match c.kind() {
                ComparisonKind::UpToDate => plan.up_to_date.push(c),
                ComparisonKind::FastForward => plan.fast_forward.push(c),
                ComparisonKind::RequiresMergeCommit => plan.blocked.push(c),
            }
        }
        plan
    }

    /// The train may only move when no repo needs a merge commit.
    pub fn can_depart(&self) -> bool {
        self.blocked.is_empty()
    }

    pub fn blocked_repos(&self) -> Vec<&str> {
        self.blocked.iter().map(|c| c.repo.as_str()).collect()
    }
}
