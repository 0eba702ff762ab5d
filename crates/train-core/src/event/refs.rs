//! Git ref and SHA helpers.

use crate::error::{Result, TrainError};

const REF_PREFIX: &str = "refs/heads/";

/// Length of an abbreviated commit SHA.
pub const SHORT_SHA_LEN: usize = 7;

/// Branch name of a fully qualified ref: `refs/heads/add/feature` -> `add/feature`.
pub fn branch_from_ref(git_ref: &str) -> Result<&str> {
    git_ref
        .strip_prefix(REF_PREFIX)
        .ok_or_else(|| TrainError::InvalidRef(git_ref.to_string()))
}

/// The first seven characters of a commit SHA.
pub fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

/// `heads/<branch>`, the form the git refs API expects.
pub fn heads_ref(branch: &str) -> String {
    format!("heads/{branch}")
}
