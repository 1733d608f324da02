use serde::{Deserialize, Serialize};

/// Watermark of a source that has never been synced.
pub const ZERO_COMMIT: &str = "0000000000000000000000000000000000000000";

/// One tracked source repository, keyed by its `organization/repository` alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    pub branch: String,
    #[serde(default = "zero_commit")]
    pub commit: String,
}

impl SourceInfo {
    pub fn unsynced(url: impl Into<String>, branch: &str) -> Self {
        Self {
            url: url.into(),
            branch: branch_reference(branch),
            commit: zero_commit(),
        }
    }

    pub fn is_synced(&self) -> bool {
        !is_zero_commit(&self.commit)
    }
}

pub(crate) fn is_zero_commit(commit: &str) -> bool {
    commit.is_empty() || commit.chars().all(|ch| ch == '0')
}

/// Expands a short branch name to `refs/heads/<branch>`; full refs pass through.
pub fn branch_reference(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

fn zero_commit() -> String {
    ZERO_COMMIT.to_string()
}
