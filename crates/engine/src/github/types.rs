// Typed views over the provider REST payloads the engine consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One blob in the repository tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub size: u64,
}

/// An open issue, kept as a lightweight summary for analysis prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueSummary {
    pub number: i64,
    pub title: String,
}

/// A merged pull request as listed by the sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrSummary {
    pub number: i64,
    pub title: String,
    pub merged_at: DateTime<Utc>,
}

/// One changed file within a pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrFile {
    pub filename: String,
    pub additions: i64,
    pub deletions: i64,
    /// Unified diff hunk; large files come back without one.
    pub patch: Option<String>,
}

/// A review left on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewSummary {
    pub author: String,
    pub state: String,
    pub body: String,
}

/// The full pull-request payload the change processor analyses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrData {
    pub number: i64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub merged_at: Option<DateTime<Utc>>,
    pub base_ref: String,
    pub files_changed: Vec<PrFile>,
    pub comments: Vec<String>,
    pub reviews: Vec<ReviewSummary>,
}

/// A commit as listed on a branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

/// One file touched by a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitFile {
    pub filename: String,
    pub additions: i64,
    pub deletions: i64,
}

/// Aggregate line stats of a commit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitStats {
    pub additions: i64,
    pub deletions: i64,
    pub total: i64,
}

/// A single commit with its file list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitData {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub files: Vec<CommitFile>,
    pub stats: CommitStats,
}

/// A repository the authenticated user can see.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoSummary {
    pub full_name: String,
    pub private: bool,
    pub default_branch: String,
    pub description: Option<String>,
}

/// Everything the materialiser gathers about a repository before asking the
/// oracle. Every field is best-effort; an empty value means the gather call
/// failed or the repository simply has none.
#[derive(Debug, Clone, Default)]
pub struct RepoSignals {
    pub file_tree: Vec<TreeEntry>,
    pub readme: Option<String>,
    pub package_manifests: BTreeMap<String, String>,
    pub languages: BTreeMap<String, u64>,
    pub open_issues: Vec<IssueSummary>,
}
