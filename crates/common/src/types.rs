// Core domain types shared across all Engram crates.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository key: `"{owner}/{name}"`.
///
/// Case-preserving for display and storage, case-insensitive for comparison
/// and hashing (GitHub treats `Octocat/Hello` and `octocat/hello` as the
/// same repository).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoKey(String);

impl RepoKey {
    /// Build a key from owner and repository name.
    pub fn new(owner: &str, name: &str) -> Self {
        Self(format!("{owner}/{name}"))
    }

    /// Parse an `"{owner}/{name}"` string. Returns `None` unless the value
    /// has exactly one `/` separating two non-empty segments.
    pub fn parse(value: &str) -> Option<Self> {
        let (owner, name) = value.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self(value.to_string()))
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(owner, _)| owner).unwrap_or(&self.0)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, name)| name).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for comparison, hashing and store lookups.
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }

    /// Canonical title of the root workspace document: `"{owner}-{name}-docs"`.
    pub fn document_title(&self) -> String {
        format!("{}-{}-docs", self.owner(), self.name())
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for RepoKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for RepoKey {}

impl Hash for RepoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

/// An opaque provider token. The `Debug` impl redacts the value so records
/// holding one can be logged safely.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for request authorization headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([redacted])")
    }
}

/// The provider user who created a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerUser {
    pub id: i64,
    pub login: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl Default for OwnerUser {
    fn default() -> Self {
        Self { id: 0, login: String::new(), display_name: String::new(), email: None }
    }
}

/// Identifiers of the four collections inside the Engineering Brain
/// document. All four are set once materialisation completes (a record with
/// a non-null `document_id` always carries a complete set); individual
/// entries may be missing on partially materialised records.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CollectionIds {
    pub release_notes: Option<String>,
    pub adrs: Option<String>,
    pub engineering_tasks: Option<String>,
    pub doc_history: Option<String>,
}

impl CollectionIds {
    pub fn is_complete(&self) -> bool {
        self.release_notes.is_some()
            && self.adrs.is_some()
            && self.engineering_tasks.is_some()
            && self.doc_history.is_some()
    }
}

/// One connected repository and its sync cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    pub repo_key: RepoKey,
    pub credential: Credential,
    pub workspace_endpoint: String,
    pub document_id: Option<String>,
    pub document_title: String,
    pub collection_ids: CollectionIds,
    pub owner_user: OwnerUser,
    pub connected_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Highest merged-PR number already reflected in the workspace.
    pub last_processed_pr: Option<i64>,
    pub auto_sync_enabled: bool,
    /// Last oracle-reported confidence, in [0, 1].
    pub confidence: f64,
}

impl ConnectionRecord {
    /// A fresh, un-materialised record for a repository.
    pub fn new(
        repo_key: RepoKey,
        credential: Credential,
        workspace_endpoint: impl Into<String>,
        owner_user: OwnerUser,
        now: DateTime<Utc>,
    ) -> Self {
        let document_title = repo_key.document_title();
        Self {
            repo_key,
            credential,
            workspace_endpoint: workspace_endpoint.into(),
            document_id: None,
            document_title,
            collection_ids: CollectionIds::default(),
            owner_user,
            connected_at: now,
            last_updated_at: now,
            last_synced_at: None,
            last_processed_pr: None,
            auto_sync_enabled: true,
            confidence: 0.0,
        }
    }

    /// Whether materialisation has completed for this record.
    pub fn is_materialised(&self) -> bool {
        self.document_id.is_some()
    }
}

/// Kind of sync activity recorded in the history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Pr,
    Commit,
    Manual,
}

impl SyncType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pr => "pr",
            Self::Commit => "commit",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pr" => Some(Self::Pr),
            "commit" => Some(Self::Commit),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One row of the optional sync history log.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncHistoryEntry {
    pub repo_key: RepoKey,
    pub pr_number: Option<i64>,
    pub commit_sha: Option<String>,
    pub sync_type: SyncType,
    pub is_significant: bool,
    pub change_type: String,
    pub summary: String,
    pub synced_at: DateTime<Utc>,
}
