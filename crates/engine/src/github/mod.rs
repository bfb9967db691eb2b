// Typed wrapper over the version-control provider's REST API.
//
// A client is built per connection per cycle so the credential is always
// current. Every operation maps transport faults to `GithubError::Transport`
// with a retryable flag: 5xx and 429 are retryable, other 4xx surface
// immediately.

pub mod types;

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use engram_common::types::{Credential, OwnerUser};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use types::{
    CommitData, CommitFile, CommitStats, CommitSummary, IssueSummary, PrData, PrFile, PrSummary,
    RepoSummary, ReviewSummary, TreeEntry,
};

const DEFAULT_API_URL: &str = "https://api.github.com";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "engram-sync-engine";

/// Manifest paths probed by `get_package_manifests`, keyed by ecosystem.
const MANIFEST_PROBES: &[(&str, &str)] = &[
    ("rust", "Cargo.toml"),
    ("node", "package.json"),
    ("python", "pyproject.toml"),
    ("go", "go.mod"),
    ("java", "pom.xml"),
    ("ruby", "Gemfile"),
];

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GithubError {
    /// The requested resource (ref, PR, commit) does not exist.
    NotFound { resource: String },
    /// Network fault or non-success status.
    Transport { status: Option<u16>, retryable: bool, message: String },
    /// The payload arrived but could not be decoded.
    Decode { message: String },
}

impl GithubError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }

    fn from_status(status: u16, resource: &str) -> Self {
        if status == 404 {
            return Self::NotFound { resource: resource.to_string() };
        }
        Self::Transport {
            status: Some(status),
            retryable: status == 429 || status >= 500,
            message: format!("provider returned status {status} for {resource}"),
        }
    }
}

impl std::fmt::Display for GithubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { resource } => write!(f, "provider resource not found: {resource}"),
            Self::Transport { status, retryable, message } => {
                write!(f, "provider transport error (status {status:?}, retryable {retryable}): {message}")
            }
            Self::Decode { message } => write!(f, "provider payload decode error: {message}"),
        }
    }
}

impl std::error::Error for GithubError {}

// ── Client ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: Credential,
}

impl GithubClient {
    pub fn new(token: Credential) -> Self {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    /// Point the client at a different base URL (tests use a local mock).
    pub fn with_api_url(token: Credential, api_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http, api_url: api_url.into().trim_end_matches('/').to_string(), token }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, GithubError> {
        let url = format!("{}{path}", self.api_url);
        let response = self
            .http
            .get(&url)
            .header("authorization", format!("Bearer {}", self.token.expose()))
            .header("accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|error| GithubError::Transport {
                status: None,
                retryable: true,
                message: format!("request to {path} failed: {error}"),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(GithubError::from_status(status, path));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| GithubError::Decode { message: format!("{path}: {error}") })
    }

    // ── Repository signals ─────────────────────────────────────────

    /// All blobs reachable from `branch`, with paths and sizes.
    pub async fn list_tree(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
    ) -> Result<Vec<TreeEntry>, GithubError> {
        #[derive(Deserialize)]
        struct TreeResponse {
            #[serde(default)]
            tree: Vec<RawEntry>,
        }
        #[derive(Deserialize)]
        struct RawEntry {
            path: String,
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            size: u64,
        }

        let response: TreeResponse = self
            .get_json(&format!("/repos/{owner}/{name}/git/trees/{branch}?recursive=1"))
            .await?;
        Ok(response
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| TreeEntry { path: entry.path, size: entry.size })
            .collect())
    }

    /// The repository README as text, or `None` when the repository has
    /// none. A README that exists but fails to decode is a fatal error.
    pub async fn get_readme(&self, owner: &str, name: &str) -> Result<Option<String>, GithubError> {
        #[derive(Deserialize)]
        struct ReadmeResponse {
            content: String,
            #[serde(default)]
            encoding: String,
        }

        let response: ReadmeResponse = match self
            .get_json(&format!("/repos/{owner}/{name}/readme"))
            .await
        {
            Ok(response) => response,
            Err(GithubError::NotFound { .. }) => return Ok(None),
            Err(error) => return Err(error),
        };

        if response.encoding != "base64" {
            return Ok(Some(response.content));
        }
        let raw = response.content.replace(['\n', '\r'], "");
        let bytes = base64::engine::general_purpose::STANDARD.decode(raw).map_err(|error| {
            GithubError::Decode { message: format!("readme base64: {error}") }
        })?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|error| GithubError::Decode { message: format!("readme utf-8: {error}") })
    }

    /// Known manifest files by ecosystem; absent entries are omitted and
    /// individual probe failures are ignored.
    pub async fn get_package_manifests(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, GithubError> {
        #[derive(Deserialize)]
        struct ContentsResponse {
            content: String,
            #[serde(default)]
            encoding: String,
        }

        let mut manifests = BTreeMap::new();
        for (ecosystem, path) in MANIFEST_PROBES {
            let response: ContentsResponse = match self
                .get_json(&format!("/repos/{owner}/{name}/contents/{path}"))
                .await
            {
                Ok(response) => response,
                Err(_) => continue,
            };
            let text = if response.encoding == "base64" {
                let raw = response.content.replace(['\n', '\r'], "");
                match base64::engine::general_purpose::STANDARD.decode(raw) {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Err(_) => continue,
                }
            } else {
                response.content
            };
            manifests.insert((*ecosystem).to_string(), text);
        }
        Ok(manifests)
    }

    /// Byte counts per language.
    pub async fn get_languages(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<BTreeMap<String, u64>, GithubError> {
        self.get_json(&format!("/repos/{owner}/{name}/languages")).await
    }

    /// Open issues, excluding pull requests.
    pub async fn get_open_issues(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Vec<IssueSummary>, GithubError> {
        #[derive(Deserialize)]
        struct RawIssue {
            number: i64,
            title: String,
            #[serde(default)]
            pull_request: Option<Value>,
        }

        let issues: Vec<RawIssue> = self
            .get_json(&format!("/repos/{owner}/{name}/issues?state=open&per_page=50"))
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(|issue| IssueSummary { number: issue.number, title: issue.title })
            .collect())
    }

    // ── Pull requests ──────────────────────────────────────────────

    /// Merged PRs with numbers strictly greater than `since_number`, sorted
    /// ascending by number.
    pub async fn list_merged_prs_since(
        &self,
        owner: &str,
        name: &str,
        since_number: i64,
    ) -> Result<Vec<PrSummary>, GithubError> {
        #[derive(Deserialize)]
        struct RawPr {
            number: i64,
            title: String,
            merged_at: Option<DateTime<Utc>>,
        }

        let prs: Vec<RawPr> = self
            .get_json(&format!(
                "/repos/{owner}/{name}/pulls?state=closed&sort=updated&direction=desc&per_page=100"
            ))
            .await?;

        let mut merged: Vec<PrSummary> = prs
            .into_iter()
            .filter_map(|pr| {
                let merged_at = pr.merged_at?;
                (pr.number > since_number)
                    .then(|| PrSummary { number: pr.number, title: pr.title, merged_at })
            })
            .collect();
        merged.sort_by_key(|pr| pr.number);
        Ok(merged)
    }

    /// Full PR payload: metadata, changed files, discussion, reviews.
    pub async fn get_pr(
        &self,
        owner: &str,
        name: &str,
        number: i64,
    ) -> Result<PrData, GithubError> {
        #[derive(Deserialize)]
        struct RawPr {
            number: i64,
            title: String,
            #[serde(default)]
            body: Option<String>,
            user: RawUser,
            merged_at: Option<DateTime<Utc>>,
            base: RawBase,
        }
        #[derive(Deserialize)]
        struct RawUser {
            login: String,
        }
        #[derive(Deserialize)]
        struct RawBase {
            #[serde(rename = "ref")]
            base_ref: String,
        }
        #[derive(Deserialize)]
        struct RawFile {
            filename: String,
            #[serde(default)]
            additions: i64,
            #[serde(default)]
            deletions: i64,
            #[serde(default)]
            patch: Option<String>,
        }
        #[derive(Deserialize)]
        struct RawComment {
            #[serde(default)]
            body: String,
        }
        #[derive(Deserialize)]
        struct RawReview {
            user: Option<RawUser>,
            #[serde(default)]
            state: String,
            #[serde(default)]
            body: String,
        }

        let pr: RawPr = self.get_json(&format!("/repos/{owner}/{name}/pulls/{number}")).await?;
        let files: Vec<RawFile> =
            self.get_json(&format!("/repos/{owner}/{name}/pulls/{number}/files")).await?;
        let comments: Vec<RawComment> =
            self.get_json(&format!("/repos/{owner}/{name}/issues/{number}/comments")).await?;
        let reviews: Vec<RawReview> =
            self.get_json(&format!("/repos/{owner}/{name}/pulls/{number}/reviews")).await?;

        Ok(PrData {
            number: pr.number,
            title: pr.title,
            body: pr.body.unwrap_or_default(),
            author: pr.user.login,
            merged_at: pr.merged_at,
            base_ref: pr.base.base_ref,
            files_changed: files
                .into_iter()
                .map(|file| PrFile {
                    filename: file.filename,
                    additions: file.additions,
                    deletions: file.deletions,
                    patch: file.patch,
                })
                .collect(),
            comments: comments.into_iter().map(|comment| comment.body).collect(),
            reviews: reviews
                .into_iter()
                .map(|review| ReviewSummary {
                    author: review.user.map(|user| user.login).unwrap_or_default(),
                    state: review.state,
                    body: review.body,
                })
                .collect(),
        })
    }

    // ── Commits ────────────────────────────────────────────────────

    /// A single commit with files and stats.
    pub async fn get_commit(
        &self,
        owner: &str,
        name: &str,
        sha: &str,
    ) -> Result<CommitData, GithubError> {
        #[derive(Deserialize)]
        struct RawCommit {
            sha: String,
            commit: RawCommitInner,
            #[serde(default)]
            files: Vec<RawFile>,
            #[serde(default)]
            stats: RawStats,
        }
        #[derive(Deserialize)]
        struct RawCommitInner {
            message: String,
            author: RawAuthor,
        }
        #[derive(Deserialize)]
        struct RawAuthor {
            #[serde(default)]
            name: String,
        }
        #[derive(Deserialize)]
        struct RawFile {
            filename: String,
            #[serde(default)]
            additions: i64,
            #[serde(default)]
            deletions: i64,
        }
        #[derive(Deserialize, Default)]
        struct RawStats {
            #[serde(default)]
            additions: i64,
            #[serde(default)]
            deletions: i64,
            #[serde(default)]
            total: i64,
        }

        let raw: RawCommit = self.get_json(&format!("/repos/{owner}/{name}/commits/{sha}")).await?;
        Ok(CommitData {
            sha: raw.sha,
            message: raw.commit.message,
            author: raw.commit.author.name,
            files: raw
                .files
                .into_iter()
                .map(|file| CommitFile {
                    filename: file.filename,
                    additions: file.additions,
                    deletions: file.deletions,
                })
                .collect(),
            stats: CommitStats {
                additions: raw.stats.additions,
                deletions: raw.stats.deletions,
                total: raw.stats.total,
            },
        })
    }

    /// Commits on `branch`, newest first, optionally bounded below by
    /// `since`.
    pub async fn list_commits(
        &self,
        owner: &str,
        name: &str,
        branch: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitSummary>, GithubError> {
        #[derive(Deserialize)]
        struct RawCommit {
            sha: String,
            commit: RawCommitInner,
        }
        #[derive(Deserialize)]
        struct RawCommitInner {
            message: String,
            author: RawAuthor,
        }
        #[derive(Deserialize)]
        struct RawAuthor {
            #[serde(default)]
            name: String,
            date: DateTime<Utc>,
        }

        let mut path = format!("/repos/{owner}/{name}/commits?sha={branch}&per_page=50");
        if let Some(since) = since {
            path.push_str(&format!("&since={}", since.to_rfc3339()));
        }

        let commits: Vec<RawCommit> = self.get_json(&path).await?;
        Ok(commits
            .into_iter()
            .map(|raw| CommitSummary {
                sha: raw.sha,
                message: raw.commit.message,
                author: raw.commit.author.name.clone(),
                date: raw.commit.author.date,
            })
            .collect())
    }

    // ── User surface ───────────────────────────────────────────────

    /// The user the credential authenticates as. A revoked token comes
    /// back as a non-retryable 401 transport error.
    pub async fn get_authenticated_user(&self) -> Result<OwnerUser, GithubError> {
        #[derive(Deserialize)]
        struct RawUser {
            id: i64,
            login: String,
            #[serde(default)]
            name: Option<String>,
            #[serde(default)]
            email: Option<String>,
        }

        let user: RawUser = self.get_json("/user").await?;
        let display_name = user.name.unwrap_or_else(|| user.login.clone());
        Ok(OwnerUser { id: user.id, login: user.login, display_name, email: user.email })
    }

    /// Repositories visible to the authenticated user, most recently
    /// updated first.
    pub async fn list_repositories(&self) -> Result<Vec<RepoSummary>, GithubError> {
        #[derive(Deserialize)]
        struct RawRepo {
            full_name: String,
            #[serde(default)]
            private: bool,
            #[serde(default)]
            default_branch: String,
            #[serde(default)]
            description: Option<String>,
        }

        let repos: Vec<RawRepo> =
            self.get_json("/user/repos?sort=updated&per_page=100").await?;
        Ok(repos
            .into_iter()
            .map(|repo| RepoSummary {
                full_name: repo.full_name,
                private: repo.private,
                default_branch: if repo.default_branch.is_empty() {
                    "main".to_string()
                } else {
                    repo.default_branch
                },
                description: repo.description,
            })
            .collect())
    }
}
