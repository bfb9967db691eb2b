// Language-model oracle: repository analysis, PR classification, commit
// significance.
//
// Production calls the Anthropic Messages API; tests inject a mock through
// the `Oracle` trait. Every reply is treated as untrusted: extracted,
// repaired, parsed into a defaulted record, and confidence-clamped.

pub mod prompts;
pub mod repair;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use engram_common::analysis::{
    ChangeAnalysis, CommitSignificance, EngineeringTask, RepoAnalysis, TaskPriority,
};
use engram_common::types::RepoKey;
use serde::{Deserialize, Serialize};

use crate::config::OracleSettings;
use crate::github::types::{CommitFile, CommitSummary, PrData, RepoSignals};

pub const DEFAULT_ORACLE_MODEL: &str = "claude-sonnet-4-5-20250929";
const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// No API key configured or analysis disabled.
    NotConfigured,
    /// Network fault or non-success status from the provider.
    Transport { status: Option<u16>, retryable: bool, message: String },
    /// The reply carried no usable text.
    EmptyReply,
    /// Extraction/repair produced nothing parseable. Recoverable: callers
    /// substitute a degraded record.
    Parse { message: String },
}

impl OracleError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "oracle is not configured"),
            Self::Transport { status, retryable, message } => {
                write!(f, "oracle transport error (status {status:?}, retryable {retryable}): {message}")
            }
            Self::EmptyReply => write!(f, "oracle returned an empty reply"),
            Self::Parse { message } => write!(f, "oracle reply unparseable: {message}"),
        }
    }
}

impl std::error::Error for OracleError {}

// ── Trait ──────────────────────────────────────────────────────────

type OracleFuture<T> = Pin<Box<dyn Future<Output = Result<T, OracleError>> + Send>>;

/// The analysis seam. Production uses `AnthropicOracle`; tests inject mocks
/// returning canned records.
pub trait Oracle: Send + Sync {
    fn analyse_repository(&self, repo_key: RepoKey, signals: RepoSignals)
        -> OracleFuture<RepoAnalysis>;

    fn analyse_pr(&self, pr: PrData) -> OracleFuture<ChangeAnalysis>;

    fn analyse_commits(
        &self,
        commits: Vec<CommitSummary>,
        newest_files: Vec<CommitFile>,
    ) -> OracleFuture<CommitSignificance>;
}

// ── Degraded records ───────────────────────────────────────────────

/// The low-confidence skeleton used when repository analysis fails.
/// Materialisation proceeds with it so the document always exists.
pub fn degraded_repo_analysis(repo_key: &RepoKey) -> RepoAnalysis {
    let mut analysis = RepoAnalysis::default();
    analysis.overview.project_name = repo_key.name().to_string();
    analysis.overview.description =
        format!("Automated analysis of {repo_key} was unavailable; this document was seeded from repository metadata only.");
    analysis.architecture.pattern = "Unknown".to_string();
    analysis.open_questions =
        vec!["Automated analysis failed; review this document manually.".to_string()];
    analysis.engineering_tasks = vec![EngineeringTask {
        task: "Review the generated Engineering Brain and fill in missing sections".to_string(),
        priority: TaskPriority::Medium,
        category: "Documentation".to_string(),
        reasoning: "Initial automated analysis was degraded".to_string(),
    }];
    analysis.confidence = 0.3;
    analysis
}

// ── Anthropic implementation ───────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnthropicOracle {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: usize,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicOracle {
    pub fn from_settings(settings: &OracleSettings) -> Self {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build().unwrap_or_default();
        Self {
            http,
            api_url: settings
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: settings.resolve_api_key(),
            model: settings.model.clone().unwrap_or_else(|| DEFAULT_ORACLE_MODEL.to_string()),
            max_tokens: settings.max_tokens,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, system: &str, user_prompt: String) -> Result<String, OracleError> {
        let api_key = self.api_key.clone().ok_or(OracleError::NotConfigured)?;

        let request = MessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system.to_string(),
            messages: vec![Message { role: "user", content: user_prompt }],
        };

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|error| OracleError::Transport {
                status: None,
                retryable: true,
                message: format!("oracle request failed: {error}"),
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transport {
                status: Some(status),
                retryable: status == 429 || status >= 500,
                message: format!("oracle returned status {status}: {}", body.trim()),
            });
        }

        let payload: MessageResponse = response.json().await.map_err(|error| {
            OracleError::Parse { message: format!("oracle payload undecodable: {error}") }
        })?;

        for block in payload.content {
            if block.kind == "text" {
                if let Some(text) = block.text {
                    if !text.trim().is_empty() {
                        return Ok(text);
                    }
                }
            }
        }

        Err(OracleError::EmptyReply)
    }
}

impl Oracle for AnthropicOracle {
    fn analyse_repository(
        &self,
        repo_key: RepoKey,
        signals: RepoSignals,
    ) -> OracleFuture<RepoAnalysis> {
        let client = self.clone();
        Box::pin(async move {
            let prompt = prompts::build_repo_prompt(&repo_key, &signals);
            let reply = client.complete(prompts::REPO_SYSTEM_PROMPT, prompt).await?;
            let mut analysis: RepoAnalysis = repair::parse_object(&reply)
                .map_err(|error| OracleError::Parse { message: error.detail })?;
            analysis.normalise();
            Ok(analysis)
        })
    }

    fn analyse_pr(&self, pr: PrData) -> OracleFuture<ChangeAnalysis> {
        let client = self.clone();
        Box::pin(async move {
            let prompt = prompts::build_pr_prompt(&pr);
            let reply = client.complete(prompts::PR_SYSTEM_PROMPT, prompt).await?;
            let mut analysis: ChangeAnalysis = repair::parse_object(&reply)
                .map_err(|error| OracleError::Parse { message: error.detail })?;
            analysis.normalise();
            Ok(analysis)
        })
    }

    fn analyse_commits(
        &self,
        commits: Vec<CommitSummary>,
        newest_files: Vec<CommitFile>,
    ) -> OracleFuture<CommitSignificance> {
        let client = self.clone();
        Box::pin(async move {
            let prompt = prompts::build_commits_prompt(&commits, &newest_files);
            let reply = client.complete(prompts::COMMIT_SYSTEM_PROMPT, prompt).await?;
            let mut significance: CommitSignificance = repair::parse_object(&reply)
                .map_err(|error| OracleError::Parse { message: error.detail })?;
            significance.normalise();
            Ok(significance)
        })
    }
}
