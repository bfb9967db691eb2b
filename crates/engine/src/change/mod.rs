// Targeted workspace mutations for merged PRs and direct-commit batches.
//
// The always-recorded `doc_history` entry is the anchor of the PR path: a
// transport failure there fails the whole unit so the cursor cannot advance
// past it. Promotion mutations (release notes, ADRs, tasks, section edits)
// are independent best-effort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use engram_common::analysis::{ChangeAnalysis, ImpactLevel};
use engram_common::types::{ConnectionRecord, SyncHistoryEntry, SyncType};
use serde_json::json;
use tracing::{info, warn};

use crate::github::types::CommitSummary;
use crate::github::{GithubClient, GithubError};
use crate::materialise::collections::confidence_percent;
use crate::oracle::Oracle;
use crate::store::ConnectionStore;
use crate::workspace::blocks::BlockUpdate;
use crate::workspace::{WorkspaceClient, WorkspaceError};

/// Commits examined per batch; the newest one's files go to the oracle.
pub const COMMIT_BATCH_LIMIT: usize = 10;

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ChangeError {
    Github(GithubError),
    Workspace(WorkspaceError),
}

impl ChangeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Github(error) => error.is_retryable(),
            Self::Workspace(error) => error.is_retryable(),
        }
    }
}

impl std::fmt::Display for ChangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Github(error) => write!(f, "change processing provider failure: {error}"),
            Self::Workspace(error) => write!(f, "change processing workspace failure: {error}"),
        }
    }
}

impl std::error::Error for ChangeError {}

impl From<GithubError> for ChangeError {
    fn from(error: GithubError) -> Self {
        Self::Github(error)
    }
}

impl From<WorkspaceError> for ChangeError {
    fn from(error: WorkspaceError) -> Self {
        Self::Workspace(error)
    }
}

// ── Outcomes ───────────────────────────────────────────────────────

/// What one processed PR produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrOutcome {
    pub number: i64,
    pub title: String,
    pub release_note: bool,
    pub adr: bool,
    pub tasks_added: usize,
    /// The oracle was unavailable; only a low-confidence history entry was
    /// recorded.
    pub degraded: bool,
}

/// What one processed commit batch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub significant: bool,
    pub shas: Vec<String>,
    pub summary: String,
}

// ── Version / id helpers ───────────────────────────────────────────

/// Release-notes version string for a promoted change.
pub fn compute_version(impact: ImpactLevel, at: DateTime<Utc>) -> String {
    match impact {
        ImpactLevel::Major => format!("v{}.0", at.format("%Y.%m")),
        ImpactLevel::Minor => format!("v{}", at.format("%Y.%m.%d")),
        ImpactLevel::Patch => format!("v{}-patch", at.format("%Y.%m.%d")),
    }
}

/// Auto-generated ADR identifier: the last four digits of the current
/// epoch milliseconds.
pub fn adr_id(at: DateTime<Utc>) -> String {
    format!("ADR-{:04}", at.timestamp_millis().rem_euclid(10_000))
}

// ── Processor ──────────────────────────────────────────────────────

pub struct ChangeProcessor {
    store: ConnectionStore,
    oracle: Arc<dyn Oracle>,
    github_api_url: String,
}

impl ChangeProcessor {
    pub fn new(store: ConnectionStore, oracle: Arc<dyn Oracle>, github_api_url: String) -> Self {
        Self { store, oracle, github_api_url }
    }

    /// Process one merged pull request end to end.
    pub async fn on_pull_request(
        &self,
        record: &ConnectionRecord,
        pr_number: i64,
    ) -> Result<PrOutcome, ChangeError> {
        let github = GithubClient::with_api_url(record.credential.clone(), &self.github_api_url);
        let workspace = WorkspaceClient::new(&record.workspace_endpoint);
        let owner = record.repo_key.owner();
        let name = record.repo_key.name();

        let pr = github.get_pr(owner, name, pr_number).await?;
        let now = Utc::now();

        let analysis = match self.oracle.analyse_pr(pr.clone()).await {
            Ok(analysis) => Some(analysis),
            Err(error) => {
                warn!(repo_key = %record.repo_key, pr_number, %error, "PR classification unavailable");
                None
            }
        };

        // The history entry is always recorded; its failure fails the unit.
        let (description, confidence) = match &analysis {
            Some(analysis) => (analysis.summary.clone(), analysis.confidence),
            None => ("Automated classification was unavailable for this change.".to_string(), 0.0),
        };
        self.append_history_item(
            &workspace,
            record,
            json!({
                "event": format!("PR #{} Merged: {}", pr.number, pr.title),
                "date": now.format("%Y-%m-%d").to_string(),
                "description": description,
                "pr_number": pr.number,
                "confidence": confidence_percent(confidence),
            }),
        )
        .await?;

        let Some(analysis) = analysis else {
            self.record_pr_history(record, pr_number, "unknown", &description, false, now);
            return Ok(PrOutcome {
                number: pr.number,
                title: pr.title,
                release_note: false,
                adr: false,
                tasks_added: 0,
                degraded: true,
            });
        };

        let release_note = analysis.release_note_worthy();
        if release_note {
            self.insert_release_note(&workspace, record, &pr.title, pr.number, &analysis, now)
                .await;
        }

        let adr = analysis.adr_worthy();
        if adr {
            self.insert_adr(&workspace, record, pr.number, &analysis, now).await;
        }

        let mut tasks_added = 0;
        if analysis.tasks_worthy() {
            tasks_added =
                self.insert_follow_up_tasks(&workspace, record, pr.number, &analysis, now).await;
        }

        self.apply_main_document_updates(&workspace, record, pr.number, &analysis, now).await;

        self.record_pr_history(
            record,
            pr_number,
            analysis.change_type.as_str(),
            &analysis.summary,
            true,
            now,
        );

        info!(
            repo_key = %record.repo_key,
            pr_number,
            change_type = analysis.change_type.as_str(),
            impact = analysis.impact_level.as_str(),
            release_note,
            adr,
            tasks_added,
            "pull request processed"
        );

        Ok(PrOutcome { number: pr.number, title: pr.title, release_note, adr, tasks_added, degraded: false })
    }

    /// Process a batch of direct-branch commits. Significance is the sole
    /// gate: an insignificant batch records nothing.
    pub async fn on_commits(
        &self,
        record: &ConnectionRecord,
        commits: Vec<CommitSummary>,
    ) -> Result<CommitOutcome, ChangeError> {
        if commits.is_empty() {
            return Ok(CommitOutcome { significant: false, shas: Vec::new(), summary: String::new() });
        }

        let github = GithubClient::with_api_url(record.credential.clone(), &self.github_api_url);
        let workspace = WorkspaceClient::new(&record.workspace_endpoint);
        let owner = record.repo_key.owner();
        let name = record.repo_key.name();

        let batch: Vec<CommitSummary> = commits.into_iter().take(COMMIT_BATCH_LIMIT).collect();
        let newest = batch.iter().max_by_key(|commit| commit.date).cloned();
        let newest_files = match &newest {
            Some(newest) => github.get_commit(owner, name, &newest.sha).await?.files,
            None => Vec::new(),
        };

        let significance = match self.oracle.analyse_commits(batch.clone(), newest_files).await {
            Ok(significance) => significance,
            Err(error) => {
                // Significance cannot be determined, so nothing is recorded;
                // the commits are not significant until proven otherwise.
                warn!(repo_key = %record.repo_key, %error, "commit significance unavailable");
                return Ok(CommitOutcome {
                    significant: false,
                    shas: Vec::new(),
                    summary: String::new(),
                });
            }
        };

        if !significance.is_significant {
            return Ok(CommitOutcome { significant: false, shas: Vec::new(), summary: String::new() });
        }

        let now = Utc::now();
        let shas: Vec<String> = batch.iter().map(|commit| commit.sha.clone()).collect();

        self.append_history_item(
            &workspace,
            record,
            json!({
                "event": format!("{} direct commit(s) to {}", batch.len(), record.repo_key.name()),
                "date": now.format("%Y-%m-%d").to_string(),
                "description": significance.summary,
                "pr_number": 0,
                "confidence": confidence_percent(significance.confidence),
            }),
        )
        .await?;

        if significance.impact_level == ImpactLevel::Major {
            if let Some(collection_id) = &record.collection_ids.release_notes {
                let item = json!({
                    "title": format!("Direct changes ({})", now.format("%Y-%m-%d")),
                    "version": compute_version(significance.impact_level, now),
                    "date": now.format("%Y-%m-%d").to_string(),
                    "summary": significance.summary,
                    "pr_number": 0,
                    "changes": shas.join(", "),
                });
                self.best_effort_insert(&workspace, collection_id, vec![item], "release note").await;
            }
        }

        if !significance.suggested_tasks.is_empty() {
            if let Some(collection_id) = &record.collection_ids.engineering_tasks {
                let items = significance
                    .suggested_tasks
                    .iter()
                    .map(|task| {
                        json!({
                            "task": task,
                            "priority": "Medium",
                            "category": "From commits",
                            "reasoning": significance.summary,
                            "status": "Open",
                            "created_at": now.format("%Y-%m-%d").to_string(),
                        })
                    })
                    .collect();
                self.best_effort_insert(&workspace, collection_id, items, "suggested tasks").await;
            }
        }

        if let Some(document_id) = &record.document_id {
            let block = format!(
                "### Direct commits ({})\n\n{}\n\nCommits: {}",
                now.format("%Y-%m-%d"),
                significance.summary,
                shas.iter()
                    .map(|sha| sha.chars().take(8).collect::<String>())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            if let Err(error) =
                workspace.update_main_document(document_id, &BlockUpdate::append(block)).await
            {
                warn!(repo_key = %record.repo_key, %error, "commit block append failed");
            }
        }

        for commit in &batch {
            self.store.record_history(&SyncHistoryEntry {
                repo_key: record.repo_key.clone(),
                pr_number: None,
                commit_sha: Some(commit.sha.clone()),
                sync_type: SyncType::Commit,
                is_significant: true,
                change_type: significance.change_type.as_str().to_string(),
                summary: significance.summary.clone(),
                synced_at: now,
            });
        }

        info!(
            repo_key = %record.repo_key,
            commits = batch.len(),
            impact = significance.impact_level.as_str(),
            "significant commit batch processed"
        );

        Ok(CommitOutcome { significant: true, shas, summary: significance.summary })
    }

    // ── Mutation helpers ───────────────────────────────────────────

    async fn append_history_item(
        &self,
        workspace: &WorkspaceClient,
        record: &ConnectionRecord,
        item: serde_json::Value,
    ) -> Result<(), ChangeError> {
        let Some(collection_id) = &record.collection_ids.doc_history else {
            warn!(repo_key = %record.repo_key, "no doc_history collection id, skipping history item");
            return Ok(());
        };
        workspace.collection_items_add(collection_id, vec![item]).await?;
        Ok(())
    }

    async fn best_effort_insert(
        &self,
        workspace: &WorkspaceClient,
        collection_id: &str,
        items: Vec<serde_json::Value>,
        what: &str,
    ) {
        if let Err(error) = workspace.collection_items_add(collection_id, items).await {
            warn!(collection_id, %error, "{what} insertion failed, continuing");
        }
    }

    async fn insert_release_note(
        &self,
        workspace: &WorkspaceClient,
        record: &ConnectionRecord,
        title: &str,
        pr_number: i64,
        analysis: &ChangeAnalysis,
        now: DateTime<Utc>,
    ) {
        let Some(collection_id) = &record.collection_ids.release_notes else {
            warn!(repo_key = %record.repo_key, "no release_notes collection id, skipping");
            return;
        };
        let changes = if analysis.affected_modules.is_empty() {
            analysis.summary.clone()
        } else {
            analysis.affected_modules.join(", ")
        };
        let item = json!({
            "title": title,
            "version": compute_version(analysis.impact_level, now),
            "date": now.format("%Y-%m-%d").to_string(),
            "summary": analysis.summary,
            "pr_number": pr_number,
            "changes": changes,
        });
        self.best_effort_insert(workspace, collection_id, vec![item], "release note").await;
    }

    async fn insert_adr(
        &self,
        workspace: &WorkspaceClient,
        record: &ConnectionRecord,
        pr_number: i64,
        analysis: &ChangeAnalysis,
        now: DateTime<Utc>,
    ) {
        let Some(collection_id) = &record.collection_ids.adrs else {
            warn!(repo_key = %record.repo_key, "no adrs collection id, skipping");
            return;
        };
        let decision = analysis
            .architecture_changes
            .clone()
            .unwrap_or_else(|| analysis.summary.clone());
        let item = json!({
            "title": format!("Decision from PR #{pr_number}"),
            "adr_id": adr_id(now),
            "status": "Proposed",
            "date": now.format("%Y-%m-%d").to_string(),
            "context": analysis.summary,
            "decision": decision,
            "consequences": if analysis.breaking_changes {
                "Breaking change; dependent clients must migrate."
            } else {
                "No breaking consequences identified."
            },
            "confidence": analysis.confidence,
        });
        self.best_effort_insert(workspace, collection_id, vec![item], "ADR").await;
    }

    async fn insert_follow_up_tasks(
        &self,
        workspace: &WorkspaceClient,
        record: &ConnectionRecord,
        pr_number: i64,
        analysis: &ChangeAnalysis,
        now: DateTime<Utc>,
    ) -> usize {
        let Some(collection_id) = &record.collection_ids.engineering_tasks else {
            warn!(repo_key = %record.repo_key, "no engineering_tasks collection id, skipping");
            return 0;
        };
        let items: Vec<serde_json::Value> = analysis
            .follow_up_tasks
            .iter()
            .map(|task| {
                json!({
                    "task": task,
                    "priority": "Medium",
                    "category": format!("From PR#{pr_number}"),
                    "reasoning": analysis.summary,
                    "status": "Open",
                    "created_at": now.format("%Y-%m-%d").to_string(),
                })
            })
            .collect();
        let count = items.len();
        self.best_effort_insert(workspace, collection_id, items, "follow-up tasks").await;
        count
    }

    /// The always-applied section mutations of the main document.
    async fn apply_main_document_updates(
        &self,
        workspace: &WorkspaceClient,
        record: &ConnectionRecord,
        pr_number: i64,
        analysis: &ChangeAnalysis,
        now: DateTime<Utc>,
    ) {
        let Some(document_id) = &record.document_id else {
            warn!(repo_key = %record.repo_key, "no document id, skipping main-document updates");
            return;
        };

        if !analysis.new_technologies.is_empty() {
            let content = format!(
                "## Tech Stack\n\nRecently adopted: {}\n",
                analysis.new_technologies.join(", ")
            );
            let update = BlockUpdate::upsert_section("Tech Stack", content);
            if let Err(error) = workspace.update_main_document(document_id, &update).await {
                warn!(repo_key = %record.repo_key, %error, "tech stack upsert failed");
            }
        }

        if let Some(changes) = &analysis.architecture_changes {
            let markdown = format!("## Architecture\n\n{changes}\n");
            if let Err(error) =
                workspace.regenerate_section(document_id, "Architecture", &markdown).await
            {
                warn!(repo_key = %record.repo_key, %error, "architecture regeneration failed");
            }
        }

        if analysis.public_api_changes {
            let block = format!("### API Changes (PR #{pr_number})\n\n{}", analysis.summary);
            if let Err(error) =
                workspace.update_main_document(document_id, &BlockUpdate::append(block)).await
            {
                warn!(repo_key = %record.repo_key, %error, "api-changes append failed");
            }
        }

        if analysis.breaking_changes {
            let block = format!("### Breaking Changes (PR #{pr_number})\n\n{}", analysis.summary);
            if let Err(error) =
                workspace.update_main_document(document_id, &BlockUpdate::append(block)).await
            {
                warn!(repo_key = %record.repo_key, %error, "breaking-changes append failed");
            }
        }

        let log_line =
            format!("> Updated from PR #{pr_number} on {}", now.format("%Y-%m-%d"));
        if let Err(error) =
            workspace.update_main_document(document_id, &BlockUpdate::append(log_line)).await
        {
            warn!(repo_key = %record.repo_key, %error, "update-log append failed");
        }
    }

    fn record_pr_history(
        &self,
        record: &ConnectionRecord,
        pr_number: i64,
        change_type: &str,
        summary: &str,
        is_significant: bool,
        now: DateTime<Utc>,
    ) {
        self.store.record_history(&SyncHistoryEntry {
            repo_key: record.repo_key.clone(),
            pr_number: Some(pr_number),
            commit_sha: None,
            sync_type: SyncType::Pr,
            is_significant,
            change_type: change_type.to_string(),
            summary: summary.to_string(),
            synced_at: now,
        });
    }
}
