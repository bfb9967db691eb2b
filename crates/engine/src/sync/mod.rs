// The sync scheduler: one long-running loop driving per-connection cycles.
//
// Cycle shape per connection: reconcile with the remote workspace → PR
// sweep (ascending) → commit sweep → cursor advance. Per-connection work is
// serialised by the store's per-key lock; across connections a small
// semaphore-bounded worker pool runs cycles in parallel. Cancellation is
// observed between PRs and between commit batches, never mid-mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use engram_common::types::RepoKey;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::change::{ChangeProcessor, PrOutcome};
use crate::config::SyncSettings;
use crate::github::GithubClient;
use crate::oracle::Oracle;
use crate::store::{ConnectionStore, CursorUpdate};
use crate::workspace::WorkspaceClient;

/// Commit messages with this prefix are merge commits and are excluded
/// from the direct-commit sweep.
const MERGE_COMMIT_PREFIX: &str = "Merge ";

// ── Reports ────────────────────────────────────────────────────────

/// How one connection's cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Everything swept; both cursor fields advanced.
    Completed,
    /// A unit failed mid-sweep; `last_processed_pr` advanced to the last
    /// success, `last_synced_at` untouched.
    Partial,
    /// The connection ran too recently and was skipped.
    SkippedMinInterval,
    /// The remote document is gone; the record was deleted.
    Reconciled,
    /// Shutdown arrived mid-cycle.
    Cancelled,
    /// The cycle could not run at all (probe failure, missing record).
    Failed(String),
}

/// What one connection's cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub repo_key: String,
    pub outcome: CycleOutcome,
    pub prs: Vec<PrOutcome>,
    pub commits: Vec<String>,
}

impl CycleReport {
    fn new(repo_key: &RepoKey, outcome: CycleOutcome) -> Self {
        Self { repo_key: repo_key.to_string(), outcome, prs: Vec::new(), commits: Vec::new() }
    }
}

/// Snapshot served by the sync-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_running: bool,
    pub connected_repos: usize,
    pub sync_interval_secs: u64,
    /// repoKey → epoch milliseconds of the last cycle start.
    pub last_sync_times: HashMap<String, i64>,
}

#[derive(Debug)]
pub enum TriggerError {
    NotConnected { repo_key: String },
}

impl std::fmt::Display for TriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected { repo_key } => write!(f, "{repo_key} is not connected"),
        }
    }
}

impl std::error::Error for TriggerError {}

// ── Engine ─────────────────────────────────────────────────────────

struct EngineInner {
    store: ConnectionStore,
    change: ChangeProcessor,
    settings: SyncSettings,
    github_api_url: String,
    semaphore: Arc<Semaphore>,
    last_cycle_start: StdMutex<HashMap<String, DateTime<Utc>>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

/// The scheduler. Cheap to clone; the HTTP surface holds one for manual
/// triggers and status while the background loop drives periodic cycles.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// Handle for the background loop. Dropping it requests shutdown.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Request shutdown and wait for in-flight cycles to reach a safe
    /// point.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl SyncEngine {
    pub fn new(
        store: ConnectionStore,
        oracle: Arc<dyn Oracle>,
        settings: SyncSettings,
        github_api_url: String,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let workers = settings.workers.max(1);
        Self {
            inner: Arc::new(EngineInner {
                change: ChangeProcessor::new(store.clone(), oracle, github_api_url.clone()),
                store,
                settings,
                github_api_url,
                semaphore: Arc::new(Semaphore::new(workers)),
                last_cycle_start: StdMutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    /// Spawn the periodic loop: one cycle immediately, then every period.
    pub fn start(&self) -> SchedulerHandle {
        let engine = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.inner.settings.cycle_interval_sec.max(1));

        let task = tokio::spawn(async move {
            engine.inner.running.store(true, Ordering::SeqCst);
            info!(period_secs = period.as_secs(), "sync scheduler started");
            loop {
                engine.run_cycle().await;
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown_rx.changed() => {
                        debug!("sync scheduler shutting down");
                        break;
                    }
                }
            }
            engine.inner.running.store(false, Ordering::SeqCst);
        });

        SchedulerHandle { shutdown_tx: self.inner.shutdown_tx.clone(), task: Some(task) }
    }

    /// One pass over every auto-sync-enabled connection, in parallel up to
    /// the worker-pool bound. A failing connection never affects another.
    pub async fn run_cycle(&self) -> Vec<CycleReport> {
        let records = self.inner.store.all();
        let mut handles = Vec::new();

        for record in records {
            if !record.auto_sync_enabled {
                continue;
            }
            let engine = self.clone();
            let repo_key = record.repo_key.clone();
            handles.push(tokio::spawn(async move {
                let _permit = engine
                    .inner
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore is never closed");
                engine.sync_connection(&repo_key, false).await
            }));
        }

        let mut reports = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(join_error) => warn!(?join_error, "connection cycle task panicked"),
            }
        }
        reports
    }

    /// Force a cycle for one connection, out of schedule. Queued behind any
    /// in-flight cycle for the same key; the min-interval does not apply.
    pub async fn trigger_one(&self, repo_key: &RepoKey) -> Result<CycleReport, TriggerError> {
        if self.inner.store.get(repo_key).is_none() {
            return Err(TriggerError::NotConnected { repo_key: repo_key.to_string() });
        }
        Ok(self.sync_connection(repo_key, true).await)
    }

    pub fn status(&self) -> SyncStatus {
        let last_sync_times = self
            .inner
            .last_cycle_start
            .lock()
            .expect("scheduler last-cycle map poisoned")
            .iter()
            .map(|(key, at)| (key.clone(), at.timestamp_millis()))
            .collect();
        SyncStatus {
            is_running: self.inner.running.load(Ordering::SeqCst),
            connected_repos: self.inner.store.len(),
            sync_interval_secs: self.inner.settings.cycle_interval_sec,
            last_sync_times,
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.subscribe().borrow()
    }

    // ── One connection's cycle ─────────────────────────────────────

    async fn sync_connection(&self, repo_key: &RepoKey, force: bool) -> CycleReport {
        // Invariant: no two cycles run concurrently for the same key.
        let lock = self.inner.store.lock_for(repo_key);
        let _guard = lock.lock().await;

        let now = Utc::now();
        if !force {
            let min_interval =
                chrono::Duration::seconds(self.inner.settings.min_connection_interval_sec as i64);
            let last_start = self
                .inner
                .last_cycle_start
                .lock()
                .expect("scheduler last-cycle map poisoned")
                .get(&repo_key.normalized())
                .copied();
            if let Some(last_start) = last_start {
                if now - last_start < min_interval {
                    debug!(repo_key = %repo_key, "cycle skipped by min interval");
                    return CycleReport::new(repo_key, CycleOutcome::SkippedMinInterval);
                }
            }
        }
        self.inner
            .last_cycle_start
            .lock()
            .expect("scheduler last-cycle map poisoned")
            .insert(repo_key.normalized(), now);

        let Some(record) = self.inner.store.get(repo_key) else {
            return CycleReport::new(
                repo_key,
                CycleOutcome::Failed("connection record disappeared".to_string()),
            );
        };

        // Remote reconciliation runs first and alone: if the document is
        // gone the record goes too, and nothing else happens this cycle.
        let workspace = WorkspaceClient::new(&record.workspace_endpoint);
        match workspace.document_exists(&record.document_title).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(repo_key = %repo_key, title = %record.document_title, "remote document gone, removing connection");
                if let Err(store_error) = self.inner.store.delete(repo_key) {
                    error!(repo_key = %repo_key, %store_error, "reconciliation delete failed");
                }
                return CycleReport::new(repo_key, CycleOutcome::Reconciled);
            }
            Err(probe_error) => {
                warn!(repo_key = %repo_key, %probe_error, "existence probe failed, skipping cycle");
                return CycleReport::new(repo_key, CycleOutcome::Failed(probe_error.to_string()));
            }
        }

        let mut report = CycleReport::new(repo_key, CycleOutcome::Completed);
        let mut incomplete = false;
        let mut cancelled = false;

        let github =
            GithubClient::with_api_url(record.credential.clone(), &self.inner.github_api_url);
        let owner = record.repo_key.owner().to_string();
        let name = record.repo_key.name().to_string();

        // PR sweep, strictly ascending by number.
        let since = record.last_processed_pr.unwrap_or(0);
        let mut highest_processed: Option<i64> = None;
        match github.list_merged_prs_since(&owner, &name, since).await {
            Ok(prs) => {
                for pr in prs {
                    if self.is_shutting_down() {
                        cancelled = true;
                        break;
                    }
                    match self.inner.change.on_pull_request(&record, pr.number).await {
                        Ok(outcome) => {
                            highest_processed = Some(pr.number);
                            report.prs.push(outcome);
                        }
                        Err(change_error) => {
                            warn!(repo_key = %repo_key, pr_number = pr.number, %change_error, "PR processing failed, stopping sweep");
                            incomplete = true;
                            break;
                        }
                    }
                }
            }
            Err(list_error) => {
                warn!(repo_key = %repo_key, %list_error, "PR listing failed");
                incomplete = true;
            }
        }

        // Commit sweep. The very first cycle records a baseline instead of
        // replaying history.
        match record.last_synced_at {
            None => {
                debug!(repo_key = %repo_key, "first sweep, commit history skipped");
            }
            Some(last_synced_at) if !cancelled => {
                if self.is_shutting_down() {
                    cancelled = true;
                } else {
                    match github.list_commits(&owner, &name, "main", Some(last_synced_at)).await {
                        Ok(commits) => {
                            let mut direct: Vec<_> = commits
                                .into_iter()
                                .filter(|commit| !commit.message.starts_with(MERGE_COMMIT_PREFIX))
                                .take(crate::change::COMMIT_BATCH_LIMIT)
                                .collect();
                            // Oldest first: commits are processed in
                            // ascending date order.
                            direct.reverse();
                            if !direct.is_empty() {
                                match self.inner.change.on_commits(&record, direct).await {
                                    Ok(outcome) => report.commits = outcome.shas,
                                    Err(change_error) => {
                                        warn!(repo_key = %repo_key, %change_error, "commit processing failed");
                                        incomplete = true;
                                    }
                                }
                            }
                        }
                        Err(list_error) => {
                            warn!(repo_key = %repo_key, %list_error, "commit listing failed");
                            incomplete = true;
                        }
                    }
                }
            }
            Some(_) => {}
        }

        // Cursor advance: the PR cursor moves to the highest success even
        // on partial or cancelled cycles; `last_synced_at` only moves when
        // the cycle fully completed.
        let completed = !incomplete && !cancelled;
        let update = CursorUpdate {
            last_processed_pr: highest_processed,
            last_synced_at: completed.then(Utc::now),
        };
        if update.last_processed_pr.is_some() || update.last_synced_at.is_some() {
            if let Err(store_error) = self.inner.store.update_cursor(repo_key, update) {
                error!(repo_key = %repo_key, %store_error, "cursor advance failed");
                report.outcome = CycleOutcome::Failed(store_error.to_string());
                return report;
            }
        }

        report.outcome = if cancelled {
            CycleOutcome::Cancelled
        } else if incomplete {
            CycleOutcome::Partial
        } else {
            CycleOutcome::Completed
        };
        report
    }
}
