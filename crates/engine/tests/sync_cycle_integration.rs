// Sync-cycle scenarios against scripted provider, workspace and oracle:
// the major-breaking PR sweep, the skipped first commit sweep, remote
// reconciliation, and cursor behaviour on mid-sweep failures.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, Path},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{Duration, Utc};
use engram_common::analysis::{
    ChangeAnalysis, ChangeType, CommitSignificance, ImpactLevel, RepoAnalysis,
};
use engram_common::types::{ConnectionRecord, Credential, OwnerUser, RepoKey};
use engram_engine::config::SyncSettings;
use engram_engine::github::types::{CommitFile, CommitSummary, PrData, RepoSignals};
use engram_engine::oracle::{Oracle, OracleError};
use engram_engine::store::ConnectionStore;
use engram_engine::sync::{CycleOutcome, SyncEngine};
use serde_json::{json, Value};
use tempfile::TempDir;

// ── Scripted workspace ─────────────────────────────────────────────

#[derive(Default)]
struct WorkspaceState {
    titles: Vec<String>,
    calls: Vec<(String, Value)>,
}

impl WorkspaceState {
    fn calls_of(&self, tool: &str) -> Vec<Value> {
        self.calls
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn items_added_to(&self, collection_id: &str) -> Vec<Value> {
        self.calls_of("collectionItems_add")
            .into_iter()
            .filter(|args| args["collectionBlockId"] == collection_id)
            .flat_map(|args| args["items"].as_array().cloned().unwrap_or_default())
            .collect()
    }
}

fn workspace_router(state: Arc<Mutex<WorkspaceState>>) -> Router {
    Router::new().route(
        "/rpc",
        post(move |Json(body): Json<Value>| {
            let state = Arc::clone(&state);
            async move {
                let tool = body["params"]["name"].as_str().unwrap_or_default().to_string();
                let args = body["params"]["arguments"].clone();
                let mut guard = state.lock().unwrap();
                guard.calls.push((tool.clone(), args));

                let result = match tool.as_str() {
                    "documents_list" => {
                        let documents: Vec<Value> = guard
                            .titles
                            .iter()
                            .enumerate()
                            .map(|(i, title)| json!({"id": format!("doc-{i}"), "title": title}))
                            .collect();
                        json!({ "documents": documents })
                    }
                    "blocks_get" => json!({ "blocks": [] }),
                    _ => json!({ "ok": true }),
                };

                let id = body["id"].clone();
                Json(json!({"jsonrpc": "2.0", "result": result, "id": id}))
            }
        }),
    )
}

// ── Scripted provider ──────────────────────────────────────────────

struct GithubScript {
    merged_prs: Vec<(i64, &'static str)>,
    commits: Vec<Value>,
    fail_pr: Option<i64>,
    hits: AtomicUsize,
}

fn github_router(script: Arc<GithubScript>) -> Router {
    let prs = {
        let script = Arc::clone(&script);
        get(move || {
            let script = Arc::clone(&script);
            async move {
                script.hits.fetch_add(1, Ordering::SeqCst);
                let list: Vec<Value> = script
                    .merged_prs
                    .iter()
                    .map(|(number, title)| {
                        json!({
                            "number": number,
                            "title": title,
                            "merged_at": "2026-07-30T10:00:00Z"
                        })
                    })
                    .collect();
                Json(json!(list))
            }
        })
    };

    let pr_detail = {
        let script = Arc::clone(&script);
        get(move |Path(number): Path<i64>| {
            let script = Arc::clone(&script);
            async move {
                script.hits.fetch_add(1, Ordering::SeqCst);
                if script.fail_pr == Some(number) {
                    return Err(StatusCode::INTERNAL_SERVER_ERROR);
                }
                let title = script
                    .merged_prs
                    .iter()
                    .find(|(n, _)| *n == number)
                    .map(|(_, title)| *title)
                    .unwrap_or("unknown");
                Ok(Json(json!({
                    "number": number,
                    "title": title,
                    "body": "",
                    "user": {"login": "octocat"},
                    "merged_at": "2026-07-30T10:00:00Z",
                    "base": {"ref": "main"}
                })))
            }
        })
    };

    let commits = {
        let script = Arc::clone(&script);
        get(move || {
            let script = Arc::clone(&script);
            async move {
                script.hits.fetch_add(1, Ordering::SeqCst);
                Json(json!(script.commits.clone()))
            }
        })
    };

    let counted_empty = {
        let script = Arc::clone(&script);
        get(move || {
            let script = Arc::clone(&script);
            async move {
                script.hits.fetch_add(1, Ordering::SeqCst);
                Json(json!([]))
            }
        })
    };

    Router::new()
        .route("/repos/octocat/hello/pulls", prs)
        .route("/repos/octocat/hello/pulls/:n", pr_detail)
        .route("/repos/octocat/hello/pulls/:n/files", counted_empty.clone())
        .route("/repos/octocat/hello/issues/:n/comments", counted_empty.clone())
        .route("/repos/octocat/hello/pulls/:n/reviews", counted_empty)
        .route("/repos/octocat/hello/commits", commits)
}

// ── Scripted oracle ────────────────────────────────────────────────

#[derive(Default)]
struct CycleOracle {
    commit_calls: AtomicUsize,
}

impl Oracle for CycleOracle {
    fn analyse_repository(
        &self,
        _repo_key: RepoKey,
        _signals: RepoSignals,
    ) -> Pin<Box<dyn Future<Output = Result<RepoAnalysis, OracleError>> + Send>> {
        Box::pin(async { Err(OracleError::NotConfigured) })
    }

    fn analyse_pr(
        &self,
        pr: PrData,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeAnalysis, OracleError>> + Send>> {
        // PR 43 is the major breaking feature; everything else is a quiet
        // patch that should produce only a history entry.
        let analysis = if pr.number == 43 {
            ChangeAnalysis {
                change_type: ChangeType::Feature,
                impact_level: ImpactLevel::Major,
                public_api_changes: true,
                breaking_changes: true,
                requires_adr: true,
                summary: "reworks the auth API".into(),
                follow_up_tasks: vec!["migrate clients".into()],
                confidence: 0.9,
                ..ChangeAnalysis::default()
            }
        } else {
            ChangeAnalysis {
                change_type: ChangeType::Docs,
                impact_level: ImpactLevel::Patch,
                summary: "minor cleanup".into(),
                confidence: 0.8,
                ..ChangeAnalysis::default()
            }
        };
        Box::pin(async move { Ok(analysis) })
    }

    fn analyse_commits(
        &self,
        _commits: Vec<CommitSummary>,
        _newest_files: Vec<CommitFile>,
    ) -> Pin<Box<dyn Future<Output = Result<CommitSignificance, OracleError>> + Send>> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(CommitSignificance::default()) })
    }
}

// ── Shared setup ───────────────────────────────────────────────────

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let address = listener.local_addr().expect("listener should expose address");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock service should run");
    });
    (format!("http://{address}"), server)
}

fn connected_record(endpoint: &str) -> ConnectionRecord {
    let mut record = ConnectionRecord::new(
        RepoKey::new("octocat", "hello"),
        Credential::new("ghp_test"),
        endpoint.to_string(),
        OwnerUser { id: 7, login: "octocat".into(), display_name: "Octo".into(), email: None },
        Utc::now(),
    );
    record.document_id = Some("doc-0".into());
    record.collection_ids.release_notes = Some("col-rn".into());
    record.collection_ids.adrs = Some("col-adr".into());
    record.collection_ids.engineering_tasks = Some("col-task".into());
    record.collection_ids.doc_history = Some("col-hist".into());
    record
}

fn engine_over(store: &ConnectionStore, oracle: Arc<dyn Oracle>, github_url: String) -> SyncEngine {
    SyncEngine::new(store.clone(), oracle, SyncSettings::default(), github_url)
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn major_breaking_pr_promotes_everything_and_advances_cursor() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState {
        titles: vec!["octocat-hello-docs".into()],
        ..WorkspaceState::default()
    }));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    let script = Arc::new(GithubScript {
        merged_prs: vec![(42, "docs tweak"), (43, "Rework auth"), (44, "typo fix")],
        commits: Vec::new(),
        fail_pr: None,
        hits: AtomicUsize::new(0),
    });
    let (github_url, github) = serve(github_router(Arc::clone(&script))).await;

    let mut record = connected_record(&format!("{workspace_url}/rpc"));
    record.last_processed_pr = Some(41);
    record.last_synced_at = Some(Utc::now() - Duration::hours(1));
    let repo_key = record.repo_key.clone();
    store.put(record).unwrap();

    let engine = engine_over(&store, Arc::new(CycleOracle::default()), github_url);
    let report = engine.trigger_one(&repo_key).await.expect("cycle should run");

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.prs.len(), 3, "all three PRs processed in order");
    let numbers: Vec<i64> = report.prs.iter().map(|pr| pr.number).collect();
    assert_eq!(numbers, vec![42, 43, 44]);

    let state = workspace_state.lock().unwrap();

    // Every PR leaves a history entry; only PR 43 promotes further.
    assert_eq!(state.items_added_to("col-hist").len(), 3);

    let release_notes = state.items_added_to("col-rn");
    assert_eq!(release_notes.len(), 1, "exactly one release-notes item");
    let version = release_notes[0]["version"].as_str().unwrap();
    let expected_prefix = format!("v{}", Utc::now().format("%Y.%m"));
    assert!(
        version == format!("{expected_prefix}.0"),
        "major version should be {expected_prefix}.0, got {version}"
    );
    assert_eq!(release_notes[0]["pr_number"], 43);

    let adrs = state.items_added_to("col-adr");
    assert_eq!(adrs.len(), 1, "exactly one ADR item");
    let adr_id = adrs[0]["adr_id"].as_str().unwrap();
    assert!(adr_id.starts_with("ADR-") && adr_id.len() == 8, "auto id is ADR-nnnn: {adr_id}");

    let tasks = state.items_added_to("col-task");
    assert_eq!(tasks.len(), 1, "exactly one follow-up task");
    assert_eq!(tasks[0]["task"], "migrate clients");
    assert_eq!(tasks[0]["category"], "From PR#43");

    // The breaking-changes block reached the main document.
    let appended: Vec<String> = state
        .calls_of("markdown_add")
        .iter()
        .map(|args| args["markdown"].as_str().unwrap_or_default().to_string())
        .collect();
    assert!(
        appended.iter().any(|markdown| markdown.contains("Breaking Changes (PR #43)")),
        "breaking-changes block should be appended: {appended:?}"
    );

    drop(state);
    let cursor = store.get(&repo_key).unwrap();
    assert_eq!(cursor.last_processed_pr, Some(44), "cursor lands on the highest PR");
    assert!(cursor.last_synced_at.is_some());

    workspace.abort();
    github.abort();
}

#[tokio::test]
async fn first_sweep_skips_commit_history() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState {
        titles: vec!["octocat-hello-docs".into()],
        ..WorkspaceState::default()
    }));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;

    // Twelve direct commits exist on main.
    let commits: Vec<Value> = (0..12)
        .map(|i| {
            json!({
                "sha": format!("sha-{i:02}"),
                "commit": {
                    "message": format!("feat: change {i}"),
                    "author": {"name": "octocat", "date": "2026-07-30T10:00:00Z"}
                }
            })
        })
        .collect();
    let script = Arc::new(GithubScript {
        merged_prs: Vec::new(),
        commits,
        fail_pr: None,
        hits: AtomicUsize::new(0),
    });
    let (github_url, github) = serve(github_router(Arc::clone(&script))).await;

    // Fresh connection: lastSyncedAt is null.
    let mut record = connected_record(&format!("{workspace_url}/rpc"));
    record.last_processed_pr = Some(10);
    record.last_synced_at = None;
    let repo_key = record.repo_key.clone();
    store.put(record).unwrap();

    let oracle = Arc::new(CycleOracle::default());
    let engine = engine_over(&store, oracle.clone(), github_url);
    let report = engine.trigger_one(&repo_key).await.expect("cycle should run");

    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(
        oracle.commit_calls.load(Ordering::SeqCst),
        0,
        "commit path must not run on the first sweep"
    );
    assert!(report.commits.is_empty());

    let cursor = store.get(&repo_key).unwrap();
    assert!(cursor.last_synced_at.is_some(), "the baseline is recorded");
    assert_eq!(cursor.last_processed_pr, Some(10), "PR cursor untouched by an empty sweep");

    workspace.abort();
    github.abort();
}

#[tokio::test]
async fn missing_remote_document_reconciles_without_provider_calls() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    // The workspace knows no documents at all.
    let workspace_state = Arc::new(Mutex::new(WorkspaceState::default()));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    let script = Arc::new(GithubScript {
        merged_prs: vec![(42, "pending")],
        commits: Vec::new(),
        fail_pr: None,
        hits: AtomicUsize::new(0),
    });
    let (github_url, github) = serve(github_router(Arc::clone(&script))).await;

    let record = connected_record(&format!("{workspace_url}/rpc"));
    let repo_key = record.repo_key.clone();
    store.put(record).unwrap();

    let engine = engine_over(&store, Arc::new(CycleOracle::default()), github_url);
    let report = engine.trigger_one(&repo_key).await.expect("cycle should run");

    assert_eq!(report.outcome, CycleOutcome::Reconciled);
    assert!(store.get(&repo_key).is_none(), "the record is deleted in the same cycle");
    assert_eq!(
        script.hits.load(Ordering::SeqCst),
        0,
        "no provider calls are made for a reconciled connection"
    );

    workspace.abort();
    github.abort();
}

#[tokio::test]
async fn mid_sweep_failure_keeps_cursor_at_last_success() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState {
        titles: vec!["octocat-hello-docs".into()],
        ..WorkspaceState::default()
    }));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    // PR 43's detail fetch returns a 500 mid-sweep.
    let script = Arc::new(GithubScript {
        merged_prs: vec![(42, "ok"), (43, "boom"), (44, "never reached")],
        commits: Vec::new(),
        fail_pr: Some(43),
        hits: AtomicUsize::new(0),
    });
    let (github_url, github) = serve(github_router(Arc::clone(&script))).await;

    let mut record = connected_record(&format!("{workspace_url}/rpc"));
    record.last_processed_pr = Some(41);
    record.last_synced_at = Some(Utc::now() - Duration::hours(1));
    let previous_synced_at = record.last_synced_at;
    let repo_key = record.repo_key.clone();
    store.put(record).unwrap();

    let engine = engine_over(&store, Arc::new(CycleOracle::default()), github_url);
    let report = engine.trigger_one(&repo_key).await.expect("cycle should run");

    assert_eq!(report.outcome, CycleOutcome::Partial);
    let numbers: Vec<i64> = report.prs.iter().map(|pr| pr.number).collect();
    assert_eq!(numbers, vec![42], "the sweep stops at the failed PR");

    let cursor = store.get(&repo_key).unwrap();
    assert_eq!(cursor.last_processed_pr, Some(42), "cursor advances to the last success only");
    assert_eq!(
        cursor.last_synced_at, previous_synced_at,
        "a partial cycle must not advance lastSyncedAt"
    );

    workspace.abort();
    github.abort();
}
