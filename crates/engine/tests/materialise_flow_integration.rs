// End-to-end materialisation against a scripted workspace and provider.
//
// Covers: fresh materialisation (exactly one document, four collections in
// order, four item seeds), idempotent re-analysis (zero creation calls),
// and the degraded-oracle path.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::{extract::Json, http::StatusCode, routing::post, Router};
use engram_common::analysis::{
    ChangeAnalysis, CommitSignificance, CoreModule, RepoAnalysis,
};
use engram_common::types::{Credential, OwnerUser, RepoKey};
use engram_engine::github::types::{CommitFile, CommitSummary, PrData, RepoSignals};
use engram_engine::materialise::{MaterialiseRequest, MaterialiseResult, Materialiser};
use engram_engine::oracle::{Oracle, OracleError};
use engram_engine::store::ConnectionStore;
use serde_json::{json, Value};
use tempfile::TempDir;

// ── Scripted workspace service ─────────────────────────────────────

#[derive(Default)]
struct WorkspaceState {
    documents: Vec<(String, String)>,
    calls: Vec<(String, Value)>,
    next_id: usize,
}

impl WorkspaceState {
    fn calls_of(&self, tool: &str) -> Vec<Value> {
        self.calls
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
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
                guard.calls.push((tool.clone(), args.clone()));

                let result = match tool.as_str() {
                    "documents_list" => {
                        let documents: Vec<Value> = guard
                            .documents
                            .iter()
                            .map(|(id, title)| json!({"id": id, "title": title}))
                            .collect();
                        json!({ "documents": documents })
                    }
                    "documents_create" => {
                        guard.next_id += 1;
                        let id = format!("doc-{}", guard.next_id);
                        let title = args["documents"][0]["title"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        guard.documents.push((id.clone(), title));
                        json!({ "documents": [{ "id": id }] })
                    }
                    "collections_create" => {
                        guard.next_id += 1;
                        json!({ "collectionBlockId": format!("col-{}", guard.next_id) })
                    }
                    _ => json!({ "ok": true }),
                };

                let id = body["id"].clone();
                let payload = json!({"jsonrpc": "2.0", "result": result, "id": id}).to_string();
                (
                    [("content-type", "text/event-stream")],
                    format!("event: message\ndata: {payload}\n\n"),
                )
            }
        }),
    )
}

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener =
        tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let address = listener.local_addr().expect("listener should expose address");
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock service should run");
    });
    (format!("http://{address}"), server)
}

/// A provider whose signal endpoints all 404: signal gathering degrades to
/// empty values and materialisation proceeds regardless.
fn empty_github_router() -> Router {
    Router::new().fallback(|| async { StatusCode::NOT_FOUND })
}

// ── Scripted oracle ────────────────────────────────────────────────

struct ScriptedOracle {
    analysis: Mutex<Option<RepoAnalysis>>,
    repo_calls: Arc<Mutex<usize>>,
}

impl ScriptedOracle {
    fn returning(analysis: RepoAnalysis) -> Self {
        Self { analysis: Mutex::new(Some(analysis)), repo_calls: Arc::new(Mutex::new(0)) }
    }

    fn failing() -> Self {
        Self { analysis: Mutex::new(None), repo_calls: Arc::new(Mutex::new(0)) }
    }
}

impl Oracle for ScriptedOracle {
    fn analyse_repository(
        &self,
        _repo_key: RepoKey,
        _signals: RepoSignals,
    ) -> Pin<Box<dyn Future<Output = Result<RepoAnalysis, OracleError>> + Send>> {
        *self.repo_calls.lock().unwrap() += 1;
        let canned = self.analysis.lock().unwrap().clone();
        Box::pin(async move {
            canned.ok_or(OracleError::Parse { message: "scripted failure".to_string() })
        })
    }

    fn analyse_pr(
        &self,
        _pr: PrData,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeAnalysis, OracleError>> + Send>> {
        Box::pin(async { Err(OracleError::NotConfigured) })
    }

    fn analyse_commits(
        &self,
        _commits: Vec<CommitSummary>,
        _newest_files: Vec<CommitFile>,
    ) -> Pin<Box<dyn Future<Output = Result<CommitSignificance, OracleError>> + Send>> {
        Box::pin(async { Err(OracleError::NotConfigured) })
    }
}

fn sample_analysis() -> RepoAnalysis {
    let mut analysis = RepoAnalysis::default();
    analysis.overview.project_name = "hello".into();
    analysis.core_modules.push(CoreModule { name: "auth".into(), ..CoreModule::default() });
    analysis.core_modules.push(CoreModule { name: "api".into(), ..CoreModule::default() });
    analysis.technical_stack.backend = vec!["rust".into()];
    analysis.confidence = 0.82;
    analysis
}

fn request(repo_key: RepoKey, workspace_endpoint: &str) -> MaterialiseRequest {
    MaterialiseRequest {
        repo_key,
        credential: Credential::new("ghp_test"),
        workspace_endpoint: workspace_endpoint.to_string(),
        branch: "main".into(),
        owner_user: OwnerUser {
            id: 7,
            login: "octocat".into(),
            display_name: "Octo Cat".into(),
            email: None,
        },
    }
}

// ── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_materialisation_creates_document_and_four_collections() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState::default()));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    let (github_url, github) = serve(empty_github_router()).await;

    let materialiser = Materialiser::new(
        store.clone(),
        Arc::new(ScriptedOracle::returning(sample_analysis())),
        github_url,
    );

    let repo_key = RepoKey::new("octocat", "hello");
    let result = materialiser
        .analyse(request(repo_key.clone(), &format!("{workspace_url}/rpc")))
        .await
        .expect("materialisation should succeed");

    let MaterialiseResult::Created { document_id, title, collection_ids, confidence, .. } = result
    else {
        panic!("expected Created, got {result:?}");
    };
    assert_eq!(title, "octocat-hello-docs");
    assert_eq!(confidence, 0.82);
    assert!(collection_ids.is_complete());

    let state = workspace_state.lock().unwrap();

    let creates = state.calls_of("documents_create");
    assert_eq!(creates.len(), 1, "exactly one document creation");
    assert_eq!(creates[0]["documents"][0]["title"], "octocat-hello-docs");

    let collections = state.calls_of("collections_create");
    assert_eq!(collections.len(), 4, "exactly four collection creations");
    let names: Vec<&str> =
        collections.iter().map(|args| args["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["release_notes", "adrs", "engineering_tasks", "doc_history"]);

    let seeds = state.calls_of("collectionItems_add");
    assert_eq!(seeds.len(), 4, "one item seed per collection");
    // Each seed uses its collection's content key.
    assert!(seeds[0]["items"][0].get("title").is_some(), "release note seeds use `title`");
    assert!(seeds[1]["items"][0].get("title").is_some(), "ADR seeds use `title`");
    assert!(seeds[2]["items"][0].get("task").is_some(), "task seeds use `task`");
    assert!(seeds[3]["items"][0].get("event").is_some(), "history seeds use `event`");

    // The record landed in the store, fully populated.
    let record = store.get(&repo_key).expect("record should be persisted");
    assert_eq!(record.document_id.as_deref(), Some(document_id.as_str()));
    assert!(record.collection_ids.is_complete());
    assert_eq!(record.confidence, 0.82);

    workspace.abort();
    github.abort();
}

#[tokio::test]
async fn re_analysis_is_idempotent_with_zero_creation_calls() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState::default()));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    let (github_url, github) = serve(empty_github_router()).await;

    let oracle = Arc::new(ScriptedOracle::returning(sample_analysis()));
    let materialiser = Materialiser::new(store.clone(), oracle.clone(), github_url);

    let repo_key = RepoKey::new("octocat", "hello");
    let endpoint = format!("{workspace_url}/rpc");

    let first = materialiser.analyse(request(repo_key.clone(), &endpoint)).await.unwrap();
    let MaterialiseResult::Created { document_id: first_id, .. } = first else {
        panic!("first run should create");
    };

    let creates_before = workspace_state.lock().unwrap().calls_of("documents_create").len();

    let second = materialiser.analyse(request(repo_key, &endpoint)).await.unwrap();
    let MaterialiseResult::Existing { document_id: second_id, .. } = second else {
        panic!("second run should short-circuit");
    };
    assert_eq!(second_id, first_id, "the existing document id is returned");

    let state = workspace_state.lock().unwrap();
    assert_eq!(
        state.calls_of("documents_create").len(),
        creates_before,
        "re-analysis performs zero document creations"
    );
    assert_eq!(state.calls_of("collections_create").len(), 4, "no extra collections");
    assert_eq!(*oracle.repo_calls.lock().unwrap(), 1, "the oracle is consulted only once");

    workspace.abort();
    github.abort();
}

#[tokio::test]
async fn workspace_probe_hydrates_unknown_existing_document() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState::default()));
    workspace_state
        .lock()
        .unwrap()
        .documents
        .push(("doc-preexisting".into(), "Octocat-Hello-Docs".into()));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    let (github_url, github) = serve(empty_github_router()).await;

    let materialiser = Materialiser::new(
        store.clone(),
        Arc::new(ScriptedOracle::returning(sample_analysis())),
        github_url,
    );

    let repo_key = RepoKey::new("octocat", "hello");
    let result = materialiser
        .analyse(request(repo_key.clone(), &format!("{workspace_url}/rpc")))
        .await
        .expect("probe hydration should succeed");

    let MaterialiseResult::Existing { document_id, .. } = result else {
        panic!("workspace probe should report existing");
    };
    assert_eq!(document_id, "doc-preexisting");

    let record = store.get(&repo_key).expect("hydrated record should be stored");
    assert_eq!(record.document_id.as_deref(), Some("doc-preexisting"));
    assert_eq!(workspace_state.lock().unwrap().calls_of("documents_create").len(), 0);

    workspace.abort();
    github.abort();
}

#[tokio::test]
async fn oracle_failure_degrades_but_still_materialises() {
    let dir = TempDir::new().unwrap();
    let store = ConnectionStore::open_in(dir.path());
    store.initialize().unwrap();

    let workspace_state = Arc::new(Mutex::new(WorkspaceState::default()));
    let (workspace_url, workspace) = serve(workspace_router(Arc::clone(&workspace_state))).await;
    let (github_url, github) = serve(empty_github_router()).await;

    let materialiser =
        Materialiser::new(store.clone(), Arc::new(ScriptedOracle::failing()), github_url);

    let repo_key = RepoKey::new("octocat", "hello");
    let result = materialiser
        .analyse(request(repo_key.clone(), &format!("{workspace_url}/rpc")))
        .await
        .expect("degraded materialisation should still succeed");

    let MaterialiseResult::Created { confidence, .. } = result else {
        panic!("degraded run should still create");
    };
    assert_eq!(confidence, 0.3, "degraded skeleton carries low confidence");

    let state = workspace_state.lock().unwrap();
    assert_eq!(state.calls_of("collections_create").len(), 4);

    workspace.abort();
    github.abort();
}
