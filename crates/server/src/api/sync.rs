// The `/sync/*` endpoints the UI drives.
//
// Contract errors (missing fields, bad session) return 400/401 without
// touching state; everything else delegates to the engine components.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use engram_common::types::RepoKey;
use engram_engine::github::GithubClient;
use engram_engine::materialise::{MaterialiseRequest, MaterialiseResult};
use engram_engine::sync::TriggerError;
use engram_engine::workspace::WorkspaceClient;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::AppState;
use crate::error::ApiError;
use crate::sessions::ProviderSession;

/// Resolve the session and confirm its credential still answers for the
/// same provider user. A provider outage keeps the cached identity; a
/// rejected credential invalidates the session on the spot.
async fn require_session(state: &AppState, session_id: &str) -> Result<ProviderSession, ApiError> {
    let session = state.sessions.resolve(session_id).ok_or_else(ApiError::invalid_session)?;

    let github = GithubClient::with_api_url(session.credential.clone(), &state.github_api_url);
    match github.get_authenticated_user().await {
        Ok(user) if user.id == session.user.id => Ok(session),
        Ok(user) => {
            warn!(
                session_user = session.user.id,
                provider_user = user.id,
                "credential answers for a different user, invalidating session"
            );
            state.sessions.remove(session_id);
            Err(ApiError::invalid_session())
        }
        Err(error) if error.is_retryable() => {
            warn!(%error, "provider unreachable, trusting cached session");
            Ok(session)
        }
        Err(error) => {
            warn!(%error, "credential rejected by provider, invalidating session");
            state.sessions.remove(session_id);
            Err(ApiError::invalid_session())
        }
    }
}

fn confidence_pct(confidence: f64) -> i64 {
    (confidence.clamp(0.0, 1.0) * 100.0).round() as i64
}

// ── POST /sync/analyze ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub session_id: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub craft_mcp_url: Option<String>,
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id =
        body.session_id.as_deref().ok_or_else(|| ApiError::bad_request("missing sessionId"))?;
    let owner = body.owner.as_deref().ok_or_else(|| ApiError::bad_request("missing owner"))?;
    let repo = body.repo.as_deref().ok_or_else(|| ApiError::bad_request("missing repo"))?;
    let workspace_endpoint = body
        .craft_mcp_url
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing craftMcpUrl"))?;

    let session = require_session(&state, session_id).await?;
    let repo_key = RepoKey::new(owner, repo);
    let branch = body.branch.unwrap_or_else(|| "main".to_string());

    let result = state
        .materialiser
        .analyse(MaterialiseRequest {
            repo_key: repo_key.clone(),
            credential: session.credential,
            workspace_endpoint: workspace_endpoint.to_string(),
            branch,
            owner_user: session.user,
        })
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;

    let connection_info = state.store.get(&repo_key).map(|record| {
        json!({
            "repoKey": record.repo_key.as_str(),
            "connectedAt": record.connected_at.to_rfc3339(),
            "autoSyncEnabled": record.auto_sync_enabled,
        })
    });

    let response = match result {
        MaterialiseResult::Existing { document_id, title, confidence } => json!({
            "success": true,
            "alreadyExists": true,
            "craftDocument": { "id": document_id, "title": title },
            "analysis": {
                "repoName": repo_key.as_str(),
                "confidence": confidence_pct(confidence),
                "techStack": [],
            },
            "connectionInfo": connection_info,
        }),
        MaterialiseResult::Created { document_id, title, confidence, tech_stack, .. } => json!({
            "success": true,
            "craftDocument": { "id": document_id, "title": title },
            "analysis": {
                "repoName": repo_key.as_str(),
                "confidence": confidence_pct(confidence),
                "techStack": tech_stack,
            },
            "connectionInfo": connection_info,
        }),
    };
    Ok(Json(response))
}

// ── POST /sync/manual ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualSyncRequest {
    pub session_id: Option<String>,
    pub owner: Option<String>,
    pub repo: Option<String>,
    #[allow(dead_code)]
    pub branch: Option<String>,
    pub craft_mcp_url: Option<String>,
}

pub async fn manual(
    State(state): State<AppState>,
    Json(body): Json<ManualSyncRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id =
        body.session_id.as_deref().ok_or_else(|| ApiError::bad_request("missing sessionId"))?;
    let owner = body.owner.as_deref().ok_or_else(|| ApiError::bad_request("missing owner"))?;
    let repo = body.repo.as_deref().ok_or_else(|| ApiError::bad_request("missing repo"))?;
    body.craft_mcp_url
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing craftMcpUrl"))?;

    require_session(&state, session_id).await?;
    let repo_key = RepoKey::new(owner, repo);

    let report = state.engine.trigger_one(&repo_key).await.map_err(|error| match error {
        TriggerError::NotConnected { .. } => ApiError::not_found(error.to_string()),
    })?;

    let prs: Vec<Value> = report
        .prs
        .iter()
        .map(|pr| json!({ "number": pr.number, "title": pr.title }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "prCount": report.prs.len(),
        "commitCount": report.commits.len(),
        "prs": prs,
        "commits": report.commits,
    })))
}

// ── GET /sync/repositories ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

pub async fn repositories(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, ApiError> {
    let session_id =
        query.session_id.as_deref().ok_or_else(|| ApiError::bad_request("missing sessionId"))?;
    let session = require_session(&state, session_id).await?;

    let github = GithubClient::with_api_url(session.credential, &state.github_api_url);
    let repos = github
        .list_repositories()
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;

    let repositories: Vec<Value> = repos
        .iter()
        .map(|repo| {
            json!({
                "fullName": repo.full_name,
                "private": repo.private,
                "defaultBranch": repo.default_branch,
                "description": repo.description,
            })
        })
        .collect();

    Ok(Json(json!({ "success": true, "repositories": repositories })))
}

// ── GET /sync/connected ────────────────────────────────────────────

pub async fn connected(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, ApiError> {
    let session_id =
        query.session_id.as_deref().ok_or_else(|| ApiError::bad_request("missing sessionId"))?;
    let session = require_session(&state, session_id).await?;

    let mut connections = Vec::new();
    for record in state.store.all_for_user(session.user.id) {
        // Reconcile against the workspace: a record whose remote document
        // is gone is deleted here, exactly as in the scheduled cycle.
        let workspace = WorkspaceClient::new(&record.workspace_endpoint);
        match workspace.document_exists(&record.document_title).await {
            Ok(None) => {
                warn!(repo_key = %record.repo_key, "remote document gone, removing connection");
                if let Err(error) = state.store.delete(&record.repo_key) {
                    warn!(repo_key = %record.repo_key, %error, "reconciliation delete failed");
                }
                continue;
            }
            Ok(Some(_)) => {}
            Err(error) => {
                // Probe failure keeps the record; it will reconcile later.
                warn!(repo_key = %record.repo_key, %error, "existence probe failed");
            }
        }

        connections.push(json!({
            "repoKey": record.repo_key.as_str(),
            "documentId": record.document_id,
            "documentTitle": record.document_title,
            "connectedAt": record.connected_at.to_rfc3339(),
            "lastSyncedAt": record.last_synced_at.map(|t| t.to_rfc3339()),
            "lastProcessedPR": record.last_processed_pr,
            "autoSyncEnabled": record.auto_sync_enabled,
            "confidence": confidence_pct(record.confidence),
        }));
    }

    Ok(Json(json!({ "success": true, "connections": connections })))
}

// ── DELETE /sync/disconnect/{owner}/{repo} ─────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectQuery {
    pub session_id: Option<String>,
    pub delete_craft_doc: Option<bool>,
}

pub async fn disconnect(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<DisconnectQuery>,
) -> Result<Json<Value>, ApiError> {
    let session_id =
        query.session_id.as_deref().ok_or_else(|| ApiError::bad_request("missing sessionId"))?;
    let session = require_session(&state, session_id).await?;

    let repo_key = RepoKey::new(&owner, &repo);
    let record = state
        .store
        .get(&repo_key)
        .ok_or_else(|| ApiError::not_found(format!("{repo_key} is not connected")))?;
    if record.owner_user.id != session.user.id {
        return Err(ApiError::forbidden("connection belongs to a different user"));
    }

    let mut remote_deleted = false;
    if query.delete_craft_doc.unwrap_or(false) {
        if let Some(document_id) = &record.document_id {
            let workspace = WorkspaceClient::new(&record.workspace_endpoint);
            match workspace.documents_delete(std::slice::from_ref(document_id)).await {
                Ok(()) => remote_deleted = true,
                Err(error) => {
                    warn!(repo_key = %repo_key, %error, "remote document deletion failed");
                }
            }
        }
    }

    state.store.delete(&repo_key).map_err(|error| ApiError::internal(error.to_string()))?;

    Ok(Json(json!({ "success": true, "remoteDocumentDeleted": remote_deleted })))
}

// ── GET /sync/sync-status ──────────────────────────────────────────

pub async fn sync_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.engine.status();
    Json(json!({
        "isRunning": status.is_running,
        "connectedRepos": status.connected_repos,
        "syncInterval": status.sync_interval_secs,
        "lastSyncTimes": status.last_sync_times,
    }))
}

// ── POST /sync/auto-sync ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSyncRequest {
    pub session_id: Option<String>,
    pub repo_full_name: Option<String>,
    pub enabled: Option<bool>,
}

pub async fn auto_sync(
    State(state): State<AppState>,
    Json(body): Json<AutoSyncRequest>,
) -> Result<Json<Value>, ApiError> {
    let session_id =
        body.session_id.as_deref().ok_or_else(|| ApiError::bad_request("missing sessionId"))?;
    let full_name = body
        .repo_full_name
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("missing repoFullName"))?;
    let enabled = body.enabled.ok_or_else(|| ApiError::bad_request("missing enabled"))?;

    let session = require_session(&state, session_id).await?;
    let repo_key = RepoKey::parse(full_name)
        .ok_or_else(|| ApiError::bad_request("repoFullName must be owner/name"))?;

    let mut record = state
        .store
        .get(&repo_key)
        .ok_or_else(|| ApiError::not_found(format!("{repo_key} is not connected")))?;
    if record.owner_user.id != session.user.id {
        return Err(ApiError::forbidden("connection belongs to a different user"));
    }

    record.auto_sync_enabled = enabled;
    state.store.put(record).map_err(|error| ApiError::internal(error.to_string()))?;

    Ok(Json(json!({ "success": true, "autoSyncEnabled": enabled })))
}
