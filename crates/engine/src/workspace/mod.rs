// Typed wrapper over the document-service tool protocol.
//
// Calls are JSON-RPC 2.0 over HTTP POST; replies come back raw or framed as
// an event stream (`common::protocol::toolrpc` strips the framing). The
// remote protocol is historically inconsistent about where it puts created
// ids, so extraction is a fixed policy that fails loudly rather than
// returning null.

pub mod blocks;

use std::time::Duration;

use engram_common::protocol::toolrpc::{self, Request, RequestId};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

const CALL_TIMEOUT: Duration = Duration::from_secs(60);

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceError {
    /// Network fault or non-success HTTP status.
    Transport { status: Option<u16>, retryable: bool, message: String },
    /// The reply parsed as neither framed nor raw JSON, the call returned a
    /// JSON-RPC error, or an expected field (e.g. a created id) was absent.
    Protocol { message: String },
}

impl WorkspaceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }

    fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }
}

impl std::fmt::Display for WorkspaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { status, retryable, message } => {
                write!(f, "workspace transport error (status {status:?}, retryable {retryable}): {message}")
            }
            Self::Protocol { message } => write!(f, "workspace protocol error: {message}"),
        }
    }
}

impl std::error::Error for WorkspaceError {}

// ── Types ──────────────────────────────────────────────────────────

/// A document as listed by the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub title: String,
}

/// A block of the root page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub text: String,
}

/// Where to place appended content on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePosition {
    Start,
    End,
}

impl PagePosition {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
        }
    }
}

// ── Id extraction ──────────────────────────────────────────────────

/// Extract a created collection id from a tool result.
///
/// Tried in order: `collectionBlockId`, `collections[0].id`, `id`,
/// `result.id`, `collection.id`; a bare string result is used as-is.
pub fn extract_collection_id(result: &Value) -> Option<String> {
    if let Some(id) = result.get("collectionBlockId").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if let Some(id) = result
        .get("collections")
        .and_then(Value::as_array)
        .and_then(|collections| collections.first())
        .and_then(|collection| collection.get("id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_string());
    }
    if let Some(id) = result.get("id").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if let Some(id) = result.pointer("/result/id").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if let Some(id) = result.pointer("/collection/id").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if let Some(id) = result.as_str() {
        return Some(id.to_string());
    }
    None
}

fn extract_document_id(result: &Value) -> Option<String> {
    if let Some(id) = result
        .get("documents")
        .and_then(Value::as_array)
        .and_then(|documents| documents.first())
        .and_then(|document| document.get("id"))
        .and_then(Value::as_str)
    {
        return Some(id.to_string());
    }
    if let Some(id) = result.get("id").and_then(Value::as_str) {
        return Some(id.to_string());
    }
    if let Some(id) = result.as_str() {
        return Some(id.to_string());
    }
    None
}

fn document_list_from(result: &Value) -> Vec<DocumentRef> {
    let entries = result
        .get("documents")
        .and_then(Value::as_array)
        .cloned()
        .or_else(|| result.as_array().cloned())
        .unwrap_or_default();

    entries
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id").and_then(Value::as_str)?;
            let title = entry
                .get("title")
                .or_else(|| entry.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(DocumentRef { id: id.to_string(), title: title.to_string() })
        })
        .collect()
}

// ── Client ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct WorkspaceClient {
    http: reqwest::Client,
    endpoint: String,
}

impl WorkspaceClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build().unwrap_or_default();
        Self { http, endpoint: endpoint.into() }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke one workspace tool and return its unwrapped result payload.
    /// Each call carries a fresh v4 UUID request id.
    pub async fn call(&self, tool: &str, arguments: Value) -> Result<Value, WorkspaceError> {
        let id = RequestId::String(Uuid::new_v4().to_string());
        let request = Request::tool_call(tool, arguments, id);

        let response = self
            .http
            .post(&self.endpoint)
            .header("accept", "application/json, text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|error| WorkspaceError::Transport {
                status: None,
                retryable: true,
                message: format!("tool call `{tool}` failed: {error}"),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|error| WorkspaceError::Transport {
            status: Some(status),
            retryable: true,
            message: format!("tool call `{tool}` body read failed: {error}"),
        })?;

        if !(200..300).contains(&status) {
            return Err(WorkspaceError::Transport {
                status: Some(status),
                retryable: status == 429 || status >= 500,
                message: format!("tool call `{tool}` returned status {status}"),
            });
        }

        let parsed = toolrpc::parse_reply(&body)
            .map_err(|error| WorkspaceError::protocol(format!("`{tool}`: {error}")))?;

        if let Some(rpc_error) = parsed.error {
            return Err(WorkspaceError::protocol(format!(
                "`{tool}` returned error {}: {}",
                rpc_error.code, rpc_error.message
            )));
        }

        debug!(tool, "workspace tool call succeeded");
        toolrpc::tool_result(&parsed)
            .ok_or_else(|| WorkspaceError::protocol(format!("`{tool}` reply had no result")))
    }

    // ── Documents ──────────────────────────────────────────────────

    pub async fn documents_list(&self) -> Result<Vec<DocumentRef>, WorkspaceError> {
        let result = self.call("documents_list", json!({})).await?;
        Ok(document_list_from(&result))
    }

    pub async fn documents_search(&self, query: &str) -> Result<Vec<DocumentRef>, WorkspaceError> {
        let result = self.call("documents_search", json!({ "query": query })).await?;
        Ok(document_list_from(&result))
    }

    /// Create a root-level document and return its id.
    pub async fn documents_create(&self, title: &str) -> Result<String, WorkspaceError> {
        let result = self
            .call(
                "documents_create",
                json!({ "documents": [{ "title": title, "location": "root" }] }),
            )
            .await?;
        extract_document_id(&result).ok_or_else(|| {
            WorkspaceError::protocol(format!(
                "documents_create returned no id (result: {result})"
            ))
        })
    }

    pub async fn documents_delete(&self, document_ids: &[String]) -> Result<(), WorkspaceError> {
        self.call("documents_delete", json!({ "documentIds": document_ids })).await?;
        Ok(())
    }

    /// Authoritative existence probe: exact case-insensitive title match
    /// against `documents_list`. `documents_search` (which lags the
    /// canonical state) is consulted only when the list call itself fails.
    pub async fn document_exists(
        &self,
        title: &str,
    ) -> Result<Option<DocumentRef>, WorkspaceError> {
        let documents = match self.documents_list().await {
            Ok(documents) => documents,
            Err(error) if error.is_retryable() => {
                debug!(%error, "documents_list failed, falling back to search");
                self.documents_search(title).await?
            }
            Err(error) => return Err(error),
        };
        Ok(documents.into_iter().find(|doc| doc.title.eq_ignore_ascii_case(title)))
    }

    // ── Markdown & blocks ──────────────────────────────────────────

    pub async fn markdown_add(
        &self,
        page_id: &str,
        markdown: &str,
        position: PagePosition,
    ) -> Result<(), WorkspaceError> {
        self.call(
            "markdown_add",
            json!({
                "markdown": markdown,
                "position": { "pageId": page_id, "position": position.as_str() }
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn blocks_get(&self, page_id: &str) -> Result<Vec<Block>, WorkspaceError> {
        let result = self.call("blocks_get", json!({ "pageId": page_id })).await?;
        let entries = result
            .get("blocks")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| result.as_array().cloned())
            .unwrap_or_default();

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let id = entry.get("id").and_then(Value::as_str)?;
                let text = entry
                    .get("content")
                    .or_else(|| entry.get("text"))
                    .or_else(|| entry.get("markdown"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(Block { id: id.to_string(), text: text.to_string() })
            })
            .collect())
    }

    pub async fn blocks_update(&self, block_id: &str, content: &str) -> Result<(), WorkspaceError> {
        self.call("blocks_update", json!({ "blockId": block_id, "content": content })).await?;
        Ok(())
    }

    pub async fn blocks_delete(&self, block_id: &str) -> Result<(), WorkspaceError> {
        self.call("blocks_delete", json!({ "blockId": block_id })).await?;
        Ok(())
    }

    // ── Collections ────────────────────────────────────────────────

    /// Create a collection on the page and return its id per the extraction
    /// policy. Absence of any recognised id shape is a hard protocol error.
    pub async fn collections_create(
        &self,
        page_id: &str,
        name: &str,
        schema: Value,
    ) -> Result<String, WorkspaceError> {
        let result = self
            .call(
                "collections_create",
                json!({
                    "name": name,
                    "schema": schema,
                    "position": { "pageId": page_id, "position": "end" }
                }),
            )
            .await?;
        extract_collection_id(&result).ok_or_else(|| {
            WorkspaceError::protocol(format!(
                "collections_create for `{name}` returned no recognisable id (result: {result})"
            ))
        })
    }

    pub async fn collection_items_add(
        &self,
        collection_block_id: &str,
        items: Vec<Value>,
    ) -> Result<(), WorkspaceError> {
        self.call(
            "collectionItems_add",
            json!({ "collectionBlockId": collection_block_id, "items": items }),
        )
        .await?;
        Ok(())
    }
}
