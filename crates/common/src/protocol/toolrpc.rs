// JSON-RPC 2.0 request/response types for the workspace tool protocol,
// plus the event-stream reply framing the document service uses.
//
// Replies arrive either as raw JSON or framed as:
//
//   event: message
//   data: {"jsonrpc":"2.0","result":{...},"id":1}
//
// `parse_reply` strips the framing; if neither form parses the reply is a
// protocol error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: RequestId,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request ID: integer, string, or null.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl Request {
    /// A `tools/call` invocation of the named workspace tool.
    pub fn tool_call(tool: &str, arguments: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: TOOLS_CALL_METHOD.to_string(),
            params: Some(serde_json::json!({ "name": tool, "arguments": arguments })),
            id,
        }
    }
}

/// Failure to make sense of a reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyParseError {
    pub detail: String,
}

impl std::fmt::Display for ReplyParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable tool-protocol reply: {}", self.detail)
    }
}

impl std::error::Error for ReplyParseError {}

/// Parse a reply body that is either raw JSON or event-stream framed.
pub fn parse_reply(body: &str) -> Result<Response, ReplyParseError> {
    if let Some(data) = extract_event_data(body) {
        if let Ok(response) = serde_json::from_str::<Response>(&data) {
            return Ok(response);
        }
    }

    serde_json::from_str::<Response>(body.trim()).map_err(|error| ReplyParseError {
        detail: format!("{error} (body prefix: {:?})", truncate(body, 120)),
    })
}

/// Collect the `data:` payload of the first event in an event-stream body.
/// Multi-line `data:` fields are concatenated per the framing rules.
fn extract_event_data(body: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.is_empty() && !data_lines.is_empty() {
            // Blank line terminates the first event.
            break;
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

/// The payload of a successful tool call.
///
/// Some deployments wrap the tool output in a content envelope
/// (`{"content":[{"type":"text","text":"<json>"}]}`); others return the
/// output object directly. Both shapes are accepted.
pub fn tool_result(response: &Response) -> Option<Value> {
    let result = response.result.as_ref()?;
    if let Some(text) = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
    {
        if let Ok(inner) = serde_json::from_str::<Value>(text) {
            return Some(inner);
        }
        return Some(Value::String(text.to_string()));
    }
    Some(result.clone())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
