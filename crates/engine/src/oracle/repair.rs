// Extraction and repair of model-composed JSON.
//
// Model replies wrap the object in prose or code fences and routinely
// truncate mid-structure. The pipeline: locate the first `{`, cut trailing
// text after the object balances, close whatever never closed, and strip
// trailing commas. Repair is idempotent on anything that already parses.

use serde::de::DeserializeOwned;

/// Failure to obtain a parseable object from a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairError {
    pub detail: String,
}

impl std::fmt::Display for RepairError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oracle JSON repair failed: {}", self.detail)
    }
}

impl std::error::Error for RepairError {}

/// The reply from the first `{` onward, or `None` when no object starts.
pub fn extract_json(reply: &str) -> Option<&str> {
    reply.find('{').map(|start| &reply[start..])
}

/// Repair common defects: truncate trailing non-JSON after the object
/// balances, close unbalanced strings/brackets/braces, strip trailing
/// commas before `}` or `]`.
pub fn repair(input: &str) -> String {
    let truncated = truncate_after_balance(input.trim());
    let closed = close_unbalanced(truncated);
    strip_trailing_commas(&closed)
}

/// Extract, repair, and parse a typed record from a model reply.
pub fn parse_object<T: DeserializeOwned>(reply: &str) -> Result<T, RepairError> {
    let fragment = extract_json(reply)
        .ok_or_else(|| RepairError { detail: "reply contains no JSON object".to_string() })?;
    let repaired = repair(fragment);
    serde_json::from_str(&repaired).map_err(|error| RepairError { detail: error.to_string() })
}

/// Cut the input at the point where the first top-level value balances,
/// discarding any trailing prose. Unbalanced input is kept whole.
fn truncate_after_balance(input: &str) -> &str {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut seen_open = false;

    for (idx, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => {
                depth += 1;
                seen_open = true;
            }
            '}' | ']' if !in_string => {
                depth -= 1;
                if seen_open && depth == 0 {
                    return &input[..idx + ch.len_utf8()];
                }
            }
            _ => {}
        }
    }
    input
}

/// Close an unterminated string, then append the closers for every bracket
/// or brace still open, innermost first.
fn close_unbalanced(input: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut output = input.to_string();
    if in_string {
        output.push('"');
    }
    while let Some(closer) = stack.pop() {
        output.push(closer);
    }
    output
}

/// Remove commas directly preceding `}` or `]` (whitespace ignored), and a
/// dangling comma at the very end.
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut output = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if escaped {
            escaped = false;
            output.push(ch);
            i += 1;
            continue;
        }
        match ch {
            '\\' if in_string => {
                escaped = true;
                output.push(ch);
            }
            '"' => {
                in_string = !in_string;
                output.push(ch);
            }
            ',' if !in_string => {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                let next = chars.get(j);
                if next.is_none() || next == Some(&'}') || next == Some(&']') {
                    // Drop the comma; keep the whitespace that followed it.
                } else {
                    output.push(ch);
                }
            }
            _ => output.push(ch),
        }
        i += 1;
    }
    output
}
