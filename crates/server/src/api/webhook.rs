// Provider push webhook.
//
// The body is authenticated with HMAC-SHA256 over the raw bytes against the
// configured secret (`X-Hub-Signature-256: sha256=<hex>`); unsigned or
// mis-signed requests are rejected before any parsing. A verified push
// enqueues an out-of-schedule cycle for the matching connection, the same
// code path the scheduled sweep takes.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use engram_common::types::RepoKey;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use super::AppState;
use crate::error::{ApiError, ErrorCode};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verify a `sha256=<hex>` signature over the raw body. Comparison is
/// constant-time via the MAC verifier.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

pub async fn github_push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let Some(secret) = &state.webhook_secret else {
        return Err(ApiError::new(ErrorCode::NotConfigured, "webhook secret not configured"));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::new(ErrorCode::InvalidSession, "missing webhook signature"))?;

    if !verify_signature(secret, &body, signature) {
        warn!("webhook signature verification failed");
        return Err(ApiError::new(ErrorCode::InvalidSession, "invalid webhook signature"));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|error| ApiError::bad_request(format!("unparseable webhook body: {error}")))?;
    let full_name = payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("webhook body has no repository.full_name"))?;

    let Some(repo_key) = RepoKey::parse(full_name) else {
        return Err(ApiError::bad_request("repository.full_name must be owner/name"));
    };

    if state.store.get(&repo_key).is_none() {
        return Ok(Json(json!({ "success": true, "triggered": false })));
    }

    info!(repo_key = %repo_key, "push webhook verified, triggering sync cycle");
    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(error) = engine.trigger_one(&repo_key).await {
            warn!(%error, "webhook-triggered cycle failed");
        }
    });

    Ok(Json(json!({ "success": true, "triggered": true })))
}
