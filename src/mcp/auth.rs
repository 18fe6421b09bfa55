//! Gateway Authentication
//!
//! A single shared secret checked on every inbound call. The credential may
//! arrive as the `key` query parameter, an `X-API-Key` header or an
//! `Authorization: Bearer` header, tried in that order.

use axum::http::{header, HeaderMap};
use std::collections::HashMap;

/// Query parameter carrying the credential
pub const QUERY_KEY: &str = "key";
/// Header carrying the credential
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared-secret verifier
#[derive(Clone)]
pub struct ApiKeyAuth {
    api_key: String,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Byte-exact comparison; absent or empty credentials never match.
    pub fn verify(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(candidate) if !candidate.is_empty() => {
                constant_time_eq(candidate.as_bytes(), self.api_key.as_bytes())
            }
            _ => false,
        }
    }

    /// Check the credential found in `query` or `headers`.
    pub fn verify_request(&self, query: &HashMap<String, String>, headers: &HeaderMap) -> bool {
        self.verify(extract_credential(query, headers).as_deref())
    }

    /// Get auth type name for logging
    pub fn auth_type(&self) -> &'static str {
        "ApiKey"
    }
}

// Never print the secret
impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth").field("api_key", &"<redacted>").finish()
    }
}

/// First credential present in the request
pub fn extract_credential(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(key) = query.get(QUERY_KEY) {
        return Some(key.clone());
    }

    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
