//! Gateway Error Types
//!
//! Transport-level failures short-circuit with an HTTP status; protocol-level
//! failures become JSON-RPC error objects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use super::types::{codes, JsonRpcError};

/// Errors raised while admitting or dispatching a call
#[derive(Error, Debug)]
pub enum GatewayError {
    // Admission errors
    #[error("Invalid API Key")]
    Unauthorized,

    #[error("Unknown host: {0}")]
    UnknownTenant(String),

    // Protocol errors
    #[error("Operation '{operation}' is not permitted for tenant '{tenant}'")]
    OperationNotPermitted { tenant: String, operation: String },

    #[error("Unknown tool: {0}")]
    UnknownOperation(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl GatewayError {
    /// HTTP status when the error ends the request before any JSON-RPC handling
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownTenant(_) => StatusCode::FORBIDDEN,
            Self::Parse(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        }
    }

    pub fn rpc_code(&self) -> i32 {
        match self {
            Self::OperationNotPermitted { .. } => codes::OPERATION_NOT_PERMITTED,
            Self::UnknownOperation(_) | Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::Unauthorized | Self::UnknownTenant(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.rpc_code(),
            message: self.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Self::Unauthorized | Self::UnknownTenant(_) => json!({ "error": self.to_string() }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": self.to_rpc_error(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let denied = GatewayError::OperationNotPermitted {
            tenant: "fs".into(),
            operation: "execute_command".into(),
        };
        let unknown = GatewayError::UnknownOperation("nope".into());
        assert_eq!(denied.rpc_code(), -32001);
        assert_eq!(unknown.rpc_code(), -32602);
        assert_ne!(denied.rpc_code(), unknown.rpc_code());
    }

    #[test]
    fn test_admission_statuses() {
        assert_eq!(GatewayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::UnknownTenant("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(GatewayError::Unauthorized.to_string(), "Invalid API Key");
    }
}
