//! MCP Streamable HTTP Transport
//!
//! Server side of the MCP 2025-11-25 Streamable HTTP transport in stateless
//! JSON-response mode.
//!
//! Key features:
//! - Single POST endpoint for all JSON-RPC traffic (single messages or batches)
//! - Notifications acknowledged with 202 and no body
//! - GET/DELETE on the endpoint answered with 405 (no SSE stream, no sessions)
//! - Authenticated `/health` probe

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

use super::error::GatewayError;
use super::gateway::Gateway;
use super::types::{JsonRpcRequest, JsonRpcResponse};

/// Path of the liveness probe
pub const HEALTH_PATH: &str = "/health";

/// Build the HTTP router for `gateway`.
pub fn router(gateway: Arc<Gateway>, mcp_path: &str, max_body_bytes: usize) -> Router {
    Router::new()
        .route(mcp_path, post(handle_mcp_request))
        .route(HEALTH_PATH, get(handle_health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(gateway)
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("MCP server listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Host as sent by the client: the Host header, else the URI authority (HTTP/2)
fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
}

async fn handle_health(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = gateway.authenticate(&query, &headers) {
        return e.into_response();
    }
    Json(json!({ "status": "ok", "sessions": gateway.sessions().len() })).into_response()
}

async fn handle_mcp_request(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let tenant = match gateway.admit(&query, &headers, request_host(&headers, &uri)) {
        Ok(tenant) => tenant,
        Err(e) => return e.into_response(),
    };

    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => return GatewayError::Parse(e.to_string()).into_response(),
    };

    match message {
        Value::Array(items) => {
            if items.is_empty() {
                return GatewayError::InvalidRequest("empty batch".into()).into_response();
            }
            debug!("Batch of {} messages for tenant {}", items.len(), tenant.name());

            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                let response = match serde_json::from_value::<JsonRpcRequest>(item) {
                    Ok(request) => gateway.handle_rpc(tenant, request).await,
                    Err(e) => Some(JsonRpcResponse::failure(
                        Value::Null,
                        GatewayError::InvalidRequest(e.to_string()).to_rpc_error(),
                    )),
                };
                responses.extend(response);
            }

            if responses.is_empty() {
                StatusCode::ACCEPTED.into_response()
            } else {
                Json(responses).into_response()
            }
        }
        single => {
            let request: JsonRpcRequest = match serde_json::from_value(single) {
                Ok(r) => r,
                Err(e) => return GatewayError::InvalidRequest(e.to_string()).into_response(),
            };
            match gateway.handle_rpc(tenant, request).await {
                Some(response) => Json(response).into_response(),
                None => StatusCode::ACCEPTED.into_response(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantConfig;
    use crate::mcp::auth::ApiKeyAuth;
    use crate::mcp::catalog::ToolCatalog;
    use crate::session::SessionRegistry;
    use crate::tools::{ToolRegistry, Toolset};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";
    const FS_HOST: &str = "pc.example.org";
    const CMD_HOST: &str = "pc-cmd.example.org";

    fn app() -> Router {
        let sessions = Arc::new(SessionRegistry::new());
        let tools = ToolRegistry::builtin(Arc::clone(&sessions)).unwrap();
        let catalog = ToolCatalog::from_config(
            &[
                TenantConfig {
                    name: "filesystem".into(),
                    host: FS_HOST.into(),
                    toolset: Some(Toolset::Filesystem),
                    tools: None,
                },
                TenantConfig {
                    name: "commander".into(),
                    host: CMD_HOST.into(),
                    toolset: Some(Toolset::ProcessControl),
                    tools: None,
                },
            ],
            &tools,
        )
        .unwrap();
        let gateway = Arc::new(Gateway::new(ApiKeyAuth::new(SECRET), catalog, tools, sessions));
        router(gateway, "/mcp", 1024 * 1024)
    }

    fn post_rpc(host: &str, key: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/mcp?key={}", key))
            .header(header::HOST, host)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn call(name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        })
    }

    #[tokio::test]
    async fn test_bad_key_beats_unknown_host() {
        let response = app()
            .oneshot(post_rpc("unknown.example", "wrong", json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, json!({ "error": "Invalid API Key" }));
    }

    #[tokio::test]
    async fn test_unknown_host_forbidden() {
        for host in ["unknown.example", "pc.example.org.evil.com", "example.org"] {
            let response = app()
                .oneshot(post_rpc(host, SECRET, json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "host {}", host);
        }
    }

    #[tokio::test]
    async fn test_tools_list_per_host() {
        let list = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});

        let fs = json_body(app().oneshot(post_rpc(FS_HOST, SECRET, list.clone())).await.unwrap()).await;
        let fs_names: Vec<&str> = fs["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(fs_names.len(), 12);
        assert!(fs_names.contains(&"read_file"));
        assert!(!fs_names.contains(&"execute_command"));

        let cmd = json_body(
            app()
                .oneshot(post_rpc("PC-CMD.example.org:8765", SECRET, list))
                .await
                .unwrap(),
        )
        .await;
        let cmd_names: Vec<&str> = cmd["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(cmd_names.len(), 12);
        assert!(cmd_names.contains(&"start_process"));
        assert!(!cmd_names.contains(&"read_file"));
    }

    #[tokio::test]
    async fn test_disallowed_call_rejected() {
        let response = app()
            .oneshot(post_rpc(FS_HOST, SECRET, call("execute_command", json!({"command": "echo hi"}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32001);
        assert!(body.get("result").is_none());

        let unknown = json_body(
            app()
                .oneshot(post_rpc(FS_HOST, SECRET, call("format_disk", json!({}))))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(unknown["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_allowed_call_returns_payload() {
        let dir = tempfile::TempDir::new().unwrap();
        let response = app()
            .oneshot(post_rpc(
                FS_HOST,
                SECRET,
                call("create_directory", json!({ "path": dir.path().join("made").display().to_string() })),
            ))
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["result"]["isError"], false);
        assert_eq!(body["result"]["structuredContent"]["success"], true);
        assert!(dir.path().join("made").is_dir());
    }

    #[tokio::test]
    async fn test_tool_failure_is_data() {
        let body = json_body(
            app()
                .oneshot(post_rpc(FS_HOST, SECRET, call("read_file", json!({ "path": "/definitely/missing" }))))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["result"]["isError"], true);
        assert!(body["result"]["structuredContent"]["error"].is_string());
    }

    #[tokio::test]
    async fn test_notifications_and_batches() {
        let note = app()
            .oneshot(post_rpc(
                FS_HOST,
                SECRET,
                json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            ))
            .await
            .unwrap();
        assert_eq!(note.status(), StatusCode::ACCEPTED);

        let batch = app()
            .oneshot(post_rpc(
                FS_HOST,
                SECRET,
                json!([
                    {"jsonrpc": "2.0", "method": "notifications/initialized"},
                    {"jsonrpc": "2.0", "id": 1, "method": "ping"},
                    {"jsonrpc": "2.0", "id": 2, "method": "tools/list"}
                ]),
            ))
            .await
            .unwrap();
        let body = json_body(batch).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_parse_error() {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/mcp?key={}", SECRET))
            .header(header::HOST, FS_HOST)
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_get_on_endpoint_not_allowed() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/mcp")
            .header(header::HOST, FS_HOST)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_health_requires_key() {
        let denied = Request::builder().uri("/health").body(Body::empty()).unwrap();
        assert_eq!(app().oneshot(denied).await.unwrap().status(), StatusCode::UNAUTHORIZED);

        let ok = Request::builder()
            .uri("/health")
            .header("x-api-key", SECRET)
            .body(Body::empty())
            .unwrap();
        let body = json_body(app().oneshot(ok).await.unwrap()).await;
        assert_eq!(body, json!({ "status": "ok", "sessions": 0 }));
    }
}
