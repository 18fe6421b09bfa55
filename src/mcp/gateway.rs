//! Request Gateway
//!
//! Per-call pipeline shared by every transport handler:
//! 1. credential check against the shared secret
//! 2. tenant resolution from the normalized Host header
//! 3. allow-list filtering (`tools/list`) and enforcement (`tools/call`)
//! 4. dispatch to the tool registry

use axum::http::HeaderMap;
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::auth::ApiKeyAuth;
use super::catalog::{normalize_host, Tenant, ToolCatalog};
use super::error::{GatewayError, GatewayResult};
use super::types::{
    InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse, ToolCallParams,
    ToolCallResult, ToolsListResult,
};
use crate::config::{Config, ConfigError};
use crate::session::SessionRegistry;
use crate::tools::ToolRegistry;

pub const SERVER_NAME: &str = "pc-remote";

/// Shared state behind every request handler
pub struct Gateway {
    auth: ApiKeyAuth,
    catalog: ToolCatalog,
    tools: ToolRegistry,
    sessions: Arc<SessionRegistry>,
}

impl Gateway {
    pub fn new(
        auth: ApiKeyAuth,
        catalog: ToolCatalog,
        tools: ToolRegistry,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            auth,
            catalog,
            tools,
            sessions,
        }
    }

    /// Wire the built-in tools to `sessions` and build the tenant catalog.
    pub fn from_config(config: &Config, sessions: Arc<SessionRegistry>) -> Result<Self, ConfigError> {
        config.validate()?;

        let tools = ToolRegistry::builtin(Arc::clone(&sessions))
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let catalog = ToolCatalog::from_config(&config.tenants, &tools)?;

        for tenant in catalog.tenants() {
            info!(
                "Tenant {} on host {} ({} tools)",
                tenant.name(),
                tenant.host(),
                tenant.allowed_count()
            );
        }

        Ok(Self::new(ApiKeyAuth::new(config.api_key.clone()), catalog, tools, sessions))
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn auth_type(&self) -> &'static str {
        self.auth.auth_type()
    }

    /// Credential check only
    pub fn authenticate(&self, query: &HashMap<String, String>, headers: &HeaderMap) -> GatewayResult<()> {
        if self.auth.verify_request(query, headers) {
            Ok(())
        } else {
            warn!("Rejected request: invalid or missing credential");
            Err(GatewayError::Unauthorized)
        }
    }

    /// Authenticate, then resolve the tenant from `host`.
    ///
    /// A bad credential wins over an unknown host.
    pub fn admit(
        &self,
        query: &HashMap<String, String>,
        headers: &HeaderMap,
        host: Option<&str>,
    ) -> GatewayResult<&Tenant> {
        self.authenticate(query, headers)?;

        let host = normalize_host(host.unwrap_or_default());
        match self.catalog.resolve(&host) {
            Some(tenant) => {
                debug!("Host {} -> tenant {}", host, tenant.name());
                Ok(tenant)
            }
            None => {
                warn!("Rejected request for unknown host '{}'", host);
                Err(GatewayError::UnknownTenant(host))
            }
        }
    }

    /// Handle one JSON-RPC message; notifications yield no response.
    pub async fn handle_rpc(&self, tenant: &Tenant, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!("Notification {} from tenant {}", request.method, tenant.name());
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let outcome = self.dispatch(tenant, &request.method, request.params).await;

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => {
                debug!("{} failed for tenant {}: {}", request.method, tenant.name(), e);
                JsonRpcResponse::failure(id, e.to_rpc_error())
            }
        })
    }

    async fn dispatch(&self, tenant: &Tenant, method: &str, params: Option<Value>) -> GatewayResult<Value> {
        match method {
            "initialize" => {
                let params: InitializeParams = match params {
                    Some(p) => serde_json::from_value(p)
                        .map_err(|e| GatewayError::InvalidParams(e.to_string()))?,
                    None => InitializeParams::default(),
                };
                let result = InitializeResult::negotiate(
                    params.protocol_version.as_deref(),
                    SERVER_NAME,
                    Some(format!("Tools for the '{}' tenant of this host.", tenant.name())),
                );
                to_value(&result)
            }
            "ping" => Ok(json!({})),
            "tools/list" => to_value(&self.list_tools(tenant)),
            "tools/call" => {
                let params: ToolCallParams = params
                    .ok_or_else(|| GatewayError::InvalidParams("missing params".into()))
                    .and_then(|p| {
                        serde_json::from_value(p).map_err(|e| GatewayError::InvalidParams(e.to_string()))
                    })?;
                to_value(&self.call_tool(tenant, params).await?)
            }
            other => Err(GatewayError::MethodNotFound(other.to_string())),
        }
    }

    /// Only the tenant's allowed tools are ever listed
    pub fn list_tools(&self, tenant: &Tenant) -> ToolsListResult {
        let tools: Vec<_> = self
            .catalog
            .visible_tools(tenant, &self.tools)
            .into_iter()
            .cloned()
            .collect();
        debug!("Listing {} tools for tenant {}", tools.len(), tenant.name());

        ToolsListResult {
            tools,
            next_cursor: None,
        }
    }

    /// Check the allow-list, then run the tool.
    pub async fn call_tool(&self, tenant: &Tenant, params: ToolCallParams) -> GatewayResult<ToolCallResult> {
        let name = params.name;
        if !self.tools.contains(&name) {
            return Err(GatewayError::UnknownOperation(name));
        }
        if !tenant.allows(&name) {
            warn!("Tenant {} attempted disallowed tool {}", tenant.name(), name);
            return Err(GatewayError::OperationNotPermitted {
                tenant: tenant.name().to_string(),
                operation: name,
            });
        }

        info!("Tenant {} calls {}", tenant.name(), name);
        let payload = self
            .tools
            .invoke(&name, params.arguments.unwrap_or(Value::Null))
            .await
            .ok_or_else(|| GatewayError::UnknownOperation(name.clone()))?;

        Ok(ToolCallResult::from_payload(payload))
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> GatewayResult<Value> {
    serde_json::to_value(value).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
}
