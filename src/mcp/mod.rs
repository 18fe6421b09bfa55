//! MCP (Model Context Protocol) Module
//!
//! Host-routed MCP server:
//! - Streamable HTTP transport (stateless, JSON responses)
//! - Shared-secret authentication (query key, X-API-Key or Bearer)
//! - Tenant selection from the Host header
//! - Per-tenant tool allow-lists

pub mod auth;
pub mod catalog;
pub mod error;
pub mod gateway;
pub mod streamable_http;
pub mod types;

pub use auth::ApiKeyAuth;
pub use catalog::{normalize_host, Tenant, ToolCatalog};
pub use error::{GatewayError, GatewayResult};
pub use gateway::Gateway;
pub use streamable_http::{router, serve};
pub use types::*;
