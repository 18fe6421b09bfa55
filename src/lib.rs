//! pc-remote: remote control of one machine over MCP.
//!
//! A shared-secret gateway picks a tenant from the Host header and exposes
//! only that tenant's tools. Long-running commands live in the session
//! engine so a caller can poll their output and feed them input.

pub mod config;
pub mod mcp;
pub mod session;
pub mod tools;
