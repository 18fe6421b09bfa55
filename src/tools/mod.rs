//! Tool Providers
//!
//! Every remotely invocable operation lives here, grouped into two toolsets:
//! - Filesystem: stateless file and directory handlers
//! - Process control: shell commands, process sessions, git, OS processes
//!
//! Handlers return JSON data on success and a `ToolError` otherwise; the
//! registry turns errors into `{"error": ...}` payloads so a failing tool
//! never aborts the request.

pub mod commander;
pub mod filesystem;
pub mod system;

use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::mcp::types::Tool;
use crate::session::{SessionError, SessionRegistry};

pub use commander::CommanderTools;
pub use filesystem::FilesystemTools;
pub use system::SystemTools;

/// Logical group of tools a tenant can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Toolset {
    Filesystem,
    ProcessControl,
}

impl Toolset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::ProcessControl => "process-control",
        }
    }
}

impl std::fmt::Display for Toolset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of tools sharing one implementation
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Toolset every tool of this provider belongs to
    fn toolset(&self) -> Toolset;

    /// Descriptors of the tools this provider serves
    fn tools(&self) -> Vec<Tool>;

    /// Run one tool. `args` is the raw `arguments` object of the call.
    async fn call(&self, name: &str, args: Value) -> ToolResult<Value>;
}

struct Entry {
    tool: Tool,
    toolset: Toolset,
    provider: Arc<dyn ToolProvider>,
}

/// Name-indexed set of every tool the server can dispatch to
///
/// Built once at startup; immutable afterwards.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider wired to `sessions`
    pub fn builtin(sessions: Arc<SessionRegistry>) -> ToolResult<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(FilesystemTools::new()))?;
        registry.register(Arc::new(CommanderTools::new(sessions)))?;
        registry.register(Arc::new(SystemTools::new()))?;
        Ok(registry)
    }

    /// Add all tools of a provider; a name may only be registered once.
    pub fn register(&mut self, provider: Arc<dyn ToolProvider>) -> ToolResult<()> {
        let toolset = provider.toolset();
        for tool in provider.tools() {
            if self.index.contains_key(&tool.name) {
                return Err(ToolError::DuplicateTool(tool.name));
            }
            self.index.insert(tool.name.clone(), self.entries.len());
            self.entries.push(Entry {
                tool,
                toolset,
                provider: Arc::clone(&provider),
            });
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Names of every tool in `toolset`, in registration order
    pub fn names_in(&self, toolset: Toolset) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.toolset == toolset)
            .map(|e| e.tool.name.clone())
            .collect()
    }

    /// All descriptors, in registration order
    pub fn tools(&self) -> impl Iterator<Item = &Tool> {
        self.entries.iter().map(|e| &e.tool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch a call. Returns `None` for an unknown name; handler errors
    /// come back as an error payload.
    pub async fn invoke(&self, name: &str, args: Value) -> Option<Value> {
        let entry = &self.entries[*self.index.get(name)?];

        debug!("Invoking tool {} ({})", name, entry.toolset);
        let payload = match entry.provider.call(name, args).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                e.to_payload()
            }
        };
        Some(payload)
    }
}

/// Errors raised by tool handlers
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("Tool registered twice: {0}")]
    DuplicateTool(String),
}

impl ToolError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable machine-readable kind for error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Io { .. } => "io",
            Self::Session(e) => e.kind(),
            Self::Spawn(_) => "spawn",
            Self::Timeout(_) => "timeout",
            Self::NotFound(_) => "not_found",
            Self::Failed(_) => "failed",
            Self::DuplicateTool(_) => "duplicate_tool",
        }
    }

    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string(), "kind": self.kind() })
    }
}

/// Result type alias for tool handlers
pub type ToolResult<T> = Result<T, ToolError>;

/// Deserialize a call's arguments; a missing object counts as `{}`.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> ToolResult<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Keep at most `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Run blocking filesystem work off the async executor.
pub async fn blocking<T, F>(f: F) -> ToolResult<T>
where
    F: FnOnce() -> ToolResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Failed(format!("worker task failed: {}", e)))?
}

/// Shorthand for an object input schema
pub(crate) fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub(crate) fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema,
    }
}
