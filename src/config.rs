//! Server Configuration
//!
//! TOML file with a default for every field. Lookup order: explicit path,
//! then `<config_dir>/pc-remote/config.toml`, then built-in defaults. The
//! secret may also come from `PC_REMOTE_API_KEY`.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::mcp::streamable_http::HEALTH_PATH;
use crate::session::SessionSettings;
use crate::tools::Toolset;

/// Environment variable holding the shared secret
pub const API_KEY_ENV: &str = "PC_REMOTE_API_KEY";

/// One tenant: the host it answers on and what it may use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    pub host: String,
    /// Grant every tool of a toolset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolset: Option<Toolset>,
    /// Grant individual tools, in addition to `toolset`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Socket address to bind
    pub listen: String,
    /// Path of the MCP endpoint
    pub mcp_path: String,
    /// Shared secret; never logged
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    pub tenants: Vec<TenantConfig>,
    pub sessions: SessionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8765".to_string(),
            mcp_path: "/mcp".to_string(),
            api_key: String::new(),
            max_body_bytes: 4 * 1024 * 1024,
            tenants: vec![
                TenantConfig {
                    name: "filesystem".to_string(),
                    host: "pc.localhost".to_string(),
                    toolset: Some(Toolset::Filesystem),
                    tools: None,
                },
                TenantConfig {
                    name: "commander".to_string(),
                    host: "pc-cmd.localhost".to_string(),
                    toolset: Some(Toolset::ProcessControl),
                    tools: None,
                },
            ],
            sessions: SessionSettings::default(),
        }
    }
}

impl Config {
    /// `<config_dir>/pc-remote/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pc-remote").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given (it must exist), else from the default
    /// location when present, else defaults.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match Self::default_path() {
            Some(default) if default.is_file() => Self::from_file(&default),
            _ => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.is_empty()) {
            debug!("API key taken from {}", API_KEY_ENV);
            self.api_key = key;
        }
    }

    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("listen address '{}': {}", self.listen, e)))
    }

    /// Checks that need no tool registry; tenant tables are validated when
    /// the catalog is built.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        self.listen_addr()?;

        if !self.mcp_path.starts_with('/') || self.mcp_path.len() < 2 {
            return Err(ConfigError::Invalid(format!(
                "mcp_path must be an absolute path, got '{}'",
                self.mcp_path
            )));
        }
        if self.mcp_path == HEALTH_PATH {
            return Err(ConfigError::Invalid(format!("mcp_path must not be {}", HEALTH_PATH)));
        }
        if self.tenants.is_empty() {
            return Err(ConfigError::Invalid("at least one tenant is required".into()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Invalid("sessions.max_sessions must be positive".into()));
        }
        if self.sessions.max_buffer_lines == 0 {
            return Err(ConfigError::Invalid("sessions.max_buffer_lines must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(String),

    #[error("No API key configured (set api_key or PC_REMOTE_API_KEY)")]
    MissingApiKey,

    #[error("Host configured for more than one tenant: {0}")]
    DuplicateHost(String),

    #[error("Duplicate tenant name: {0}")]
    DuplicateTenant(String),

    #[error("Tenant '{tenant}' references unknown tool '{tool}'")]
    UnknownTool { tenant: String, tool: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mcp_path, "/mcp");
        assert_eq!(config.tenants.len(), 2);
        assert_eq!(config.sessions.max_sessions, 32);
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_parse_full_file() {
        let config = Config::from_toml_str(
            r#"
            listen = "0.0.0.0:9000"
            api_key = "s3cret"

            [[tenants]]
            name = "fs"
            host = "pc.example.org"
            toolset = "filesystem"

            [[tenants]]
            name = "ops"
            host = "ops.example.org"
            tools = ["list_sessions", "read_process_output"]

            [sessions]
            max_wait_ms = 5000
            max_buffer_lines = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.tenants[0].toolset, Some(Toolset::Filesystem));
        assert_eq!(config.tenants[1].tools.as_ref().unwrap().len(), 2);
        assert_eq!(config.sessions.max_wait_ms, 5000);
        assert_eq!(config.sessions.max_buffer_lines, 500);
        // Unset nested fields keep their defaults
        assert_eq!(config.sessions.poll_interval_ms, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_process_control_toolset_name() {
        let config = Config::from_toml_str(
            r#"
            [[tenants]]
            name = "cmd"
            host = "cmd.local"
            toolset = "process-control"
            "#,
        )
        .unwrap();
        assert_eq!(config.tenants[0].toolset, Some(Toolset::ProcessControl));
    }

    #[test]
    fn test_env_overrides_key() {
        let mut config = Config::default();
        config.apply_env_with(|k| (k == API_KEY_ENV).then(|| "from-env".to_string()));
        assert_eq!(config.api_key, "from-env");

        config.apply_env_with(|_| Some(String::new()));
        assert_eq!(config.api_key, "from-env");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config {
            api_key: "k".into(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.mcp_path = "mcp".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.mcp_path = "/mcp".into();
        config.listen = "not-an-addr".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.listen = "127.0.0.1:0".into();
        config.sessions.max_buffer_lines = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "api_key = \"file-key\"\nmcp_path = \"/rpc\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.api_key, "file-key");
        assert_eq!(config.mcp_path, "/rpc");

        let missing = Config::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let broken = Config::from_toml_str("listen = [");
        assert!(matches!(broken, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_secret_not_serialized() {
        let config = Config {
            api_key: "s3cret".into(),
            ..Config::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("s3cret"));
    }
}
