//! Tenant Catalog
//!
//! Static mapping from a normalized Host header to the tenant it selects and
//! the tools that tenant may see and call. Built once from configuration.

use std::collections::{HashMap, HashSet};

use crate::config::{ConfigError, TenantConfig};
use crate::mcp::types::Tool;
use crate::tools::ToolRegistry;

/// A named caller class bound to one host and an allow-list
#[derive(Debug, Clone)]
pub struct Tenant {
    name: String,
    host: String,
    allowed: HashSet<String>,
}

impl Tenant {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized host this tenant answers on
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.allowed.contains(operation)
    }

    pub fn allowed_count(&self) -> usize {
        self.allowed.len()
    }
}

/// Host-indexed tenant table
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    by_host: HashMap<String, Tenant>,
}

impl ToolCatalog {
    /// Build and validate the catalog.
    ///
    /// Every allowed name must be a registered tool; hosts and names must be
    /// unique after normalization.
    pub fn from_config(tenants: &[TenantConfig], registry: &ToolRegistry) -> Result<Self, ConfigError> {
        let mut by_host = HashMap::new();
        let mut names = HashSet::new();

        for config in tenants {
            let name = config.name.trim();
            if name.is_empty() {
                return Err(ConfigError::Invalid("tenant name must not be empty".into()));
            }
            if !names.insert(name.to_string()) {
                return Err(ConfigError::DuplicateTenant(name.to_string()));
            }

            let host = normalize_host(&config.host);
            if host.is_empty() {
                return Err(ConfigError::Invalid(format!("tenant '{}' has an empty host", name)));
            }

            let mut allowed: HashSet<String> = HashSet::new();
            if let Some(toolset) = config.toolset {
                allowed.extend(registry.names_in(toolset));
            }
            for tool in config.tools.iter().flatten() {
                if !registry.contains(tool) {
                    return Err(ConfigError::UnknownTool {
                        tenant: name.to_string(),
                        tool: tool.clone(),
                    });
                }
                allowed.insert(tool.clone());
            }
            if allowed.is_empty() {
                return Err(ConfigError::Invalid(format!("tenant '{}' allows no tools", name)));
            }

            let tenant = Tenant {
                name: name.to_string(),
                host: host.clone(),
                allowed,
            };
            if by_host.insert(host.clone(), tenant).is_some() {
                return Err(ConfigError::DuplicateHost(host));
            }
        }

        Ok(Self { by_host })
    }

    /// Exact lookup of an already normalized host
    pub fn resolve(&self, normalized_host: &str) -> Option<&Tenant> {
        self.by_host.get(normalized_host)
    }

    /// The tenant's tools, in registry order
    pub fn visible_tools<'a>(&self, tenant: &Tenant, registry: &'a ToolRegistry) -> Vec<&'a Tool> {
        registry.tools().filter(|t| tenant.allows(&t.name)).collect()
    }

    pub fn tenants(&self) -> impl Iterator<Item = &Tenant> {
        self.by_host.values()
    }

    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

/// Trim, drop any port and lowercase a Host header value.
///
/// Bracketed IPv6 literals keep their brackets; a bare IPv6 address (more
/// than one colon) is left intact.
pub fn normalize_host(raw: &str) -> String {
    let host = raw.trim();

    let without_port = if host.starts_with('[') {
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else if host.matches(':').count() == 1 {
        host.split(':').next().unwrap_or(host)
    } else {
        host
    };

    without_port.to_ascii_lowercase()
}
