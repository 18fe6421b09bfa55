//! System Tools
//!
//! OS process table and host metrics through `sysinfo`.

use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use sysinfo::{Disks, Pid, ProcessesToUpdate, System};

use super::{blocking, object_schema, parse_args, tool, ToolError, ToolProvider, ToolResult, Toolset};
use crate::mcp::types::Tool;

const MAX_PROCESS_ROWS: usize = 100;

/// Process listing, killing and host information
#[derive(Debug, Default)]
pub struct SystemTools;

impl SystemTools {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolProvider for SystemTools {
    fn toolset(&self) -> Toolset {
        Toolset::ProcessControl
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            tool(
                "list_processes",
                "List OS processes, optionally filtered by a name substring.",
                object_schema(
                    json!({ "filter_name": { "type": "string", "default": "" } }),
                    &[],
                ),
            ),
            tool(
                "kill_process",
                "Kill a process by pid, or every process with the given name.",
                object_schema(
                    json!({ "name_or_pid": { "type": ["string", "integer"] } }),
                    &["name_or_pid"],
                ),
            ),
            tool(
                "get_system_info",
                "Report OS, host and resource usage.",
                object_schema(json!({}), &[]),
            ),
        ]
    }

    async fn call(&self, name: &str, args: Value) -> ToolResult<Value> {
        match name {
            "list_processes" => {
                let args: ListArgs = parse_args(args)?;
                blocking(move || Ok(list_processes(&args.filter_name))).await
            }
            "kill_process" => {
                let args: KillArgs = parse_args(args)?;
                blocking(move || kill_process(&args.name_or_pid.into_string())).await
            }
            "get_system_info" => get_system_info().await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default)]
    filter_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Target {
    Text(String),
    Number(u64),
}

impl Target {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KillArgs {
    name_or_pid: Target,
}

fn process_table() -> System {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    sys
}

fn list_processes(filter: &str) -> Value {
    let sys = process_table();
    let filter = filter.to_lowercase();

    let mut rows: Vec<(u32, String, u64, f32)> = sys
        .processes()
        .iter()
        .map(|(pid, proc)| {
            (
                pid.as_u32(),
                proc.name().to_string_lossy().to_string(),
                proc.memory(),
                proc.cpu_usage(),
            )
        })
        .filter(|(_, name, _, _)| filter.is_empty() || name.to_lowercase().contains(&filter))
        .collect();
    rows.sort_by_key(|row| row.0);

    let total = rows.len();
    let processes: Vec<Value> = rows
        .into_iter()
        .take(MAX_PROCESS_ROWS)
        .map(|(pid, name, memory, cpu)| {
            json!({ "pid": pid, "name": name, "memory_bytes": memory, "cpu_percent": cpu })
        })
        .collect();

    json!({
        "success": true,
        "count": processes.len(),
        "truncated": total > MAX_PROCESS_ROWS,
        "processes": processes,
    })
}

fn kill_process(target: &str) -> ToolResult<Value> {
    if target.is_empty() {
        return Err(ToolError::InvalidArguments("name_or_pid must not be empty".into()));
    }

    let sys = process_table();
    let own_pid = std::process::id();

    let matches: Vec<(Pid, String)> = match target.parse::<u32>() {
        Ok(pid) => sys
            .process(Pid::from_u32(pid))
            .map(|p| vec![(Pid::from_u32(pid), p.name().to_string_lossy().to_string())])
            .unwrap_or_default(),
        Err(_) => {
            let wanted = target.to_lowercase();
            sys.processes()
                .iter()
                .filter(|(_, p)| p.name().to_string_lossy().to_lowercase() == wanted)
                .map(|(pid, p)| (*pid, p.name().to_string_lossy().to_string()))
                .collect()
        }
    };

    if matches.is_empty() {
        return Err(ToolError::NotFound(format!("no process matches '{}'", target)));
    }

    let mut killed = Vec::new();
    let mut failed = Vec::new();
    for (pid, name) in matches {
        if pid.as_u32() == own_pid {
            warn!("Refusing to kill the server process ({})", pid);
            failed.push(json!({ "pid": pid.as_u32(), "name": name, "error": "server process" }));
            continue;
        }
        match sys.process(pid) {
            Some(proc) if proc.kill() => {
                info!("Killed process {} ({})", pid, name);
                killed.push(json!({ "pid": pid.as_u32(), "name": name }));
            }
            _ => failed.push(json!({ "pid": pid.as_u32(), "name": name, "error": "kill failed" })),
        }
    }

    if killed.is_empty() {
        return Ok(json!({
            "success": false,
            "error": format!("could not kill any process matching '{}'", target),
            "killed": killed,
            "failed": failed,
        }));
    }
    Ok(json!({ "success": true, "killed": killed, "failed": failed }))
}

/// Usage percentage of the disk holding `path`
fn disk_percent(path: &Path) -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())?;

    let total = disk.total_space();
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(disk.available_space());
    Some(round1(used as f64 * 100.0 / total as f64))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

async fn get_system_info() -> ToolResult<Value> {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    // CPU usage is a delta between two refreshes
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

    blocking(move || {
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let home = dirs::home_dir();
        let cwd = std::env::current_dir().ok();
        let memory_percent = match sys.total_memory() {
            0 => None,
            total => Some(round1(sys.used_memory() as f64 * 100.0 / total as f64)),
        };
        let disk_root = home.clone().unwrap_or_else(|| Path::new("/").to_path_buf());

        Ok(json!({
            "success": true,
            "os": System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            "os_version": System::os_version(),
            "kernel_version": System::kernel_version(),
            "hostname": System::host_name(),
            "architecture": std::env::consts::ARCH,
            "home": home.map(|p| p.display().to_string()),
            "cwd": cwd.map(|p| p.display().to_string()),
            "cpu_count": sys.cpus().len(),
            "cpu_percent": round1(sys.global_cpu_usage() as f64),
            "memory_percent": memory_percent,
            "disk_percent": disk_percent(&disk_root),
        }))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_processes_includes_self() {
        let own = std::process::id();
        let sys = process_table();
        let own_name = sys
            .process(Pid::from_u32(own))
            .unwrap()
            .name()
            .to_string_lossy()
            .to_string();

        let out = SystemTools::new()
            .call("list_processes", json!({ "filter_name": own_name }))
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        let pids: Vec<u64> = out["processes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["pid"].as_u64().unwrap())
            .collect();
        assert!(pids.contains(&(own as u64)));
    }

    #[tokio::test]
    async fn test_kill_process_refuses_server() {
        let own = std::process::id();
        let out = SystemTools::new()
            .call("kill_process", json!({ "name_or_pid": own }))
            .await
            .unwrap();
        assert_eq!(out["success"], false);
        assert!(out["error"].is_string());
        assert_eq!(out["failed"][0]["pid"], own);

        // Reported to MCP clients as a failed call
        let result = crate::mcp::ToolCallResult::from_payload(out);
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_kill_unknown_name() {
        let err = SystemTools::new()
            .call("kill_process", json!({ "name_or_pid": "no-such-process-xyz" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_system_info_fields() {
        let info = SystemTools::new().call("get_system_info", Value::Null).await.unwrap();
        assert_eq!(info["architecture"], std::env::consts::ARCH);
        assert!(info["os"].is_string());
        assert!(info["cpu_percent"].is_number());
    }
}
