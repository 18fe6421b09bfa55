//! Commander Tools
//!
//! Shell commands, long-lived process sessions and git helpers.
//! One-shot commands are spawned with kill-on-drop so an expired timeout
//! actually stops the child.

use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use super::{
    expand_path, object_schema, parse_args, tool, truncate_chars, ToolError, ToolProvider,
    ToolResult, Toolset,
};
use crate::mcp::types::Tool;
use crate::session::{ReadPolicy, SessionRegistry, Shell, SpawnRequest};

const STDOUT_MAX_CHARS: usize = 50_000;
const STDERR_MAX_CHARS: usize = 10_000;
const GIT_TIMEOUT_SECS: u64 = 60;
const GIT_PUSH_STEP_TIMEOUT_SECS: u64 = 120;

/// Handlers for the process-control toolset backed by a session registry
pub struct CommanderTools {
    sessions: Arc<SessionRegistry>,
}

impl CommanderTools {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    async fn execute_command(&self, args: ExecuteArgs) -> ToolResult<Value> {
        let shell = Shell::resolve(args.shell.as_deref());
        let mut cmd = shell.command(&args.command)?;
        cmd.current_dir(expand_path(&args.cwd));

        info!("execute_command via {}: {}", shell, args.command);
        let output = run_to_completion(cmd, args.timeout).await?;
        Ok(output_payload(&output))
    }

    fn start_process(&self, args: StartArgs) -> ToolResult<Value> {
        let request = SpawnRequest {
            command: args.command,
            cwd: expand_path(&args.cwd),
            shell: Shell::resolve(args.shell.as_deref()),
            label: args.session_id.filter(|s| !s.trim().is_empty()),
        };
        let session = self.sessions.start(request)?;

        Ok(json!({
            "success": true,
            "session_id": session.id(),
            "pid": session.pid(),
            "command": session.command(),
            "shell": session.shell().to_string(),
            "is_running": session.is_running(),
        }))
    }

    async fn read_process_output(&self, args: ReadArgs) -> ToolResult<Value> {
        let id = args.session_id.into_string();
        let session = self.sessions.get(&id)?;
        let wait = self.sessions.settings().clamp_wait(args.timeout_ms);

        let chunk = session
            .read_output(ReadPolicy::from_offset(args.offset, args.length), wait)
            .await;

        Ok(json!({
            "success": true,
            "session_id": id,
            "pid": session.pid(),
            "output": truncate_chars(&chunk.text(), STDOUT_MAX_CHARS),
            "lines_read": chunk.lines.len(),
            "is_running": chunk.still_running,
            "pending_lines": chunk.pending_lines,
            "total_lines": chunk.total_lines,
        }))
    }

    async fn interact_with_process(&self, args: InteractArgs) -> ToolResult<Value> {
        let id = args.session_id.into_string();
        let session = self.sessions.get(&id)?;
        session.send_input(&args.input_text).await?;

        let wait = self.sessions.settings().clamp_wait(args.timeout_ms);
        let chunk = session.read_output(ReadPolicy::consume_all(), wait).await;

        Ok(json!({
            "success": true,
            "session_id": id,
            "pid": session.pid(),
            "output": truncate_chars(&chunk.text(), STDOUT_MAX_CHARS),
            "is_running": chunk.still_running,
        }))
    }

    fn force_terminate(&self, args: SessionArgs) -> ToolResult<Value> {
        let id = args.session_id.into_string();
        let session = self.sessions.get(&id)?;

        session.terminate();
        self.sessions.remove(&id);

        Ok(json!({
            "success": true,
            "session_id": id,
            "pid": session.pid(),
            "status": "terminated",
        }))
    }

    fn list_sessions(&self) -> Value {
        let sessions = self.sessions.list();
        json!({ "success": true, "count": sessions.len(), "sessions": sessions })
    }

    async fn run_python(&self, args: PythonArgs) -> ToolResult<Value> {
        let python = which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|e| ToolError::Spawn(format!("python interpreter not found: {}", e)))?;

        let mut cmd = Command::new(python);
        cmd.arg("-c").arg(&args.script).current_dir(expand_path(&args.cwd));

        let output = run_to_completion(cmd, args.timeout).await?;
        Ok(output_payload(&output))
    }

    async fn git_command(&self, args: GitArgs) -> ToolResult<Value> {
        let git_args = shlex::split(&args.command)
            .ok_or_else(|| ToolError::InvalidArguments("command has unbalanced quotes".into()))?;

        let output = run_git(&expand_path(&args.repo_path), &git_args, GIT_TIMEOUT_SECS).await?;
        Ok(output_payload(&output))
    }

    async fn git_push(&self, args: GitPushArgs) -> ToolResult<Value> {
        let repo = expand_path(&args.repo_path);
        let steps: [Vec<String>; 3] = [
            vec!["add".into(), ".".into()],
            vec!["commit".into(), "-m".into(), args.message.clone()],
            vec!["push".into()],
        ];

        let mut results = Vec::with_capacity(steps.len());
        for step in &steps {
            let output = run_git(&repo, step, GIT_PUSH_STEP_TIMEOUT_SECS).await?;
            let mut entry = output_payload(&output);
            entry["command"] = json!(step.join(" "));
            results.push(entry);
        }

        let ok = results.iter().all(|r| r["returncode"] == 0);
        Ok(json!({ "success": true, "all_succeeded": ok, "results": results }))
    }
}

#[async_trait]
impl ToolProvider for CommanderTools {
    fn toolset(&self) -> Toolset {
        Toolset::ProcessControl
    }

    fn tools(&self) -> Vec<Tool> {
        let session_ref = json!({
            "type": ["string", "integer"],
            "description": "Session id returned by start_process (alias: pid)"
        });

        vec![
            tool(
                "execute_command",
                "Run a shell command and wait for it to finish.",
                object_schema(
                    json!({
                        "command": { "type": "string" },
                        "cwd": { "type": "string", "default": "~" },
                        "timeout": { "type": "integer", "default": 60, "description": "Seconds" },
                        "shell": { "type": "string", "description": "powershell, cmd, sh, bash, ..." }
                    }),
                    &["command"],
                ),
            ),
            tool(
                "start_process",
                "Start a long-running process session and return immediately.",
                object_schema(
                    json!({
                        "command": { "type": "string" },
                        "cwd": { "type": "string", "default": "~" },
                        "shell": { "type": "string" },
                        "session_id": { "type": "string", "description": "Optional caller-chosen id" }
                    }),
                    &["command"],
                ),
            ),
            tool(
                "read_process_output",
                "Read buffered output of a session, waiting up to timeout_ms for new lines.",
                object_schema(
                    json!({
                        "session_id": session_ref,
                        "timeout_ms": { "type": "integer", "default": 5000 },
                        "offset": { "type": "integer", "default": 0, "description": "0 consumes, negative tails, positive peeks" },
                        "length": { "type": "integer", "default": 1000 }
                    }),
                    &["session_id"],
                ),
            ),
            tool(
                "interact_with_process",
                "Send a line of input to a session and collect the response.",
                object_schema(
                    json!({
                        "session_id": session_ref,
                        "input_text": { "type": "string" },
                        "timeout_ms": { "type": "integer", "default": 8000 }
                    }),
                    &["session_id", "input_text"],
                ),
            ),
            tool(
                "force_terminate",
                "Terminate a session and forget it.",
                object_schema(json!({ "session_id": session_ref }), &["session_id"]),
            ),
            tool(
                "list_sessions",
                "List process sessions with their status.",
                object_schema(json!({}), &[]),
            ),
            tool(
                "run_python",
                "Run a Python script with the host interpreter.",
                object_schema(
                    json!({
                        "script": { "type": "string" },
                        "cwd": { "type": "string", "default": "~" },
                        "timeout": { "type": "integer", "default": 120, "description": "Seconds" }
                    }),
                    &["script"],
                ),
            ),
            tool(
                "git_command",
                "Run `git <command>` inside a repository.",
                object_schema(
                    json!({
                        "repo_path": { "type": "string" },
                        "command": { "type": "string" }
                    }),
                    &["repo_path", "command"],
                ),
            ),
            tool(
                "git_push",
                "Stage everything, commit and push.",
                object_schema(
                    json!({
                        "repo_path": { "type": "string" },
                        "message": { "type": "string", "default": "auto sync" }
                    }),
                    &["repo_path"],
                ),
            ),
        ]
    }

    async fn call(&self, name: &str, args: Value) -> ToolResult<Value> {
        match name {
            "execute_command" => self.execute_command(parse_args(args)?).await,
            "start_process" => self.start_process(parse_args(args)?),
            "read_process_output" => self.read_process_output(parse_args(args)?).await,
            "interact_with_process" => self.interact_with_process(parse_args(args)?).await,
            "force_terminate" => self.force_terminate(parse_args(args)?),
            "list_sessions" => Ok(self.list_sessions()),
            "run_python" => self.run_python(parse_args(args)?).await,
            "git_command" => self.git_command(parse_args(args)?).await,
            "git_push" => self.git_push(parse_args(args)?).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

/// A session reference given either as the id string or as a bare pid
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SessionKey {
    Text(String),
    Number(u64),
}

impl SessionKey {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

fn default_home() -> String {
    "~".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_python_timeout() -> u64 {
    120
}

fn default_read_timeout_ms() -> i64 {
    5000
}

fn default_interact_timeout_ms() -> i64 {
    8000
}

fn default_read_length() -> usize {
    1000
}

fn default_commit_message() -> String {
    "auto sync".to_string()
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    command: String,
    #[serde(default = "default_home")]
    cwd: String,
    /// Seconds
    #[serde(default = "default_command_timeout")]
    timeout: u64,
    shell: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartArgs {
    command: String,
    #[serde(default = "default_home")]
    cwd: String,
    shell: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    #[serde(alias = "pid")]
    session_id: SessionKey,
    #[serde(default = "default_read_timeout_ms")]
    timeout_ms: i64,
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_read_length")]
    length: usize,
}

#[derive(Debug, Deserialize)]
struct InteractArgs {
    #[serde(alias = "pid")]
    session_id: SessionKey,
    input_text: String,
    #[serde(default = "default_interact_timeout_ms")]
    timeout_ms: i64,
}

#[derive(Debug, Deserialize)]
struct SessionArgs {
    #[serde(alias = "pid")]
    session_id: SessionKey,
}

#[derive(Debug, Deserialize)]
struct PythonArgs {
    script: String,
    #[serde(default = "default_home")]
    cwd: String,
    #[serde(default = "default_python_timeout")]
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct GitArgs {
    repo_path: String,
    command: String,
}

#[derive(Debug, Deserialize)]
struct GitPushArgs {
    repo_path: String,
    #[serde(default = "default_commit_message")]
    message: String,
}

/// Spawn `cmd`, wait for it to exit and collect its output.
///
/// The child is killed when `timeout_secs` elapses first.
async fn run_to_completion(mut cmd: Command, timeout_secs: u64) -> ToolResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| ToolError::Spawn(e.to_string()))?;

    tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout(timeout_secs))?
        .map_err(|e| ToolError::io("waiting for command", e))
}

async fn run_git(repo: &Path, args: &[String], timeout_secs: u64) -> ToolResult<Output> {
    let git = which::which("git").map_err(|e| ToolError::Spawn(format!("git not found: {}", e)))?;

    let mut cmd = Command::new(git);
    cmd.args(args).current_dir(repo);
    run_to_completion(cmd, timeout_secs).await
}

fn output_payload(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    json!({
        "success": true,
        "stdout": truncate_chars(&stdout, STDOUT_MAX_CHARS),
        "stderr": truncate_chars(&stderr, STDERR_MAX_CHARS),
        "returncode": output.status.code().unwrap_or(-1),
    })
}
