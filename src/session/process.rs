//! Process Session
//!
//! Owns one spawned child: its stdin, a single background drain task that
//! moves stdout/stderr lines into the pending buffer, and the kill switch.
//! Callers poll the buffer with bounded waits; they never block on the pipes.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Split};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Notify};

use super::manager::{SessionError, SessionResult, SessionSettings};
use super::state::{Lifecycle, OutputBuffer, OutputChunk, ReadPolicy, SessionInfo, SessionStatus};

/// Family of shell a command line is handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// `powershell.exe -Command <line>`
    PowerShell,
    /// `cmd.exe /C <line>`
    Cmd,
    /// `<shell> -c <line>`
    Posix,
}

/// A shell program plus the way it takes an inline command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shell {
    program: String,
    kind: ShellKind,
}

impl Shell {
    /// Classify a shell by its file stem (`powershell.exe`, `/bin/bash`, ...).
    pub fn from_name(name: &str) -> Self {
        let stem = Path::new(name.trim())
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let kind = match stem.as_str() {
            "powershell" | "pwsh" => ShellKind::PowerShell,
            "cmd" => ShellKind::Cmd,
            _ => ShellKind::Posix,
        };

        Self {
            program: name.trim().to_string(),
            kind,
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::from_name("powershell.exe")
        } else {
            Self::from_name("sh")
        }
    }

    /// Use the named shell, or the platform default when absent/blank.
    pub fn resolve(name: Option<&str>) -> Self {
        match name {
            Some(n) if !n.trim().is_empty() => Self::from_name(n),
            _ => Self::platform_default(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn kind(&self) -> ShellKind {
        self.kind
    }

    /// Build a command running `line` through this shell.
    ///
    /// Fails with `Spawn` when the shell program is not on PATH.
    pub fn command(&self, line: &str) -> SessionResult<Command> {
        let program = which::which(&self.program)
            .map_err(|e| SessionError::Spawn(format!("shell '{}' not found: {}", self.program, e)))?;

        let mut cmd = Command::new(program);
        match self.kind {
            ShellKind::PowerShell => cmd.arg("-NoProfile").arg("-Command").arg(line),
            ShellKind::Cmd => cmd.arg("/C").arg(line),
            ShellKind::Posix => cmd.arg("-c").arg(line),
        };
        Ok(cmd)
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)
    }
}

/// Everything needed to start a session
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub shell: Shell,
    /// Caller-chosen identifier; the pid is used when absent
    pub label: Option<String>,
}

/// One remotely controlled child process
pub struct ProcessSession {
    id: String,
    pid: Option<u32>,
    command: String,
    shell: Shell,
    cwd: PathBuf,
    started_at: DateTime<Utc>,
    started: Instant,
    poll_interval: Duration,
    labelled: bool,
    lifecycle: Mutex<Lifecycle>,
    output: Mutex<OutputBuffer>,
    output_ready: Notify,
    /// Signalled when a consuming read frees buffer space
    buffer_room: Notify,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessSession {
    /// Spawn the child and attach its drain task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(request: SpawnRequest, settings: &SessionSettings) -> SessionResult<Arc<Self>> {
        let mut cmd = request.shell.command(&request.command)?;
        cmd.current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so terminate reaches grandchildren started by the shell
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SessionError::Spawn(format!("{}: {}", request.command, e)))?;

        let pid = child.id();
        let labelled = request.label.is_some();
        let id = match request.label {
            Some(label) => label,
            None => pid
                .map(|p| p.to_string())
                .ok_or_else(|| SessionError::Spawn("process exited before it got a pid".into()))?,
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
        let stderr = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
        let (kill_tx, kill_rx) = oneshot::channel();

        let session = Arc::new(Self {
            id,
            pid,
            command: request.command,
            shell: request.shell,
            cwd: request.cwd,
            started_at: Utc::now(),
            started: Instant::now(),
            poll_interval: settings.poll_interval(),
            labelled,
            lifecycle: Mutex::new(Lifecycle::default()),
            output: Mutex::new(OutputBuffer::with_max_lines(settings.max_buffer_lines)),
            output_ready: Notify::new(),
            buffer_room: Notify::new(),
            stdin: tokio::sync::Mutex::new(stdin),
            kill_tx: Mutex::new(Some(kill_tx)),
        });

        session.lifecycle.lock().mark_running();
        tokio::spawn(drain_output(
            Arc::clone(&session),
            child,
            stdout,
            stderr,
            kill_rx,
            settings.terminate_grace(),
        ));

        info!(
            "Started session {} (pid {:?}): {}",
            session.id, session.pid, session.command
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    /// Whether the id was chosen by the caller rather than taken from the pid
    pub fn is_labelled(&self) -> bool {
        self.labelled
    }

    pub fn status(&self) -> SessionStatus {
        self.lifecycle.lock().status
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().is_running()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.lifecycle.lock().exit_code
    }

    fn has_pending(&self) -> bool {
        !self.output.lock().is_empty()
    }

    fn buffer_full(&self) -> bool {
        self.output.lock().is_full()
    }

    /// Wait up to `wait` for output or exit, then read according to `policy`.
    ///
    /// Returns immediately when output is already pending or the child is gone.
    pub async fn read_output(&self, policy: ReadPolicy, wait: Duration) -> OutputChunk {
        let deadline = Instant::now() + wait;

        loop {
            // Registered before the check so a concurrent append cannot be missed
            let notified = self.output_ready.notified();

            if self.has_pending() || !self.is_running() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }

        // Give the drain task a turn to observe an end-of-stream that is
        // already queued behind the last line
        tokio::task::yield_now().await;

        // Read the flag first: once it is false every line is already buffered
        let still_running = self.is_running();
        let chunk = {
            let mut output = self.output.lock();
            let lines = output.read(policy);
            OutputChunk {
                lines,
                still_running,
                pending_lines: output.pending_len(),
                total_lines: output.total_lines(),
            }
        };

        if matches!(policy, ReadPolicy::Consume { .. }) && !chunk.lines.is_empty() {
            self.buffer_room.notify_one();
        }
        chunk
    }

    /// Write `text` plus a newline to the child's stdin.
    pub async fn send_input(&self, text: &str) -> SessionResult<()> {
        if !self.is_running() {
            return Err(SessionError::NotRunning(self.id.clone()));
        }

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| SessionError::NotRunning(self.id.clone()))?;

        let payload = format!("{}\n", text);
        let written = match stdin.write_all(payload.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                debug!("Sent {} bytes to session {}", payload.len(), self.id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                guard.take();
                Err(SessionError::NotRunning(self.id.clone()))
            }
            Err(e) => Err(SessionError::IoError(e)),
        }
    }

    /// Mark the session terminated and ask the drain task to stop the child.
    ///
    /// Does not wait for the child to exit. Returns false when the session had
    /// already terminated; the state is left as it was.
    pub fn terminate(&self) -> bool {
        let changed = {
            let mut lifecycle = self.lifecycle.lock();
            let changed = lifecycle.mark_terminated();
            if changed {
                lifecycle.killed = true;
            }
            changed
        };

        // A child can outlive its pipes, so the kill switch fires even after
        // end-of-stream already marked the session terminated
        if let Some(tx) = self.kill_tx.lock().take() {
            let _ = tx.send(());
        }
        if !changed {
            return false;
        }
        self.output_ready.notify_waiters();

        info!("Terminating session {}", self.id);
        true
    }

    fn append_line(&self, segment: Vec<u8>) {
        let mut line = String::from_utf8_lossy(&segment).into_owned();
        line.push('\n');

        self.output.lock().push(line);
        self.output_ready.notify_waiters();
    }

    /// Both streams hit end-of-stream: no more output can arrive.
    fn close_output(&self) {
        self.lifecycle.lock().mark_terminated();
        self.output_ready.notify_waiters();
        debug!("Session {} output closed", self.id);
    }

    fn finish(&self, status: Option<ExitStatus>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.mark_terminated();
            lifecycle.exit_code = status.and_then(|s| s.code());
        }
        self.output_ready.notify_waiters();
        debug!("Session {} finished with {:?}", self.id, status);
    }

    pub fn info(&self) -> SessionInfo {
        let (status, exit_code, killed) = {
            let lifecycle = self.lifecycle.lock();
            (lifecycle.status, lifecycle.exit_code, lifecycle.killed)
        };
        let (buffer_lines, total_lines) = {
            let output = self.output.lock();
            (output.pending_len(), output.total_lines())
        };
        let runtime = self.started.elapsed().as_secs_f64();

        SessionInfo {
            session_id: self.id.clone(),
            pid: self.pid,
            command: self.command.chars().take(100).collect(),
            shell: self.shell.to_string(),
            cwd: self.cwd.display().to_string(),
            status,
            is_running: status != SessionStatus::Terminated,
            exit_code,
            killed,
            started_at: self.started_at.to_rfc3339(),
            runtime_seconds: (runtime * 10.0).round() / 10.0,
            buffer_lines,
            total_lines,
        }
    }
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("status", &self.status())
            .finish()
    }
}

type LineReader<R> = Option<Split<BufReader<R>>>;

async fn next_segment<R>(reader: &mut LineReader<R>) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(split) => split.next_segment().await,
        None => std::future::pending().await,
    }
}

/// Drain loop: the only writer to the session buffer and the only owner of
/// the child handle. Exit is detected here, never caused, unless the kill
/// switch fires.
async fn drain_output<O, E>(
    session: Arc<ProcessSession>,
    mut child: Child,
    mut stdout: LineReader<O>,
    mut stderr: LineReader<E>,
    kill_rx: oneshot::Receiver<()>,
    grace: Duration,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    // A dropped sender means nobody can ask for a kill any more
    let kill_signal = async {
        if kill_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(kill_signal);

    let mut killed = false;
    while stdout.is_some() || stderr.is_some() {
        if session.buffer_full() {
            // Leave the pipes unread; the child blocks on write until a reader
            // consumes, so nothing is dropped
            tokio::select! {
                _ = session.buffer_room.notified() => continue,
                _ = &mut kill_signal => {
                    killed = true;
                    break;
                }
            }
        }

        tokio::select! {
            segment = next_segment(&mut stdout), if stdout.is_some() => match segment {
                Ok(Some(bytes)) => session.append_line(bytes),
                Ok(None) => stdout = None,
                Err(e) => {
                    warn!("stdout read failed for session {}: {}", session.id, e);
                    stdout = None;
                }
            },
            segment = next_segment(&mut stderr), if stderr.is_some() => match segment {
                Ok(Some(bytes)) => session.append_line(bytes),
                Ok(None) => stderr = None,
                Err(e) => {
                    warn!("stderr read failed for session {}: {}", session.id, e);
                    stderr = None;
                }
            },
            _ = &mut kill_signal => {
                killed = true;
                break;
            }
        }
    }

    let status = if killed {
        stop_child(&mut child, grace).await
    } else {
        session.close_output();
        // Pipes closed; the child may still be alive
        tokio::select! {
            status = child.wait() => status.ok(),
            _ = &mut kill_signal => stop_child(&mut child, grace).await,
        }
    };

    session.finish(status);
}

/// Graceful stop, then a forceful kill once `grace` has elapsed.
async fn stop_child(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    request_stop(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => {
            warn!("Force killing process {:?}", child.id());
            force_kill(child);
            if let Err(e) = child.kill().await {
                debug!("kill after grace period failed: {}", e);
            }
            child.wait().await.ok()
        }
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    // pid 0 would address our own process group
    if pid <= 0 {
        return;
    }
    // SAFETY: plain signal delivery to a process group we created
    let delivered = unsafe { libc::killpg(pid, libc::SIGTERM) == 0 };
    if !delivered {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn force_kill(child: &mut Child) {
    if let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) {
        if pid > 0 {
            // SAFETY: see request_stop
            unsafe {
                libc::killpg(pid, libc::SIGKILL);
            }
        }
    }
}

#[cfg(not(unix))]
fn force_kill(_child: &mut Child) {}
