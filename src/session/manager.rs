//! Session Registry
//!
//! Thread-safe directory of live process sessions. One mutex guards the whole
//! map and is held only for insert/lookup/remove, never across process I/O.

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::process::{ProcessSession, SpawnRequest};
use super::state::{SessionInfo, DEFAULT_MAX_BUFFER_LINES};

/// Tunables for the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Maximum number of registered sessions, running or finished
    pub max_sessions: usize,
    /// Interval at which bounded reads re-check the buffer
    pub poll_interval_ms: u64,
    /// Upper clamp for any caller-supplied wait budget
    pub max_wait_ms: u64,
    /// Time between the graceful stop request and the forceful kill
    pub terminate_grace_ms: u64,
    /// Pending lines per session before the child's output stops being read
    pub max_buffer_lines: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 32,
            poll_interval_ms: 100,
            max_wait_ms: 60_000,
            terminate_grace_ms: 2_000,
            max_buffer_lines: DEFAULT_MAX_BUFFER_LINES,
        }
    }
}

impl SessionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Clamp a caller-supplied wait into `[0, max_wait_ms]`.
    pub fn clamp_wait(&self, requested_ms: i64) -> Duration {
        let ms = u64::try_from(requested_ms).unwrap_or(0);
        Duration::from_millis(ms.min(self.max_wait_ms))
    }
}

/// Registry of process sessions keyed by session id
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ProcessSession>>>,
    settings: SessionSettings,
}

impl SessionRegistry {
    /// Create a new registry with default limits
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    /// Create with custom limits
    pub fn with_settings(settings: SessionSettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Insert a session; the id must not already be present.
    ///
    /// A pid-keyed session may take the slot of a finished session with the
    /// same id: the OS reused the pid.
    pub fn register(&self, session: Arc<ProcessSession>) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();

        let replaces_stale = match sessions.get(session.id()) {
            Some(existing) if !session.is_labelled() && !existing.is_running() => true,
            Some(_) => return Err(SessionError::SessionExists(session.id().to_string())),
            None => false,
        };
        if !replaces_stale && sessions.len() >= self.settings.max_sessions {
            return Err(SessionError::MaxSessionsReached(self.settings.max_sessions));
        }

        if replaces_stale {
            info!("Pid {} reused, dropping finished session", session.id());
        }
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    /// Spawn a process and register it.
    ///
    /// Collisions and capacity are checked before spawning; if registration
    /// still loses a race the freshly spawned child is terminated.
    pub fn start(&self, request: SpawnRequest) -> Result<Arc<ProcessSession>, SessionError> {
        {
            let sessions = self.sessions.lock();
            if let Some(label) = &request.label {
                // Bare numbers are reserved for pid-keyed sessions
                if label.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(SessionError::InvalidLabel(label.clone()));
                }
                if sessions.contains_key(label) {
                    return Err(SessionError::SessionExists(label.clone()));
                }
            }
            if sessions.len() >= self.settings.max_sessions {
                return Err(SessionError::MaxSessionsReached(self.settings.max_sessions));
            }
        }

        let session = ProcessSession::spawn(request, &self.settings)?;

        if let Err(e) = self.register(Arc::clone(&session)) {
            warn!("Discarding session {}: {}", session.id(), e);
            session.terminate();
            return Err(e);
        }

        Ok(session)
    }

    /// Get a session by ID
    pub fn get(&self, session_id: &str) -> Result<Arc<ProcessSession>, SessionError> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))
    }

    /// Remove a session; absent ids are ignored.
    pub fn remove(&self, session_id: &str) -> Option<Arc<ProcessSession>> {
        self.sessions.lock().remove(session_id)
    }

    /// Check if a session exists
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Summaries of every registered session, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<ProcessSession>> = self.sessions.lock().values().cloned().collect();

        let mut infos: Vec<SessionInfo> = sessions.iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    /// Terminate and drop every session - for server shutdown.
    /// Returns how many were still running.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<Arc<ProcessSession>> =
            self.sessions.lock().drain().map(|(_, s)| s).collect();

        info!("Shutting down {} sessions", drained.len());
        drained.iter().filter(|session| session.terminate()).count()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Session registry errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Session id must not be a bare number: {0}")]
    InvalidLabel(String),

    #[error("Maximum sessions reached: {0}")]
    MaxSessionsReached(usize),

    #[error("Session is not running: {0}")]
    NotRunning(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SessionError {
    /// Stable machine-readable kind for error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "not_found",
            Self::SessionExists(_) => "duplicate_session",
            Self::InvalidLabel(_) => "invalid_label",
            Self::MaxSessionsReached(_) => "session_limit",
            Self::NotRunning(_) => "not_running",
            Self::Spawn(_) => "spawn",
            Self::IoError(_) => "io",
        }
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::session::process::Shell;
    use crate::session::state::ReadPolicy;

    fn request(command: &str, label: Option<&str>) -> SpawnRequest {
        SpawnRequest {
            command: command.to_string(),
            cwd: std::env::temp_dir(),
            shell: Shell::from_name("sh"),
            label: label.map(str::to_string),
        }
    }

    async fn wait_finished(session: &ProcessSession) {
        for _ in 0..100 {
            if !session.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("session {} did not finish", session.id());
    }

    #[tokio::test]
    async fn test_start_and_get() {
        let registry = SessionRegistry::new();
        let session = registry.start(request("echo hi", None)).unwrap();

        assert!(registry.contains(session.id()));
        let fetched = registry.get(session.id()).unwrap();
        assert!(Arc::ptr_eq(&session, &fetched));
    }

    #[tokio::test]
    async fn test_reused_pid_replaces_finished_session() {
        let registry = SessionRegistry::new();
        let settings = SessionSettings::default();

        let old = ProcessSession::spawn(request("echo old", None), &settings).unwrap();
        wait_finished(&old).await;

        // The finished session still holds the slot the new pid maps to
        let fresh = ProcessSession::spawn(request("sleep 5", None), &settings).unwrap();
        registry
            .sessions
            .lock()
            .insert(fresh.id().to_string(), Arc::clone(&old));

        registry.register(Arc::clone(&fresh)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(fresh.id()).unwrap(), &fresh));
        assert!(fresh.is_running());

        fresh.terminate();
    }

    #[tokio::test]
    async fn test_numeric_label_rejected() {
        let registry = SessionRegistry::new();
        let result = registry.start(request("echo hi", Some("4242")));
        assert!(matches!(result, Err(SessionError::InvalidLabel(_))));
        assert_eq!(result.unwrap_err().kind(), "invalid_label");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_label_collides_with_finished_session() {
        let registry = SessionRegistry::new();
        let first = registry.start(request("echo done", Some("job"))).unwrap();
        wait_finished(&first).await;

        let result = registry.start(request("echo again", Some("job")));
        assert!(matches!(result, Err(SessionError::SessionExists(_))));
        assert!(Arc::ptr_eq(&registry.get("job").unwrap(), &first));
    }

    #[tokio::test]
    async fn test_duplicate_label_keeps_first_session() {
        let registry = SessionRegistry::new();
        let first = registry
            .start(request("echo first; sleep 5", Some("job")))
            .unwrap();

        let result = registry.start(request("echo second", Some("job")));
        assert!(matches!(result, Err(SessionError::SessionExists(_))));

        let still_there = registry.get("job").unwrap();
        assert!(Arc::ptr_eq(&first, &still_there));
        let chunk = still_there
            .read_output(ReadPolicy::default(), Duration::from_millis(1000))
            .await;
        assert_eq!(chunk.lines, vec!["first\n".to_string()]);

        first.terminate();
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let a = registry.start(request("echo from-a", Some("a"))).unwrap();
        let b = registry.start(request("echo from-b", Some("b"))).unwrap();

        let out_b = b.read_output(ReadPolicy::default(), Duration::from_millis(1000)).await;
        let out_a = a.read_output(ReadPolicy::default(), Duration::from_millis(1000)).await;

        assert_eq!(out_a.lines, vec!["from-a\n".to_string()]);
        assert_eq!(out_b.lines, vec!["from-b\n".to_string()]);
    }

    #[tokio::test]
    async fn test_max_sessions() {
        let registry = SessionRegistry::with_settings(SessionSettings {
            max_sessions: 1,
            ..SessionSettings::default()
        });
        let first = registry.start(request("sleep 5", None)).unwrap();

        let result = registry.start(request("sleep 5", None));
        assert!(matches!(result, Err(SessionError::MaxSessionsReached(1))));

        first.terminate();
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = registry.start(request("sleep 5", Some("gone"))).unwrap();
        session.terminate();

        assert!(registry.remove("gone").is_some());
        assert!(registry.remove("gone").is_none());
        assert!(matches!(
            registry.get("gone"),
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_shutdown() {
        let registry = SessionRegistry::new();
        let _ = registry.start(request("sleep 5", Some("one"))).unwrap();
        let _ = registry.start(request("sleep 5", Some("two"))).unwrap();

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.is_running));

        assert_eq!(registry.shutdown_all(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clamp_wait() {
        let settings = SessionSettings::default();
        assert_eq!(settings.clamp_wait(-10), Duration::ZERO);
        assert_eq!(settings.clamp_wait(250), Duration::from_millis(250));
        assert_eq!(settings.clamp_wait(i64::MAX), Duration::from_millis(60_000));

        let unbounded = SessionSettings {
            max_wait_ms: u64::MAX,
            ..SessionSettings::default()
        };
        assert_eq!(unbounded.clamp_wait(-1), Duration::ZERO);
        assert_eq!(unbounded.clamp_wait(i64::MAX), Duration::from_millis(i64::MAX as u64));
    }
}
