//! Session State
//!
//! Lifecycle status, the pending-output buffer and the serializable summary
//! of a single process session.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Status of a process session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Child spawned, drain task not yet attached
    Starting,
    /// Child is alive and its output is being drained
    Running,
    /// Child exited or was force-terminated (absorbing)
    Terminated,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Starting
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Mutable lifecycle facts of a session, guarded together
#[derive(Debug, Default)]
pub struct Lifecycle {
    pub status: SessionStatus,
    /// Exit code once the drain task has reaped the child
    pub exit_code: Option<i32>,
    /// Whether the session ended through `terminate()`
    pub killed: bool,
}

impl Lifecycle {
    /// Starting and Running both count as live for readers.
    pub fn is_running(&self) -> bool {
        self.status != SessionStatus::Terminated
    }

    pub fn mark_running(&mut self) {
        if self.status == SessionStatus::Starting {
            self.status = SessionStatus::Running;
        }
    }

    /// Returns false when the session had already terminated.
    pub fn mark_terminated(&mut self) -> bool {
        if self.status == SessionStatus::Terminated {
            return false;
        }
        self.status = SessionStatus::Terminated;
        true
    }
}

/// How a read treats the pending buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Remove and return up to `limit` lines from the front
    Consume { limit: usize },
    /// Return the last `n` pending lines without removing anything
    Tail(usize),
    /// Return `limit` lines starting at `skip` without removing anything
    Peek { skip: usize, limit: usize },
}

impl ReadPolicy {
    /// Map the wire-level `offset`/`length` pair onto a policy.
    ///
    /// `0` consumes, a negative offset tails, a positive offset peeks.
    pub fn from_offset(offset: i64, length: usize) -> Self {
        match offset {
            0 => Self::Consume { limit: length },
            o if o < 0 => Self::Tail(o.unsigned_abs() as usize),
            o => Self::Peek {
                skip: o as usize,
                limit: length,
            },
        }
    }

    pub fn consume_all() -> Self {
        Self::Consume { limit: usize::MAX }
    }
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::Consume { limit: 1000 }
    }
}

/// Lines produced by the child that no caller has consumed yet.
///
/// The drain task stops reading the child once `max_lines` are pending, so
/// `push` itself never drops anything.
#[derive(Debug)]
pub struct OutputBuffer {
    pending: VecDeque<String>,
    total_lines: u64,
    max_lines: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_max_lines(DEFAULT_MAX_BUFFER_LINES)
    }
}

pub const DEFAULT_MAX_BUFFER_LINES: usize = 10_000;

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_lines(max_lines: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            total_lines: 0,
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&mut self, line: String) {
        self.pending.push_back(line);
        self.total_lines += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.max_lines
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Lines ever appended, including consumed ones
    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn read(&mut self, policy: ReadPolicy) -> Vec<String> {
        match policy {
            ReadPolicy::Consume { limit } => {
                let n = limit.min(self.pending.len());
                self.pending.drain(..n).collect()
            }
            ReadPolicy::Tail(n) => {
                let start = self.pending.len().saturating_sub(n);
                self.pending.iter().skip(start).cloned().collect()
            }
            ReadPolicy::Peek { skip, limit } => {
                self.pending.iter().skip(skip).take(limit).cloned().collect()
            }
        }
    }
}

/// Result of a single read against a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub lines: Vec<String>,
    pub still_running: bool,
    /// Lines left in the buffer after this read
    pub pending_lines: usize,
    pub total_lines: u64,
}

impl OutputChunk {
    pub fn text(&self) -> String {
        self.lines.concat()
    }
}

/// Serializable session summary for `list_sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub pid: Option<u32>,
    pub command: String,
    pub shell: String,
    pub cwd: String,
    pub status: SessionStatus,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    pub killed: bool,
    pub started_at: String,
    pub runtime_seconds: f64,
    pub buffer_lines: usize,
    pub total_lines: u64,
}
