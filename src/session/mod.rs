//! Session Management Module
//!
//! Process sessions started by remote callers:
//! - One background drain task per child, decoupled from any request
//! - Lock-guarded pending-output buffer with bounded polling reads
//! - Explicit registry object shared by every request handler
//! - Idempotent, best-effort termination

pub mod manager;
pub mod process;
pub mod state;

pub use manager::{SessionError, SessionRegistry, SessionResult, SessionSettings};
pub use process::{ProcessSession, Shell, ShellKind, SpawnRequest};
pub use state::{OutputChunk, ReadPolicy, SessionInfo, SessionStatus};
