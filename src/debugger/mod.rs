//! Debugger-control capability set
//!
//! The harness never talks to a debugger directly. It drives any library that
//! implements these two traits:
//! - [`Debugger`] holds process-wide state (initialize/terminate) and hands out
//!   independent sessions.
//! - [`DebugSession`] is one debugger instance with its own target, checkpoints
//!   and controlled process.
//!
//! Two backends ship with the crate: [`dap_backend`] speaks the Debug Adapter
//! Protocol to an external adapter such as `lldb-dap`, and [`sim`] is an
//! in-process scripted stand-in used by tests and smoke runs.

pub mod dap_backend;
pub mod sim;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;

/// State of a controlled process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No process launched yet
    Unloaded,
    /// Launch requested, not yet running
    Launching,
    /// Process is running
    Running,
    /// Process is stopped (breakpoint, signal, step)
    Stopped,
    /// Process stopped on a fault
    Crashed,
    /// Debugger let go of the process
    Detached,
    /// Process is gone
    Exited,
}

impl ProcessState {
    /// States that end an event wait
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Crashed | Self::Detached | Self::Exited
        )
    }

    /// Whether there is still a live process that could be killed
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            Self::Launching | Self::Running | Self::Stopped | Self::Crashed
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Launching => write!(f, "launching"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Crashed => write!(f, "crashed"),
            Self::Detached => write!(f, "detached"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Broadcast category of a debugger event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCategory {
    /// The process changed state
    StateChanged,
    /// Anything else (output, module loads, thread churn)
    Other(String),
}

/// One event pulled from a session's listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEvent {
    pub category: EventCategory,
    /// Process state as reported when the event was delivered
    pub state: ProcessState,
}

impl DebugEvent {
    pub fn state_changed(state: ProcessState) -> Self {
        Self {
            category: EventCategory::StateChanged,
            state,
        }
    }

    pub fn other(name: impl Into<String>, state: ProcessState) -> Self {
        Self {
            category: EventCategory::Other(name.into()),
            state,
        }
    }
}

/// An installed (or attempted) function breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Function the checkpoint was requested on
    pub name: String,
    /// Backend identifier, when the backend assigned one
    pub id: Option<u32>,
    /// Whether the checkpoint resolved to at least one location
    pub verified: bool,
}

impl Checkpoint {
    pub fn is_valid(&self) -> bool {
        self.verified
    }
}

/// Backend identifier for a thread of the controlled process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub i64);

/// Parameters for launching the controlled process
#[derive(Debug, Clone, Default)]
pub struct LaunchInfo {
    pub args: Vec<String>,
    pub env: Option<HashMap<String, String>>,
    pub cwd: Option<PathBuf>,
    pub stop_on_entry: bool,
}

/// Process-wide debugger library
#[async_trait]
pub trait Debugger: Send + Sync {
    /// One-time library setup, called before any session exists
    fn initialize(&self) -> Result<()>;

    /// One-time library teardown
    ///
    /// Must not be called while sessions may still be running.
    fn terminate(&self);

    /// Create a fresh, independent debug session
    async fn create_session(&self, id: usize) -> Result<Box<dyn DebugSession>>;
}

/// One debugger instance owning a target and its controlled process
#[async_trait]
pub trait DebugSession: Send {
    /// Choose asynchronous (`true`) or synchronous event delivery
    fn set_async(&mut self, enabled: bool) -> Result<()>;

    /// Resolve an architecture-qualified target for `program`
    async fn create_target(&mut self, program: &str, arch: &str) -> Result<()>;

    /// Install a breakpoint on `function`, optionally restricted to `module`
    async fn create_breakpoint(&mut self, function: &str, module: Option<&str>)
        -> Result<Checkpoint>;

    /// Launch the controlled process from the current target
    async fn launch(&mut self, info: &LaunchInfo) -> Result<()>;

    /// Subscribe the session's listener to the process's broadcasts of
    /// `category`. Returns `false` when the subscription was refused.
    fn subscribe(&mut self, category: EventCategory) -> bool;

    /// Wait at most `timeout` for the next event
    async fn wait_for_event(&mut self, timeout: Duration) -> Option<DebugEvent>;

    /// Current state of the controlled process
    fn process_state(&self) -> ProcessState;

    /// Thread at `index` of the controlled process, if there is one
    async fn thread_at_index(&mut self, index: usize) -> Option<ThreadId>;

    /// Number of frames on `thread`'s stack
    async fn frame_count(&mut self, thread: ThreadId) -> usize;

    /// Function name of frame `index` on `thread`
    async fn function_name(&mut self, thread: ThreadId, index: usize) -> Option<String>;

    /// Resume the stopped process
    async fn resume(&mut self) -> Result<()>;

    /// Forcibly terminate the process
    async fn kill(&mut self) -> Result<()>;

    /// Release the session and everything it owns
    ///
    /// The session is unusable afterwards; callers drop it right away.
    async fn destroy(&mut self);
}
