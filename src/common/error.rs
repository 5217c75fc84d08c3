//! Error types for the stress harness
//!
//! Three tiers of failure exist and they never mix:
//! - [`Error`] covers infrastructure problems (configuration, adapters, the
//!   DAP wire protocol, IO). These stop the harness before any session runs.
//! - [`SessionFailure`] is a per-session logic failure. It is recorded in the
//!   session's outcome slot and never leaves the session.
//! - [`FatalSetup`] means the test environment itself is broken. It ends the
//!   whole harness.

use std::io;
use thiserror::Error;

use crate::debugger::ProcessState;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness infrastructure
#[derive(Error, Debug)]
pub enum Error {
    // === Adapter Errors ===
    #[error("Debug adapter '{name}' not found. Searched: {searched}")]
    AdapterNotFound { name: String, searched: String },

    #[error("Debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    #[error("Debug adapter crashed unexpectedly")]
    AdapterCrashed,

    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    #[error("DAP request '{command}' timed out after {secs} seconds")]
    DapTimeout { command: String, secs: u64 },

    // === Session Control Errors ===
    #[error("Program '{0}' not found")]
    ProgramNotFound(String),

    #[error("Cannot {action} while process is {state}")]
    InvalidState { action: String, state: String },

    #[error("{0} is not supported by this backend")]
    Unsupported(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid scenario file: {0}")]
    ScenarioParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an adapter not found error with search paths
    pub fn adapter_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::AdapterNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: ProcessState) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }
}

/// Why a single session did not finish its script
///
/// Recorded as `completed=true, succeeded=false`; other sessions are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    #[error("did not get debugger: {0}")]
    SessionUnavailable(String),

    #[error("asynchronous event delivery unavailable: {0}")]
    AsyncUnavailable(String),

    #[error("did not get valid target: {0}")]
    TargetInvalid(String),

    #[error("process failed to launch: {0}")]
    LaunchFailed(String),

    #[error("backtrace while @ {checkpoint}() failed")]
    NoRootFrame { checkpoint: String },

    #[error("breakpoint did not stop at {expected}(), instead stopped at '{found}'")]
    WrongStop { expected: String, found: String },

    #[error("resume failed: {0}")]
    ResumeFailed(String),

    #[error("process exited before reaching {checkpoint}()")]
    ExitedEarly { checkpoint: String },

    #[error("session runtime unavailable: {0}")]
    Runtime(String),
}

/// A setup failure that means the environment itself is broken
///
/// Ends the entire harness, not just the reporting session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalSetup {
    #[error("#{session}: failed to set breakpoint on {checkpoint}, exiting")]
    ExitCheckpoint { session: usize, checkpoint: String },

    #[error("#{session}: adding listener failed")]
    Subscribe { session: usize },
}

impl FatalSetup {
    /// Identity of the session that hit the failure
    pub fn session(&self) -> usize {
        match self {
            Self::ExitCheckpoint { session, .. } | Self::Subscribe { session } => *session,
        }
    }
}
