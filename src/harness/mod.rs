//! Concurrent multi-session harness
//!
//! The supervisor starts one [`driver`] per session, each on its own thread,
//! then watches the shared [`outcome`] board until every session completed or
//! the deadline passed.

pub mod driver;
pub mod outcome;
pub mod shutdown;
pub mod stack;
pub mod supervisor;
pub mod waiter;

use std::time::Duration;

use crate::common::config::{Config, TimingConfig};
use crate::common::{Error, Result};

pub use driver::{run_session, DriverContext, SessionReport};
pub use outcome::{OutcomeBoard, SlotView, SlotWriter, Tally};
pub use supervisor::{FatalPolicy, Supervisor, SupervisorState, Verdict};

/// Environment variables whose presence means an instrumented build
pub const SANITIZER_ENV_VARS: &[&str] = &[
    "ASAN_OPTIONS",
    "TSAN_OPTIONS",
    "MSAN_OPTIONS",
    "LSAN_OPTIONS",
    "UBSAN_OPTIONS",
];

/// Whether the harness is running under a sanitizer
pub fn sanitizer_detected() -> bool {
    SANITIZER_ENV_VARS
        .iter()
        .any(|var| std::env::var_os(var).is_some())
}

/// Function names that drive the session script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoints {
    /// First stop (best-effort breakpoint)
    pub entry: String,
    /// Second stop (mandatory breakpoint)
    pub exit: String,
    /// Sentinel root frame
    pub root: String,
}

impl Default for Checkpoints {
    fn default() -> Self {
        Self {
            entry: "foo".to_string(),
            exit: "bar".to_string(),
            root: "main".to_string(),
        }
    }
}

/// Polling cadence and deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Upper bound on a single event poll
    pub event_poll: Duration,
    /// Sleep between two supervisor checks
    pub check_interval: Duration,
    /// Supervisor checks before giving up
    pub max_checks: u32,
}

impl Timing {
    /// Build timing from configuration, stretching the budget when sanitized
    pub fn from_config(config: &TimingConfig, sanitized: bool) -> Self {
        let multiplier = if sanitized {
            config.sanitizer_multiplier.max(1)
        } else {
            1
        };
        Self {
            event_poll: Duration::from_millis(config.event_poll_ms),
            check_interval: Duration::from_millis(config.check_interval_ms),
            max_checks: config.max_checks.saturating_mul(multiplier),
        }
    }

    /// Wall-clock deadline implied by the check budget
    pub fn deadline(&self) -> Duration {
        self.check_interval.saturating_mul(self.max_checks)
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::from_config(&TimingConfig::default(), false)
    }
}

/// Everything a harness run needs besides the debugger itself
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// Number of simultaneous sessions
    pub sessions: usize,
    /// Controlled program
    pub program: String,
    /// Architecture the target is created for
    pub arch: String,
    /// Module qualifier for both checkpoints
    pub module: Option<String>,
    pub checkpoints: Checkpoints,
    pub timing: Timing,
}

impl HarnessSettings {
    /// Build settings from configuration
    pub fn from_config(config: &Config, sanitized: bool) -> Self {
        Self {
            sessions: config.harness.sessions,
            program: config.harness.program.clone(),
            arch: config.harness.arch.clone(),
            module: config.harness.module.clone(),
            checkpoints: Checkpoints {
                entry: config.checkpoints.entry.clone(),
                exit: config.checkpoints.exit.clone(),
                root: config.checkpoints.root.clone(),
            },
            timing: Timing::from_config(&config.timing, sanitized),
        }
    }

    /// Reject settings the harness cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sessions == 0 {
            return Err(Error::Config("at least one session is required".to_string()));
        }
        if self.program.is_empty() {
            return Err(Error::Config("no controlled program given".to_string()));
        }
        if self.timing.event_poll.is_zero() {
            return Err(Error::Config("event_poll_ms must be positive".to_string()));
        }
        Ok(())
    }
}
