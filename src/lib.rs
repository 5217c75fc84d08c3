//! Debugger stress harness - many debug sessions at once against one
//! debugger library
//!
//! Each session drives its own controlled process through two breakpoints
//! while a supervisor watches the shared outcome board and enforces a global
//! deadline. Races and locking defects in the debugger show up as hung or
//! failed sessions.

pub mod common;
pub mod dap;
pub mod debugger;
pub mod harness;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use harness::{FatalPolicy, HarnessSettings, Supervisor, Verdict};
