//! Common utilities shared by the harness, the backends and the binary

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, FatalSetup, Result, SessionFailure};
