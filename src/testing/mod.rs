//! Simulated test scenarios
//!
//! A scenario is a YAML file describing a run of the simulated backend: how
//! many sessions, how each one behaves and how slowly its events arrive.

mod scenario;

pub use scenario::*;
