//! Debug Adapter Protocol (DAP) implementation
//!
//! Client side of DAP, used by the DAP backend to drive adapters such as
//! lldb-dap. One client per debug session.

pub mod client;
pub mod codec;
pub mod types;

pub use client::DapClient;
pub use types::*;
