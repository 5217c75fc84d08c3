//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Debug adapter configurations
    #[serde(default)]
    pub adapters: HashMap<String, AdapterConfig>,

    /// Default settings
    #[serde(default)]
    pub defaults: Defaults,

    /// Harness shape: session count and controlled program
    #[serde(default)]
    pub harness: HarnessConfig,

    /// Function names the session script stops at
    #[serde(default)]
    pub checkpoints: CheckpointConfig,

    /// Polling cadence and deadline
    #[serde(default)]
    pub timing: TimingConfig,

    /// DAP timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,
}

/// Configuration for a debug adapter
#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// Path to the adapter executable
    pub path: PathBuf,

    /// Additional arguments to pass to the adapter
    #[serde(default)]
    pub args: Vec<String>,
}

/// Default settings
#[derive(Debug, Deserialize)]
pub struct Defaults {
    /// Default adapter to use
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            adapter: default_adapter(),
        }
    }
}

fn default_adapter() -> String {
    "lldb-dap".to_string()
}

/// Harness shape
#[derive(Debug, Deserialize)]
pub struct HarnessConfig {
    /// Number of simultaneous debug sessions
    #[serde(default = "default_sessions")]
    pub sessions: usize,

    /// Controlled program, as a path or a name looked up on PATH
    #[serde(default = "default_program")]
    pub program: String,

    /// Architecture used to qualify the target
    #[serde(default = "default_arch")]
    pub arch: String,

    /// Module the checkpoints are resolved in (any module when unset)
    #[serde(default)]
    pub module: Option<String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            sessions: default_sessions(),
            program: default_program(),
            arch: default_arch(),
            module: None,
        }
    }
}

fn default_sessions() -> usize {
    10
}
fn default_program() -> String {
    "testprog".to_string()
}
fn default_arch() -> String {
    std::env::consts::ARCH.to_string()
}

/// Checkpoint function names
#[derive(Debug, Deserialize)]
pub struct CheckpointConfig {
    /// First stop, best-effort
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Second stop, mandatory
    #[serde(default = "default_exit")]
    pub exit: String,

    /// Sentinel root frame every genuine stack must reach
    #[serde(default = "default_root")]
    pub root: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            entry: default_entry(),
            exit: default_exit(),
            root: default_root(),
        }
    }
}

fn default_entry() -> String {
    "foo".to_string()
}
fn default_exit() -> String {
    "bar".to_string()
}
fn default_root() -> String {
    "main".to_string()
}

/// Polling cadence and deadline
#[derive(Debug, Deserialize)]
pub struct TimingConfig {
    /// Upper bound on a single event poll
    #[serde(default = "default_event_poll")]
    pub event_poll_ms: u64,

    /// Sleep between two supervisor checks
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Supervisor checks before giving up
    #[serde(default = "default_max_checks")]
    pub max_checks: u32,

    /// Budget multiplier under sanitizer instrumentation
    #[serde(default = "default_sanitizer_multiplier")]
    pub sanitizer_multiplier: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            event_poll_ms: default_event_poll(),
            check_interval_ms: default_check_interval(),
            max_checks: default_max_checks(),
            sanitizer_multiplier: default_sanitizer_multiplier(),
        }
    }
}

fn default_event_poll() -> u64 {
    2_000
}
fn default_check_interval() -> u64 {
    3_000
}
fn default_max_checks() -> u32 {
    40
}
fn default_sanitizer_multiplier() -> u32 {
    4
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for the DAP `initialized` event
    #[serde(default = "default_dap_initialize")]
    pub dap_initialize_secs: u64,

    /// Timeout for general DAP requests
    #[serde(default = "default_dap_request")]
    pub dap_request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dap_initialize_secs: default_dap_initialize(),
            dap_request_secs: default_dap_request(),
        }
    }
}

fn default_dap_initialize() -> u64 {
    10
}
fn default_dap_request() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }

    /// Get adapter configuration by name
    ///
    /// Falls back to searching PATH if not explicitly configured
    pub fn get_adapter(&self, name: &str) -> Option<AdapterConfig> {
        if let Some(config) = self.adapters.get(name) {
            return Some(config.clone());
        }

        which::which(name).ok().map(|path| AdapterConfig {
            path,
            args: Vec::new(),
        })
    }
}
