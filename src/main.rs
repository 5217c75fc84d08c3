//! Debugger stress harness
//!
//! Starts N debug sessions against the same debugger library, each on its own
//! thread, and exits 0 only when every one of them finished in time.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use debugger_stress::common::config::Config;
use debugger_stress::common::logging;
use debugger_stress::debugger::dap_backend::DapDebugger;
use debugger_stress::debugger::sim::SimDebugger;
use debugger_stress::debugger::Debugger;
use debugger_stress::harness::{self, shutdown, FatalPolicy, HarnessSettings, Supervisor};
use debugger_stress::testing::Scenario;
use debugger_stress::{Error, Result};

#[derive(Parser)]
#[command(name = "debugger-stress", about = "Concurrent multi-session debugger stress harness")]
#[command(version, long_about = None)]
struct Cli {
    /// Program to debug, as a path or a name on PATH
    program: Option<String>,

    /// Number of simultaneous sessions
    #[arg(short = 'n', long)]
    sessions: Option<usize>,

    /// Debugger backend
    #[arg(long, value_enum, default_value_t = Backend::Dap)]
    backend: Backend,

    /// YAML scenario scripting the simulated sessions
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Debug adapter to use (default from config)
    #[arg(long)]
    adapter: Option<String>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Debug Adapter Protocol server such as lldb-dap
    Dap,
    /// In-process simulated debugger
    Sim,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let scenario = match &cli.scenario {
        Some(_) if cli.backend != Backend::Sim => {
            return Err(Error::Config(
                "--scenario only applies to --backend sim".to_string(),
            ))
        }
        Some(path) => Some(Scenario::load(path)?),
        None => None,
    };

    let sanitized = harness::sanitizer_detected();
    if sanitized {
        tracing::info!("sanitizer detected, stretching the deadline");
    }

    let mut settings = HarnessSettings::from_config(&config, sanitized);
    if let Some(sessions) = cli
        .sessions
        .or_else(|| scenario.as_ref().and_then(|s| s.sessions))
    {
        settings.sessions = sessions;
    }
    if let Some(program) = cli.program {
        settings.program = program;
    }

    let debugger: Arc<dyn Debugger> = match cli.backend {
        Backend::Dap => Arc::new(DapDebugger::from_config(&config, cli.adapter.as_deref())?),
        Backend::Sim => {
            let plan = scenario.map(|s| s.to_plan()).unwrap_or_default();
            Arc::new(SimDebugger::new(settings.checkpoints.clone(), plan))
        }
    };

    tracing::info!(
        sessions = settings.sessions,
        program = %settings.program,
        backend = ?cli.backend,
        deadline = ?settings.timing.deadline(),
        "starting harness"
    );

    let mut supervisor =
        Supervisor::start(Arc::clone(&debugger), settings, FatalPolicy::ExitProcess)?;
    let verdict = supervisor.monitor();
    shutdown::finish(&verdict, debugger.as_ref())
}
