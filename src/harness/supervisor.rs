//! Session pool supervisor
//!
//! Starts one OS thread per session, each with its own single-threaded tokio
//! runtime driving one [`run_session`]. The calling thread then sleeps and
//! reads the outcome board until every slot is completed or the check budget
//! runs out.

use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crate::common::{FatalSetup, Result, SessionFailure};
use crate::debugger::Debugger;

use super::driver::{run_session, DriverContext, SessionReport};
use super::outcome::{OutcomeBoard, SlotWriter, Tally};
use super::{shutdown, HarnessSettings};

/// What a driver thread does with a fatal setup failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// End the process at once with status 1
    ExitProcess,
    /// Hand it to the supervisor, which stops monitoring with [`Verdict::Fatal`]
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Monitoring,
    AllCompleted,
    TimedOut,
    Fatal,
}

/// How monitoring ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    AllCompleted(Tally),
    TimedOut(Tally),
    Fatal(FatalSetup),
}

impl Verdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AllCompleted(_) => 0,
            Self::TimedOut(_) | Self::Fatal(_) => 1,
        }
    }
}

pub struct Supervisor {
    settings: Arc<HarnessSettings>,
    board: Arc<OutcomeBoard>,
    fatal: Arc<OnceLock<FatalSetup>>,
    handles: Vec<JoinHandle<()>>,
    state: SupervisorState,
}

impl Supervisor {
    /// Initialize the debugger and start every driver
    pub fn start(
        debugger: Arc<dyn Debugger>,
        settings: HarnessSettings,
        policy: FatalPolicy,
    ) -> Result<Self> {
        settings.validate()?;
        debugger.initialize()?;

        let settings = Arc::new(settings);
        let (board, writers) = OutcomeBoard::new(settings.sessions);
        let fatal = Arc::new(OnceLock::new());
        let ctx = DriverContext {
            debugger,
            settings: Arc::clone(&settings),
        };

        let mut supervisor = Self {
            settings,
            board,
            fatal,
            handles: Vec::with_capacity(writers.len()),
            state: SupervisorState::Starting,
        };

        for writer in writers {
            let ctx = ctx.clone();
            let fatal = Arc::clone(&supervisor.fatal);
            let handle = thread::Builder::new()
                .name(format!("session #{}", writer.index()))
                .spawn(move || session_thread(ctx, writer, policy, fatal))?;
            supervisor.handles.push(handle);
        }

        tracing::debug!(sessions = supervisor.board.len(), "all sessions started");
        supervisor.state = SupervisorState::Monitoring;
        Ok(supervisor)
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn board(&self) -> Arc<OutcomeBoard> {
        Arc::clone(&self.board)
    }

    /// Poll the board until every session completed or the budget is spent
    pub fn monitor(&mut self) -> Verdict {
        let timing = self.settings.timing;

        for check in 1..=timing.max_checks {
            thread::sleep(timing.check_interval);

            if let Some(fatal) = self.fatal.get() {
                self.state = SupervisorState::Fatal;
                return Verdict::Fatal(fatal.clone());
            }

            let tally = self.board.tally();
            tracing::debug!(
                check,
                "{} so far ({} successfully), out of {}",
                tally.completed,
                tally.succeeded,
                tally.total
            );
            if tally.all_completed() {
                tracing::debug!("{} sessions completed successfully", tally.succeeded);
                self.state = SupervisorState::AllCompleted;
                return Verdict::AllCompleted(tally);
            }
        }

        self.state = SupervisorState::TimedOut;
        Verdict::TimedOut(self.board.tally())
    }

    /// Wait for every driver thread
    ///
    /// Only returns once all sessions finished; never call it after a timeout.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("session thread panicked");
            }
        }
    }
}

fn session_thread(
    ctx: DriverContext,
    writer: SlotWriter,
    policy: FatalPolicy,
    fatal: Arc<OnceLock<FatalSetup>>,
) {
    let id = writer.index();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let failure = SessionFailure::Runtime(e.to_string());
            tracing::warn!(session = id, "{}", failure);
            writer.record(&SessionReport::failure(id, failure));
            return;
        }
    };

    match runtime.block_on(run_session(&ctx, id)) {
        Ok(report) => writer.record(&report),
        Err(setup) => {
            tracing::error!("{}", setup);
            match policy {
                FatalPolicy::ExitProcess => shutdown::abrupt_exit(1),
                FatalPolicy::Report => {
                    let _ = fatal.set(setup);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::debugger::sim::{Behavior, SimDebugger, SimPlan};
    use crate::harness::{Checkpoints, Timing};

    fn settings(sessions: usize, max_checks: u32) -> HarnessSettings {
        HarnessSettings {
            sessions,
            program: "testprog".to_string(),
            arch: "x86_64".to_string(),
            module: None,
            checkpoints: Checkpoints::default(),
            timing: Timing {
                event_poll: Duration::from_millis(20),
                check_interval: Duration::from_millis(25),
                max_checks,
            },
        }
    }

    fn sim(plan: SimPlan) -> Arc<dyn Debugger> {
        Arc::new(SimDebugger::new(Checkpoints::default(), plan))
    }

    #[test]
    fn test_zero_sessions_rejected_before_start() {
        let result = Supervisor::start(sim(SimPlan::default()), settings(0, 4), FatalPolicy::Report);
        assert!(result.is_err());
    }

    #[test]
    fn test_states_progress_to_all_completed() {
        let mut supervisor =
            Supervisor::start(sim(SimPlan::default()), settings(2, 200), FatalPolicy::Report)
                .unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Monitoring);

        let verdict = supervisor.monitor();
        assert_eq!(verdict.exit_code(), 0);
        assert_eq!(supervisor.state(), SupervisorState::AllCompleted);
        supervisor.join();
    }

    #[test]
    fn test_hang_times_out() {
        let mut supervisor = Supervisor::start(
            sim(SimPlan::uniform(Behavior::Hang)),
            settings(2, 4),
            FatalPolicy::Report,
        )
        .unwrap();

        let verdict = supervisor.monitor();
        assert_eq!(
            verdict,
            Verdict::TimedOut(Tally {
                completed: 0,
                succeeded: 0,
                total: 2
            })
        );
        assert_eq!(supervisor.state(), SupervisorState::TimedOut);
    }

    #[test]
    fn test_fatal_is_reported() {
        let mut supervisor = Supervisor::start(
            sim(SimPlan::uniform(Behavior::SubscribeFails)),
            settings(1, 200),
            FatalPolicy::Report,
        )
        .unwrap();

        assert_eq!(
            supervisor.monitor(),
            Verdict::Fatal(FatalSetup::Subscribe { session: 0 })
        );
        assert_eq!(supervisor.state(), SupervisorState::Fatal);
    }
}
