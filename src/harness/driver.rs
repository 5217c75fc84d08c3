//! Session driver
//!
//! Runs the fixed script against one debug session: target, two checkpoints,
//! launch, stop at the entry checkpoint, resume, stop at the exit checkpoint,
//! kill. No step is retried. The session is released on every path except a
//! fatal setup failure, where the whole harness is about to go away.

use std::sync::Arc;

use crate::common::{FatalSetup, SessionFailure};
use crate::debugger::{DebugSession, Debugger, EventCategory, LaunchInfo, ProcessState};

use super::stack;
use super::waiter::wait_for_terminal_state;
use super::HarnessSettings;

/// Shared inputs of every driver
#[derive(Clone)]
pub struct DriverContext {
    pub debugger: Arc<dyn Debugger>,
    pub settings: Arc<HarnessSettings>,
}

/// What a driver writes into its outcome slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Identity of the driver that produced the report
    pub session: usize,
    pub outcome: Result<(), SessionFailure>,
}

impl SessionReport {
    pub fn success(session: usize) -> Self {
        Self {
            session,
            outcome: Ok(()),
        }
    }

    pub fn failure(session: usize, failure: SessionFailure) -> Self {
        Self {
            session,
            outcome: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Why the script stopped early
enum Abort {
    Failed(SessionFailure),
    Fatal(FatalSetup),
}

impl From<SessionFailure> for Abort {
    fn from(failure: SessionFailure) -> Self {
        Self::Failed(failure)
    }
}

impl From<FatalSetup> for Abort {
    fn from(fatal: FatalSetup) -> Self {
        Self::Fatal(fatal)
    }
}

/// Owns a session until it is released
///
/// Dropping an unreleased guard leaves the kill to the backend's own drop.
struct SessionGuard {
    id: usize,
    session: Box<dyn DebugSession>,
    released: bool,
}

impl SessionGuard {
    fn new(id: usize, session: Box<dyn DebugSession>) -> Self {
        Self {
            id,
            session,
            released: false,
        }
    }

    fn session(&mut self) -> &mut dyn DebugSession {
        self.session.as_mut()
    }

    /// Kill the process if it is still alive, then destroy the session
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let state = self.session.process_state();
        if state.is_alive() {
            if let Err(e) = self.session.kill().await {
                tracing::debug!(session = self.id, error = %e, "kill during release failed");
            }
        }
        self.session.destroy().await;
        tracing::trace!(session = self.id, "session released");
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(session = self.id, "session dropped without release");
        }
    }
}

/// Run the script for session `id`
///
/// Per-session failures come back as a failed report. A fatal setup failure
/// is returned as `Err` and the session is not released.
pub async fn run_session(ctx: &DriverContext, id: usize) -> Result<SessionReport, FatalSetup> {
    tracing::debug!(session = id, "starting");

    let session = match ctx.debugger.create_session(id).await {
        Ok(session) => session,
        Err(e) => {
            let failure = SessionFailure::SessionUnavailable(e.to_string());
            tracing::warn!(session = id, "{}", failure);
            return Ok(SessionReport::failure(id, failure));
        }
    };

    let mut guard = SessionGuard::new(id, session);
    let report = match drive(guard.session(), &ctx.settings, id).await {
        Ok(()) => {
            tracing::debug!(session = id, "completed successfully");
            SessionReport::success(id)
        }
        Err(Abort::Failed(failure)) => {
            tracing::warn!(session = id, "{}", failure);
            SessionReport::failure(id, failure)
        }
        Err(Abort::Fatal(fatal)) => return Err(fatal),
    };

    guard.release().await;
    Ok(report)
}

async fn drive(
    session: &mut dyn DebugSession,
    settings: &HarnessSettings,
    id: usize,
) -> Result<(), Abort> {
    let checkpoints = &settings.checkpoints;
    let module = settings.module.as_deref();
    let poll = settings.timing.event_poll;

    session
        .set_async(true)
        .map_err(|e| SessionFailure::AsyncUnavailable(e.to_string()))?;

    session
        .create_target(&settings.program, &settings.arch)
        .await
        .map_err(|e| SessionFailure::TargetInvalid(e.to_string()))?;

    let exit_installed = match session.create_breakpoint(&checkpoints.exit, module).await {
        Ok(checkpoint) => checkpoint.is_valid(),
        Err(e) => {
            tracing::debug!(session = id, error = %e, "exit breakpoint request failed");
            false
        }
    };
    if !exit_installed {
        return Err(FatalSetup::ExitCheckpoint {
            session: id,
            checkpoint: checkpoints.exit.clone(),
        }
        .into());
    }

    match session.create_breakpoint(&checkpoints.entry, module).await {
        Ok(checkpoint) if checkpoint.is_valid() => {}
        Ok(_) => tracing::warn!(
            session = id,
            "failed to set breakpoint on {}",
            checkpoints.entry
        ),
        Err(e) => tracing::warn!(
            session = id,
            error = %e,
            "failed to set breakpoint on {}",
            checkpoints.entry
        ),
    }

    session
        .launch(&LaunchInfo::default())
        .await
        .map_err(|e| SessionFailure::LaunchFailed(e.to_string()))?;

    if !session.subscribe(EventCategory::StateChanged) {
        return Err(FatalSetup::Subscribe { session: id }.into());
    }

    let state = wait_for_terminal_state(session, poll).await;
    tracing::debug!(session = id, %state, "first stop");
    expect_stop_at(session, &checkpoints.entry, &checkpoints.root).await?;

    session
        .resume()
        .await
        .map_err(|e| SessionFailure::ResumeFailed(e.to_string()))?;

    let state = wait_for_terminal_state(session, poll).await;
    tracing::debug!(session = id, %state, "second stop");
    if state == ProcessState::Exited {
        return Err(SessionFailure::ExitedEarly {
            checkpoint: checkpoints.exit.clone(),
        }
        .into());
    }
    expect_stop_at(session, &checkpoints.exit, &checkpoints.root).await?;

    // Both checkpoints passed; a refused kill is left to release
    match session.kill().await {
        Ok(()) => {
            wait_for_terminal_state(session, poll).await;
        }
        Err(e) => tracing::warn!(session = id, error = %e, "kill failed"),
    }

    Ok(())
}

/// The process must be stopped in `checkpoint` with `root` below it
async fn expect_stop_at(
    session: &mut dyn DebugSession,
    checkpoint: &str,
    root: &str,
) -> Result<(), SessionFailure> {
    let thread = session.thread_at_index(0).await;
    if !stack::reaches_root(session, thread, root).await {
        return Err(SessionFailure::NoRootFrame {
            checkpoint: checkpoint.to_string(),
        });
    }

    let found = match thread {
        Some(thread) => session.function_name(thread, 0).await.unwrap_or_default(),
        None => String::new(),
    };
    if stack::is_stop_at(&found, checkpoint) {
        Ok(())
    } else {
        Err(SessionFailure::WrongStop {
            expected: checkpoint.to_string(),
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::debugger::sim::{Behavior, SimDebugger, SimPlan, SimStats};
    use crate::harness::{Checkpoints, Timing};

    fn context(behavior: Behavior) -> (DriverContext, Arc<SimStats>) {
        let sim = SimDebugger::new(Checkpoints::default(), SimPlan::uniform(behavior));
        let stats = sim.stats();
        let settings = HarnessSettings {
            sessions: 1,
            program: "testprog".to_string(),
            arch: "x86_64".to_string(),
            module: None,
            checkpoints: Checkpoints::default(),
            timing: Timing {
                event_poll: Duration::from_millis(50),
                check_interval: Duration::from_millis(10),
                max_checks: 10,
            },
        };
        let ctx = DriverContext {
            debugger: Arc::new(sim),
            settings: Arc::new(settings),
        };
        (ctx, stats)
    }

    async fn failure_for(behavior: Behavior) -> SessionFailure {
        let (ctx, _) = context(behavior);
        let report = run_session(&ctx, 0).await.unwrap();
        report.outcome.unwrap_err()
    }

    #[tokio::test]
    async fn test_normal_session_succeeds_and_releases() {
        let (ctx, stats) = context(Behavior::Normal);
        let report = run_session(&ctx, 0).await.unwrap();

        assert_eq!(report, SessionReport::success(0));
        assert_eq!(stats.resumes(0), 1);
        assert_eq!(stats.kills(0), 1);
        assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parenthesized_names_are_accepted() {
        let (ctx, _) = context(Behavior::ParenthesizedNames);
        assert!(run_session(&ctx, 0).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_wrong_first_stop_fails_without_resume() {
        let (ctx, stats) = context(Behavior::WrongFirstStop);
        let report = run_session(&ctx, 0).await.unwrap();

        assert_eq!(
            report.outcome,
            Err(SessionFailure::WrongStop {
                expected: "foo".to_string(),
                found: "baz".to_string(),
            })
        );
        assert_eq!(stats.resumes(0), 0);
        // Still stopped, so release kills it
        assert_eq!(stats.kills(0), 1);
        assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exit_after_resume_fails() {
        assert_eq!(
            failure_for(Behavior::ExitsEarly).await,
            SessionFailure::ExitedEarly {
                checkpoint: "bar".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unwound_stack_fails_root_check() {
        assert_eq!(
            failure_for(Behavior::UnwoundStack).await,
            SessionFailure::NoRootFrame {
                checkpoint: "foo".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_entry_checkpoint_stops_at_exit_first() {
        assert_eq!(
            failure_for(Behavior::MissingEntryCheckpoint).await,
            SessionFailure::WrongStop {
                expected: "foo".to_string(),
                found: "bar".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_crash_is_a_wrong_stop() {
        let failure = failure_for(Behavior::Crashes).await;
        assert!(matches!(failure, SessionFailure::WrongStop { .. }));
    }

    #[tokio::test]
    async fn test_setup_failures_are_per_session() {
        assert!(matches!(
            failure_for(Behavior::NoSession).await,
            SessionFailure::SessionUnavailable(_)
        ));
        assert!(matches!(
            failure_for(Behavior::NoTarget).await,
            SessionFailure::TargetInvalid(_)
        ));
        assert!(matches!(
            failure_for(Behavior::LaunchFails).await,
            SessionFailure::LaunchFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_exit_checkpoint_is_fatal() {
        let (ctx, stats) = context(Behavior::MissingExitCheckpoint);
        let fatal = run_session(&ctx, 3).await.unwrap_err();

        assert_eq!(
            fatal,
            FatalSetup::ExitCheckpoint {
                session: 3,
                checkpoint: "bar".to_string()
            }
        );
        assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_fatal() {
        let (ctx, _) = context(Behavior::SubscribeFails);
        assert_eq!(
            run_session(&ctx, 1).await.unwrap_err(),
            FatalSetup::Subscribe { session: 1 }
        );
    }

    #[tokio::test]
    async fn test_refused_kill_keeps_success() {
        let (ctx, stats) = context(Behavior::KillRefused);
        let report = run_session(&ctx, 0).await.unwrap();

        assert_eq!(report, SessionReport::success(0));
        // Once in the script, once more on release
        assert_eq!(stats.kills(0), 2);
        assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_session_never_reports() {
        let (ctx, _) = context(Behavior::Hang);
        let pending =
            tokio::time::timeout(Duration::from_millis(300), run_session(&ctx, 0)).await;
        assert!(pending.is_err());
    }
}
