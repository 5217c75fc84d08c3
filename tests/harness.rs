//! Library-level tests of the session pool on the simulated backend

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use debugger_stress::common::FatalSetup;
use debugger_stress::debugger::sim::{Behavior, SessionScript, SimDebugger, SimPlan, SimStats};
use debugger_stress::debugger::Debugger;
use debugger_stress::harness::{
    Checkpoints, FatalPolicy, HarnessSettings, Supervisor, Tally, Timing, Verdict,
};
use debugger_stress::testing::Scenario;

fn scenario_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("scenarios")
        .join(name)
}

fn settings(sessions: usize, max_checks: u32) -> HarnessSettings {
    HarnessSettings {
        sessions,
        program: "testprog".to_string(),
        arch: std::env::consts::ARCH.to_string(),
        module: Some("testprog".to_string()),
        checkpoints: Checkpoints::default(),
        timing: Timing {
            event_poll: Duration::from_millis(20),
            check_interval: Duration::from_millis(25),
            max_checks,
        },
    }
}

/// Run a simulated pool to its verdict
fn run(plan: SimPlan, sessions: usize, max_checks: u32) -> (Verdict, Supervisor, Arc<SimStats>) {
    let sim = SimDebugger::new(Checkpoints::default(), plan);
    let stats = sim.stats();
    let debugger: Arc<dyn Debugger> = Arc::new(sim);

    let mut supervisor =
        Supervisor::start(debugger, settings(sessions, max_checks), FatalPolicy::Report)
            .expect("harness should start");
    let verdict = supervisor.monitor();
    (verdict, supervisor, stats)
}

fn run_scenario(name: &str) -> (Verdict, Supervisor, Arc<SimStats>) {
    let scenario = Scenario::load(&scenario_path(name)).expect("scenario should parse");
    let sessions = scenario.sessions.expect("scenario names its session count");
    run(scenario.to_plan(), sessions, 400)
}

#[test]
fn test_single_session_succeeds() {
    let (verdict, supervisor, stats) = run_scenario("single_session.yaml");

    assert_eq!(
        verdict,
        Verdict::AllCompleted(Tally {
            completed: 1,
            succeeded: 1,
            total: 1
        })
    );
    assert_eq!(verdict.exit_code(), 0);
    supervisor.join();

    assert_eq!(stats.initialized.load(Ordering::SeqCst), 1);
    assert_eq!(stats.sessions_created.load(Ordering::SeqCst), 1);
    assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 1);
    // Teardown belongs to the process exit, not the supervisor
    assert_eq!(stats.terminated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_one_premature_exit_among_three() {
    let (verdict, supervisor, stats) = run_scenario("premature_exit.yaml");

    assert_eq!(
        verdict,
        Verdict::AllCompleted(Tally {
            completed: 3,
            succeeded: 2,
            total: 3
        })
    );
    let board = supervisor.board();
    assert!(board.slot(0).unwrap().succeeded);
    assert!(!board.slot(1).unwrap().succeeded);
    assert!(board.slot(2).unwrap().succeeded);

    supervisor.join();
    assert_eq!(stats.resumes(1), 1);
    assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 3);
}

#[test]
fn test_all_completed_means_every_slot_completed() {
    let (verdict, supervisor, _) = run(SimPlan::default(), 12, 400);

    assert!(matches!(verdict, Verdict::AllCompleted(_)));
    for view in supervisor.board().snapshot() {
        assert!(view.completed);
    }
    supervisor.join();
}

#[test]
fn test_slot_writes_are_disjoint_under_staggered_latency() {
    let (verdict, supervisor, _) = run_scenario("mixed_spellings.yaml");

    assert!(matches!(verdict, Verdict::AllCompleted(_)));
    for (index, view) in supervisor.board().snapshot().into_iter().enumerate() {
        assert_eq!(view.written_by, Some(index));
        assert!(view.succeeded, "session {index} should succeed");
    }
    supervisor.join();
}

#[test]
fn test_each_slot_holds_its_own_sessions_outcome() {
    // Odd sessions exit early, and later identities finish first
    let sessions = 6;
    let mut plan = SimPlan::default();
    for id in 0..sessions {
        let behavior = if id % 2 == 1 {
            Behavior::ExitsEarly
        } else {
            Behavior::Normal
        };
        let latency = Duration::from_millis(3 * (sessions - id) as u64);
        plan = plan.with_override(id, SessionScript::new(behavior, latency));
    }

    let (verdict, supervisor, stats) = run(plan, sessions, 400);
    assert_eq!(
        verdict,
        Verdict::AllCompleted(Tally {
            completed: 6,
            succeeded: 3,
            total: 6
        })
    );
    for (index, view) in supervisor.board().snapshot().into_iter().enumerate() {
        assert_eq!(view.succeeded, index % 2 == 0, "slot {index}");
    }

    supervisor.join();
    for id in 0..sessions {
        assert_eq!(stats.resumes(id), 1, "session {id}");
    }
}

#[test]
fn test_wrong_first_stop_never_resumes() {
    let (verdict, supervisor, stats) = run(SimPlan::uniform(Behavior::WrongFirstStop), 3, 400);

    assert_eq!(
        verdict,
        Verdict::AllCompleted(Tally {
            completed: 3,
            succeeded: 0,
            total: 3
        })
    );
    supervisor.join();
    for id in 0..3 {
        assert_eq!(stats.resumes(id), 0);
    }
}

#[test]
fn test_failing_exit_checkpoint_is_fatal() {
    let (verdict, supervisor, _) = run_scenario("exit_checkpoint_fails.yaml");

    match verdict {
        Verdict::Fatal(FatalSetup::ExitCheckpoint { ref checkpoint, .. }) => {
            assert_eq!(checkpoint, "bar");
        }
        other => panic!("expected fatal verdict, got {other:?}"),
    }
    assert_eq!(verdict.exit_code(), 1);
    assert_eq!(supervisor.board().tally().completed, 0);
}

#[test]
fn test_all_hanging_sessions_time_out() {
    let (verdict, supervisor, _) = run(SimPlan::uniform(Behavior::Hang), 3, 6);

    assert_eq!(
        verdict,
        Verdict::TimedOut(Tally {
            completed: 0,
            succeeded: 0,
            total: 3
        })
    );
    assert_eq!(verdict.exit_code(), 1);
    // Hung threads are left behind on purpose; do not join
    drop(supervisor);
}

#[test]
fn test_one_hang_holds_up_the_pool() {
    let plan = SimPlan::default().with_override(
        2,
        SessionScript::new(Behavior::Hang, Duration::from_millis(5)),
    );
    let (verdict, _supervisor, _) = run(plan, 4, 40);

    assert_eq!(
        verdict,
        Verdict::TimedOut(Tally {
            completed: 3,
            succeeded: 3,
            total: 4
        })
    );
}
