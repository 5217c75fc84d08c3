//! DAP backend tests against the scripted mock adapter

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use debugger_stress::common::config::{AdapterConfig, Config};
use debugger_stress::common::{FatalSetup, SessionFailure};
use debugger_stress::debugger::dap_backend::DapDebugger;
use debugger_stress::debugger::{
    Debugger, EventCategory, LaunchInfo, ProcessState,
};
use debugger_stress::harness::{
    run_session, Checkpoints, DriverContext, HarnessSettings, SessionReport, Timing,
};
use debugger_stress::Error;
use tempfile::NamedTempFile;

/// Debugger whose sessions talk to `mock_adapter` started with `args`
fn mock_debugger(args: &[&str]) -> Arc<dyn Debugger> {
    let mut config = Config::default();
    config.adapters.insert(
        "mock".to_string(),
        AdapterConfig {
            path: PathBuf::from(env!("CARGO_BIN_EXE_mock_adapter")),
            args: args.iter().map(|s| s.to_string()).collect(),
        },
    );
    config.defaults.adapter = "mock".to_string();
    config.timeouts.dap_initialize_secs = 5;
    config.timeouts.dap_request_secs = 5;
    Arc::new(DapDebugger::from_config(&config, None).expect("mock adapter configured"))
}

/// The mock never runs the program, it only needs to exist
fn program() -> NamedTempFile {
    NamedTempFile::new().expect("temp program")
}

fn context(args: &[&str], program: &NamedTempFile) -> DriverContext {
    DriverContext {
        debugger: mock_debugger(args),
        settings: Arc::new(HarnessSettings {
            sessions: 1,
            program: program.path().to_string_lossy().into_owned(),
            arch: std::env::consts::ARCH.to_string(),
            module: None,
            checkpoints: Checkpoints::default(),
            timing: Timing {
                event_poll: Duration::from_millis(100),
                check_interval: Duration::from_millis(50),
                max_checks: 10,
            },
        }),
    }
}

async fn run_with(args: &[&str]) -> Result<SessionReport, FatalSetup> {
    let program = program();
    let ctx = context(args, &program);
    run_session(&ctx, 0).await
}

#[tokio::test]
async fn test_normal_session_succeeds() {
    let report = run_with(&[]).await.unwrap();
    assert_eq!(report, SessionReport::success(0));
}

#[tokio::test]
async fn test_parenthesized_names_succeed() {
    let report = run_with(&["--paren-names"]).await.unwrap();
    assert!(report.is_success(), "{report:?}");
}

#[tokio::test]
async fn test_exit_after_resume_fails() {
    let report = run_with(&["--behavior", "exit-early"]).await.unwrap();
    assert_eq!(
        report.outcome,
        Err(SessionFailure::ExitedEarly {
            checkpoint: "bar".to_string()
        })
    );
}

#[tokio::test]
async fn test_wrong_first_stop_fails() {
    let report = run_with(&["--behavior", "wrong-stop"]).await.unwrap();
    assert_eq!(
        report.outcome,
        Err(SessionFailure::WrongStop {
            expected: "foo".to_string(),
            found: "baz".to_string(),
        })
    );
}

#[tokio::test]
async fn test_missing_root_frame_fails() {
    let report = run_with(&["--behavior", "no-root"]).await.unwrap();
    assert_eq!(
        report.outcome,
        Err(SessionFailure::NoRootFrame {
            checkpoint: "foo".to_string()
        })
    );
}

#[tokio::test]
async fn test_exception_stop_is_a_wrong_stop() {
    let report = run_with(&["--behavior", "crash"]).await.unwrap();
    assert_eq!(
        report.outcome,
        Err(SessionFailure::WrongStop {
            expected: "foo".to_string(),
            found: "abort".to_string(),
        })
    );
}

#[tokio::test]
async fn test_unverified_exit_checkpoint_is_fatal() {
    let fatal = run_with(&["--behavior", "unverified-exit"]).await.unwrap_err();
    assert_eq!(
        fatal,
        FatalSetup::ExitCheckpoint {
            session: 0,
            checkpoint: "bar".to_string()
        }
    );
}

#[tokio::test]
async fn test_missing_program_is_invalid_target() {
    let program = program();
    let mut ctx = context(&[], &program);
    let mut settings = (*ctx.settings).clone();
    settings.program = "/nonexistent/testprog".to_string();
    ctx.settings = Arc::new(settings);

    let report = run_session(&ctx, 0).await.unwrap();
    assert!(matches!(
        report.outcome,
        Err(SessionFailure::TargetInvalid(_))
    ));
}

#[tokio::test]
async fn test_hung_process_never_reports() {
    let program = program();
    let ctx = context(&["--behavior", "hang"], &program);
    let pending = tokio::time::timeout(Duration::from_millis(500), run_session(&ctx, 0)).await;
    assert!(pending.is_err());
}

#[tokio::test]
async fn test_session_capabilities() {
    let program = program();
    let debugger = mock_debugger(&[]);
    let mut session = debugger.create_session(0).await.unwrap();

    assert!(matches!(session.set_async(false), Err(Error::Unsupported(_))));
    session.set_async(true).unwrap();

    // Checkpoints need a target first
    assert!(session.create_breakpoint("bar", None).await.is_err());

    session
        .create_target(&program.path().to_string_lossy(), "x86_64")
        .await
        .unwrap();
    let bar = session.create_breakpoint("bar", Some("testprog")).await.unwrap();
    assert!(bar.is_valid());
    let missing = session.create_breakpoint("nowhere", None).await.unwrap();
    assert!(!missing.is_valid());

    let stop_on_entry = LaunchInfo {
        stop_on_entry: true,
        ..LaunchInfo::default()
    };
    assert!(matches!(
        session.launch(&stop_on_entry).await,
        Err(Error::Unsupported(_))
    ));
    session.launch(&LaunchInfo::default()).await.unwrap();

    assert!(session.subscribe(EventCategory::StateChanged));
    assert!(session.subscribe(EventCategory::Other("output".to_string())));

    // Output arrives before the stop and is delivered once subscribed
    let mut saw_output = false;
    loop {
        let event = session
            .wait_for_event(Duration::from_secs(5))
            .await
            .expect("event before timeout");
        if event.category == EventCategory::Other("output".to_string()) {
            saw_output = true;
        }
        if event.state.is_terminal() {
            assert_eq!(event.state, ProcessState::Stopped);
            break;
        }
    }
    assert!(saw_output);

    // No entry checkpoint was set, so the first stop is the exit one
    let thread = session.thread_at_index(0).await.unwrap();
    assert_eq!(session.function_name(thread, 0).await.as_deref(), Some("bar"));
    assert_eq!(session.frame_count(thread).await, 3);
    assert!(session.thread_at_index(1).await.is_none());

    session.kill().await.unwrap();
    session.destroy().await;
}
