//! Process-exit actions
//!
//! Success tears the debugger library down and exits normally. Every other
//! ending exits abruptly: sessions may still be running, so neither library
//! teardown nor destructors may run.

use std::io::Write;

use crate::debugger::Debugger;

use super::outcome::Tally;
use super::supervisor::Verdict;

/// Line printed on stdout when the deadline passes
pub fn timeout_summary(tally: &Tally) -> String {
    format!(
        "reached maximum timeout but only {} sessions have completed so far ({} successfully), out of {}. Exiting.",
        tally.completed, tally.succeeded, tally.total
    )
}

/// Carry out the exit that `verdict` calls for
pub fn finish(verdict: &Verdict, debugger: &dyn Debugger) -> ! {
    match verdict {
        Verdict::AllCompleted(tally) => {
            tracing::info!("{}", tally);
            debugger.terminate();
            std::process::exit(0)
        }
        Verdict::TimedOut(tally) => {
            println!("{}", timeout_summary(tally));
            abrupt_exit(1)
        }
        Verdict::Fatal(setup) => {
            tracing::debug!(session = setup.session(), "exiting after fatal setup failure");
            abrupt_exit(1)
        }
    }
}

/// Exit immediately without running library teardown or atexit handlers
pub fn abrupt_exit(code: i32) -> ! {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    #[cfg(unix)]
    {
        // SAFETY: _exit only ends the process; nothing is touched afterwards.
        unsafe { libc::_exit(code) }
    }

    #[cfg(not(unix))]
    {
        std::process::exit(code)
    }
}
