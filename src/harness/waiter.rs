//! Event waiter

use std::time::Duration;

use crate::debugger::{DebugSession, EventCategory, ProcessState};

/// Block until a state-change event reports a terminal state
///
/// Each poll is bounded by `poll`; an empty poll just loops, so there is no
/// overall limit here. The supervisor's deadline is the only way out of a
/// process that never stops.
pub async fn wait_for_terminal_state(
    session: &mut dyn DebugSession,
    poll: Duration,
) -> ProcessState {
    loop {
        let Some(event) = session.wait_for_event(poll).await else {
            tracing::trace!("no event within {:?}, polling again", poll);
            continue;
        };
        if event.category != EventCategory::StateChanged {
            continue;
        }
        tracing::trace!(state = %event.state, "state changed");
        if event.state.is_terminal() {
            return event.state;
        }
    }
}
