//! Stack inspection

use crate::debugger::{DebugSession, ThreadId};

/// Known renderings of a function name at a stop location
///
/// Some debugger versions print `foo`, others `foo()`. Add a suffix here when
/// another spelling shows up.
pub const SYMBOL_SUFFIXES: &[&str] = &["", "()"];

/// Whether `rendered` is a spelling of `function`
pub fn is_stop_at(rendered: &str, function: &str) -> bool {
    SYMBOL_SUFFIXES
        .iter()
        .any(|suffix| rendered.strip_suffix(suffix) == Some(function))
}

/// Whether the frame named exactly `root` is reachable from `thread`
///
/// An absent thread has no stack. Only reads, so repeated calls on an
/// unchanged thread agree.
pub async fn reaches_root(
    session: &mut dyn DebugSession,
    thread: Option<ThreadId>,
    root: &str,
) -> bool {
    let Some(thread) = thread else {
        return false;
    };

    let frames = session.frame_count(thread).await;
    for index in 0..frames {
        if session.function_name(thread, index).await.as_deref() == Some(root) {
            return true;
        }
    }
    tracing::debug!(frames, root, "root frame not on stack");
    false
}
