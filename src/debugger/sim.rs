//! In-process simulated debugger
//!
//! Models the standard controlled program: `main` calls the entry function,
//! then the exit function, then returns. Each session follows a
//! [`SessionScript`] that can inject one specific misbehaviour, so every
//! branch of the session script can be driven without a real debugger.
//!
//! Events are scheduled on a per-session timeline and delivered by
//! [`DebugSession::wait_for_event`] when they fall due.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep_until, Instant};

use super::{
    Checkpoint, DebugEvent, DebugSession, Debugger, EventCategory, LaunchInfo, ProcessState,
    ThreadId,
};
use crate::common::{Error, Result};
use crate::harness::Checkpoints;

/// Function the process stops in when it goes somewhere unexpected
pub const STRAY_FUNCTION: &str = "baz";

/// Frame below the root, as a real loader would show it
const LOADER_FRAME: &str = "_start";

/// Non-state event emitted before every stop
pub const OUTPUT_EVENT: &str = "stdout";

/// The one thing a simulated session does differently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    /// Runs the whole script correctly
    #[default]
    Normal,
    /// Renders non-root function names as `name()`
    ParenthesizedNames,
    /// Session creation fails
    NoSession,
    /// Target resolution fails
    NoTarget,
    /// The entry breakpoint does not resolve
    MissingEntryCheckpoint,
    /// The exit breakpoint does not resolve
    MissingExitCheckpoint,
    /// Launch fails
    LaunchFails,
    /// Subscribing to state changes is refused
    SubscribeFails,
    /// First stop is in an unrelated function
    WrongFirstStop,
    /// Stacks end before reaching the root frame
    UnwoundStack,
    /// Process exits instead of reaching the exit checkpoint
    ExitsEarly,
    /// Process faults before the entry checkpoint
    Crashes,
    /// Process never reports a state change after launch
    Hang,
    /// Every kill request is refused
    KillRefused,
}

/// How one simulated session behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionScript {
    pub behavior: Behavior,
    /// Delay before each state change is delivered
    pub latency: Duration,
}

impl Default for SessionScript {
    fn default() -> Self {
        Self {
            behavior: Behavior::Normal,
            latency: Duration::from_millis(5),
        }
    }
}

impl SessionScript {
    pub fn new(behavior: Behavior, latency: Duration) -> Self {
        Self { behavior, latency }
    }
}

/// Scripts for every session of a run
#[derive(Debug, Clone, Default)]
pub struct SimPlan {
    pub default: SessionScript,
    pub overrides: HashMap<usize, SessionScript>,
}

impl SimPlan {
    /// Every session runs `behavior`
    pub fn uniform(behavior: Behavior) -> Self {
        Self {
            default: SessionScript {
                behavior,
                ..SessionScript::default()
            },
            overrides: HashMap::new(),
        }
    }

    /// Give one session its own script
    pub fn with_override(mut self, session: usize, script: SessionScript) -> Self {
        self.overrides.insert(session, script);
        self
    }

    pub fn script_for(&self, session: usize) -> SessionScript {
        self.overrides
            .get(&session)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Calls observed by the simulated library
#[derive(Debug, Default)]
pub struct SimStats {
    pub initialized: AtomicUsize,
    pub terminated: AtomicUsize,
    pub sessions_created: AtomicUsize,
    pub sessions_destroyed: AtomicUsize,
    resumes: Mutex<HashMap<usize, usize>>,
    kills: Mutex<HashMap<usize, usize>>,
}

impl SimStats {
    /// Resume calls made by session `id`
    pub fn resumes(&self, id: usize) -> usize {
        count(&self.resumes, id)
    }

    /// Kill calls made by session `id`
    pub fn kills(&self, id: usize) -> usize {
        count(&self.kills, id)
    }

    fn bump(map: &Mutex<HashMap<usize, usize>>, id: usize) {
        if let Ok(mut map) = map.lock() {
            *map.entry(id).or_default() += 1;
        }
    }
}

fn count(map: &Mutex<HashMap<usize, usize>>, id: usize) -> usize {
    map.lock()
        .ok()
        .and_then(|map| map.get(&id).copied())
        .unwrap_or(0)
}

/// Simulated debugger library
pub struct SimDebugger {
    functions: Checkpoints,
    plan: SimPlan,
    stats: Arc<SimStats>,
}

impl SimDebugger {
    /// Simulate a program whose functions carry the given checkpoint names
    pub fn new(functions: Checkpoints, plan: SimPlan) -> Self {
        Self {
            functions,
            plan,
            stats: Arc::new(SimStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Debugger for SimDebugger {
    fn initialize(&self) -> Result<()> {
        self.stats.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) {
        self.stats.terminated.fetch_add(1, Ordering::SeqCst);
    }

    async fn create_session(&self, id: usize) -> Result<Box<dyn DebugSession>> {
        let script = self.plan.script_for(id);
        if script.behavior == Behavior::NoSession {
            return Err(Error::Internal("simulated session creation failure".to_string()));
        }
        self.stats.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimSession::new(
            id,
            self.functions.clone(),
            script,
            Arc::clone(&self.stats),
        )))
    }
}

/// Where the simulated program is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    NotStarted,
    AtEntry,
    AtExit,
    Stray,
    Faulted,
    Gone,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    event: DebugEvent,
    position: Position,
}

/// One simulated debugger instance
pub struct SimSession {
    id: usize,
    functions: Checkpoints,
    script: SessionScript,
    stats: Arc<SimStats>,
    asynchronous: bool,
    target: Option<String>,
    breakpoints: Vec<Checkpoint>,
    state: ProcessState,
    position: Position,
    subscriptions: Vec<EventCategory>,
    timeline: VecDeque<Scheduled>,
    destroyed: bool,
}

impl SimSession {
    fn new(id: usize, functions: Checkpoints, script: SessionScript, stats: Arc<SimStats>) -> Self {
        Self {
            id,
            functions,
            script,
            stats,
            asynchronous: false,
            target: None,
            breakpoints: Vec::new(),
            state: ProcessState::Unloaded,
            position: Position::NotStarted,
            subscriptions: Vec::new(),
            timeline: VecDeque::new(),
            destroyed: false,
        }
    }

    fn behaves(&self, behavior: Behavior) -> bool {
        self.script.behavior == behavior
    }

    fn has_breakpoint(&self, function: &str) -> bool {
        self.breakpoints
            .iter()
            .any(|bp| bp.verified && bp.name == function)
    }

    /// Queue a state change after the session's latency, preceded by output
    fn schedule(&mut self, state: ProcessState, position: Position) {
        let base = self
            .timeline
            .back()
            .map(|s| s.due)
            .unwrap_or_else(Instant::now);
        let due = base + self.script.latency;
        self.timeline.push_back(Scheduled {
            due,
            event: DebugEvent::other(OUTPUT_EVENT, self.state),
            position: self.position,
        });
        self.timeline.push_back(Scheduled {
            due,
            event: DebugEvent::state_changed(state),
            position,
        });
    }

    /// Where the process goes next when it runs from `from`
    fn next_stop(&self, from: Position) -> (ProcessState, Position) {
        let entry = self.functions.entry.as_str();
        let exit = self.functions.exit.as_str();
        match from {
            Position::NotStarted => {
                if self.behaves(Behavior::Crashes) {
                    (ProcessState::Crashed, Position::Faulted)
                } else if self.behaves(Behavior::WrongFirstStop) {
                    (ProcessState::Stopped, Position::Stray)
                } else if self.has_breakpoint(entry) {
                    (ProcessState::Stopped, Position::AtEntry)
                } else {
                    self.next_stop(Position::AtEntry)
                }
            }
            Position::AtEntry | Position::Stray => {
                if self.behaves(Behavior::ExitsEarly) || !self.has_breakpoint(exit) {
                    (ProcessState::Exited, Position::Gone)
                } else {
                    (ProcessState::Stopped, Position::AtExit)
                }
            }
            Position::AtExit | Position::Faulted | Position::Gone => {
                (ProcessState::Exited, Position::Gone)
            }
        }
    }

    /// Call stack at the current position, innermost first
    fn stack(&self) -> Vec<String> {
        let top = match self.position {
            Position::AtEntry => self.functions.entry.as_str(),
            Position::AtExit => self.functions.exit.as_str(),
            Position::Stray => STRAY_FUNCTION,
            Position::Faulted => "abort",
            Position::NotStarted | Position::Gone => return Vec::new(),
        };
        let mut frames = vec![self.render(top)];
        if self.position == Position::Faulted {
            frames.push(self.render(&self.functions.entry));
        }
        if self.behaves(Behavior::UnwoundStack) {
            frames.push("??".to_string());
        } else {
            frames.push(self.functions.root.clone());
            frames.push(LOADER_FRAME.to_string());
        }
        frames
    }

    fn render(&self, function: &str) -> String {
        if self.behaves(Behavior::ParenthesizedNames) {
            format!("{function}()")
        } else {
            function.to_string()
        }
    }

    fn wants(&self, category: &EventCategory) -> bool {
        self.subscriptions.contains(category)
    }

    fn has_thread(&self) -> bool {
        matches!(self.state, ProcessState::Stopped | ProcessState::Crashed)
            && self.position != Position::Gone
    }
}

#[async_trait]
impl DebugSession for SimSession {
    fn set_async(&mut self, enabled: bool) -> Result<()> {
        self.asynchronous = enabled;
        Ok(())
    }

    async fn create_target(&mut self, program: &str, _arch: &str) -> Result<()> {
        if self.behaves(Behavior::NoTarget) || program.is_empty() {
            return Err(Error::ProgramNotFound(program.to_string()));
        }
        self.target = Some(program.to_string());
        Ok(())
    }

    async fn create_breakpoint(
        &mut self,
        function: &str,
        _module: Option<&str>,
    ) -> Result<Checkpoint> {
        if self.target.is_none() {
            return Err(Error::invalid_state("set breakpoint", self.state));
        }
        let known = [
            self.functions.entry.as_str(),
            self.functions.exit.as_str(),
            self.functions.root.as_str(),
        ]
        .contains(&function);
        let suppressed = (self.behaves(Behavior::MissingEntryCheckpoint)
            && function == self.functions.entry)
            || (self.behaves(Behavior::MissingExitCheckpoint) && function == self.functions.exit);

        let checkpoint = Checkpoint {
            name: function.to_string(),
            id: Some(self.breakpoints.len() as u32 + 1),
            verified: known && !suppressed,
        };
        self.breakpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn launch(&mut self, _info: &LaunchInfo) -> Result<()> {
        if self.target.is_none() {
            return Err(Error::invalid_state("launch", self.state));
        }
        if self.behaves(Behavior::LaunchFails) {
            return Err(Error::Internal("simulated launch failure".to_string()));
        }
        self.state = ProcessState::Launching;
        self.schedule(ProcessState::Running, Position::NotStarted);
        if !self.behaves(Behavior::Hang) {
            let (state, position) = self.next_stop(Position::NotStarted);
            self.schedule(state, position);
        }
        Ok(())
    }

    fn subscribe(&mut self, category: EventCategory) -> bool {
        if self.behaves(Behavior::SubscribeFails) && category == EventCategory::StateChanged {
            return false;
        }
        if !self.subscriptions.contains(&category) {
            self.subscriptions.push(category);
        }
        true
    }

    async fn wait_for_event(&mut self, timeout: Duration) -> Option<DebugEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let due = match self.timeline.front() {
                Some(next) if next.due <= deadline => next.due,
                _ => {
                    sleep_until(deadline).await;
                    return None;
                }
            };
            sleep_until(due).await;
            let scheduled = self.timeline.pop_front()?;
            if scheduled.event.category == EventCategory::StateChanged {
                self.state = scheduled.event.state;
                self.position = scheduled.position;
            }
            if self.asynchronous && self.wants(&scheduled.event.category) {
                return Some(scheduled.event);
            }
        }
    }

    fn process_state(&self) -> ProcessState {
        self.state
    }

    async fn thread_at_index(&mut self, index: usize) -> Option<ThreadId> {
        (index == 0 && self.has_thread()).then_some(ThreadId(1))
    }

    async fn frame_count(&mut self, thread: ThreadId) -> usize {
        if thread == ThreadId(1) && self.has_thread() {
            self.stack().len()
        } else {
            0
        }
    }

    async fn function_name(&mut self, thread: ThreadId, index: usize) -> Option<String> {
        if thread != ThreadId(1) || !self.has_thread() {
            return None;
        }
        self.stack().into_iter().nth(index)
    }

    async fn resume(&mut self) -> Result<()> {
        SimStats::bump(&self.stats.resumes, self.id);
        if !matches!(self.state, ProcessState::Stopped | ProcessState::Crashed) {
            return Err(Error::invalid_state("resume", self.state));
        }
        self.state = ProcessState::Running;
        let from = self.position;
        self.schedule(ProcessState::Running, from);
        let (state, position) = self.next_stop(from);
        self.schedule(state, position);
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        SimStats::bump(&self.stats.kills, self.id);
        if !self.state.is_alive() {
            return Ok(());
        }
        if self.behaves(Behavior::KillRefused) {
            return Err(Error::Internal("simulated kill failure".to_string()));
        }
        // A killed process reports its exit even when it was hung
        self.timeline.clear();
        self.schedule(ProcessState::Exited, Position::Gone);
        Ok(())
    }

    async fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.timeline.clear();
            self.stats.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(200);

    async fn launched(behavior: Behavior) -> Box<dyn DebugSession> {
        let debugger = SimDebugger::new(Checkpoints::default(), SimPlan::uniform(behavior));
        let mut session = debugger.create_session(0).await.unwrap();
        session.set_async(true).unwrap();
        session.create_target("testprog", "x86_64").await.unwrap();
        session.create_breakpoint("bar", None).await.unwrap();
        session.create_breakpoint("foo", None).await.unwrap();
        session.launch(&LaunchInfo::default()).await.unwrap();
        assert!(session.subscribe(EventCategory::StateChanged));
        session
    }

    async fn next_state(session: &mut Box<dyn DebugSession>) -> ProcessState {
        loop {
            let event = session.wait_for_event(TICK).await.expect("event");
            if event.state.is_terminal() {
                return event.state;
            }
        }
    }

    #[tokio::test]
    async fn test_normal_run_stops_at_entry_then_exit() {
        let mut session = launched(Behavior::Normal).await;

        assert_eq!(next_state(&mut session).await, ProcessState::Stopped);
        let thread = session.thread_at_index(0).await.unwrap();
        assert_eq!(session.function_name(thread, 0).await.as_deref(), Some("foo"));
        assert_eq!(session.frame_count(thread).await, 3);

        session.resume().await.unwrap();
        assert_eq!(next_state(&mut session).await, ProcessState::Stopped);
        assert_eq!(session.function_name(thread, 0).await.as_deref(), Some("bar"));

        session.kill().await.unwrap();
        assert_eq!(next_state(&mut session).await, ProcessState::Exited);
        assert!(session.thread_at_index(0).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_exit_checkpoint_is_unverified() {
        let debugger = SimDebugger::new(
            Checkpoints::default(),
            SimPlan::uniform(Behavior::MissingExitCheckpoint),
        );
        let mut session = debugger.create_session(0).await.unwrap();
        session.create_target("testprog", "x86_64").await.unwrap();
        assert!(!session.create_breakpoint("bar", None).await.unwrap().is_valid());
        assert!(session.create_breakpoint("foo", None).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn test_breakpoint_before_target_fails() {
        let debugger = SimDebugger::new(Checkpoints::default(), SimPlan::default());
        let mut session = debugger.create_session(0).await.unwrap();
        assert!(session.create_breakpoint("bar", None).await.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribed_session_sees_no_events() {
        let debugger = SimDebugger::new(Checkpoints::default(), SimPlan::default());
        let mut session = debugger.create_session(0).await.unwrap();
        session.set_async(true).unwrap();
        session.create_target("testprog", "x86_64").await.unwrap();
        session.create_breakpoint("foo", None).await.unwrap();
        session.launch(&LaunchInfo::default()).await.unwrap();

        assert!(session.wait_for_event(TICK).await.is_none());
        // State still advances underneath
        assert_eq!(session.process_state(), ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_hang_never_changes_state_until_killed() {
        let mut session = launched(Behavior::Hang).await;
        let first = session.wait_for_event(TICK).await.unwrap();
        assert_eq!(first.state, ProcessState::Running);
        assert!(session.wait_for_event(TICK).await.is_none());

        session.kill().await.unwrap();
        assert_eq!(next_state(&mut session).await, ProcessState::Exited);
    }

    #[tokio::test]
    async fn test_parenthesized_names_leave_root_bare() {
        let mut session = launched(Behavior::ParenthesizedNames).await;
        next_state(&mut session).await;
        let thread = session.thread_at_index(0).await.unwrap();
        assert_eq!(
            session.function_name(thread, 0).await.as_deref(),
            Some("foo()")
        );
        assert_eq!(session.function_name(thread, 1).await.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn test_stats_track_lifecycle() {
        let debugger = SimDebugger::new(Checkpoints::default(), SimPlan::default());
        let stats = debugger.stats();
        debugger.initialize().unwrap();
        let mut session = debugger.create_session(4).await.unwrap();
        session.create_target("testprog", "x86_64").await.unwrap();
        assert!(session.resume().await.is_err());
        session.destroy().await;
        session.destroy().await;
        debugger.terminate();

        assert_eq!(stats.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(stats.sessions_created.load(Ordering::SeqCst), 1);
        assert_eq!(stats.sessions_destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(stats.resumes(4), 1);
        assert_eq!(stats.resumes(0), 0);
    }
}
