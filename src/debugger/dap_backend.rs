//! Debug Adapter Protocol backend
//!
//! Every session spawns its own adapter process. DAP wants the launch request
//! before any breakpoint, so target creation sends `launch` and waits for
//! `initialized`; breakpoints then go in during the configuration phase and
//! the process only starts running on `configurationDone`.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};

use super::{
    Checkpoint, DebugEvent, DebugSession, Debugger, EventCategory, LaunchInfo, ProcessState,
    ThreadId,
};
use crate::common::config::{AdapterConfig, Config};
use crate::common::{Error, Result};
use crate::dap::{DapClient, Event, FunctionBreakpoint, LaunchArguments, StackFrame, Thread};

/// Debugger library backed by an external debug adapter
pub struct DapDebugger {
    adapter_name: String,
    adapter: AdapterConfig,
    init_timeout: Duration,
    request_timeout: Duration,
}

impl DapDebugger {
    /// Pick the adapter named `adapter`, or the configured default
    pub fn from_config(config: &Config, adapter: Option<&str>) -> Result<Self> {
        let adapter_name = adapter.unwrap_or(&config.defaults.adapter).to_string();
        let adapter_config = config
            .get_adapter(&adapter_name)
            .ok_or_else(|| Error::adapter_not_found(&adapter_name, &[&adapter_name]))?;

        Ok(Self {
            adapter_name,
            adapter: adapter_config,
            init_timeout: Duration::from_secs(config.timeouts.dap_initialize_secs),
            request_timeout: Duration::from_secs(config.timeouts.dap_request_secs),
        })
    }

    pub fn adapter_path(&self) -> &Path {
        &self.adapter.path
    }
}

#[async_trait]
impl Debugger for DapDebugger {
    fn initialize(&self) -> Result<()> {
        tracing::debug!(
            adapter = %self.adapter_name,
            path = %self.adapter.path.display(),
            args = ?self.adapter.args,
            "using debug adapter"
        );
        Ok(())
    }

    fn terminate(&self) {
        tracing::debug!(adapter = %self.adapter_name, "debugger terminated");
    }

    async fn create_session(&self, id: usize) -> Result<Box<dyn DebugSession>> {
        let mut client =
            DapClient::spawn(&self.adapter.path, &self.adapter.args, self.request_timeout)?;

        let capabilities =
            tokio::time::timeout(self.init_timeout, client.initialize(&self.adapter_name))
                .await
                .map_err(|_| Error::DapTimeout {
                    command: "initialize".to_string(),
                    secs: self.init_timeout.as_secs(),
                })??;
        tracing::debug!(session = id, ?capabilities, "adapter initialized");

        Ok(Box::new(DapSession::new(id, client, self.init_timeout)))
    }
}

/// Adapter events not yet consumed by `wait_for_event`
struct EventStream {
    backlog: VecDeque<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    async fn next(&mut self, deadline: Instant) -> std::result::Result<Option<Event>, ()> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(Some(event));
        }
        timeout_at(deadline, self.rx.recv()).await.map_err(|_| ())
    }
}

/// One adapter process and the program it debugs
pub struct DapSession {
    id: usize,
    client: DapClient,
    init_timeout: Duration,
    asynchronous: bool,
    target: Option<PathBuf>,
    breakpoints: Vec<FunctionBreakpoint>,
    events: Option<EventStream>,
    subscriptions: Vec<EventCategory>,
    state: ProcessState,
    stopped_thread: Option<i64>,
    threads: Option<Vec<Thread>>,
    frames: HashMap<i64, Vec<StackFrame>>,
}

impl DapSession {
    fn new(id: usize, client: DapClient, init_timeout: Duration) -> Self {
        Self {
            id,
            client,
            init_timeout,
            asynchronous: true,
            target: None,
            breakpoints: Vec::new(),
            events: None,
            subscriptions: Vec::new(),
            state: ProcessState::Unloaded,
            stopped_thread: None,
            threads: None,
            frames: HashMap::new(),
        }
    }

    /// Drop cached threads and stacks; they are only valid for one stop
    fn invalidate(&mut self) {
        self.threads = None;
        self.frames.clear();
    }

    /// Track an adapter event and translate it
    fn apply(&mut self, event: Event) -> DebugEvent {
        let Some(state) = next_state(&event, self.state) else {
            return DebugEvent::other(event.name(), self.state);
        };

        match &event {
            Event::Stopped(body) => {
                tracing::debug!(session = self.id, reason = %body.reason, "process stopped");
                self.stopped_thread = body.thread_id;
            }
            Event::Exited(body) => {
                tracing::debug!(session = self.id, exit_code = body.exit_code, "process exited");
                self.stopped_thread = None;
            }
            _ => self.stopped_thread = None,
        }
        self.state = state;
        self.invalidate();
        DebugEvent::state_changed(state)
    }

    async fn frames(&mut self, thread: ThreadId) -> Option<&[StackFrame]> {
        if !self.frames.contains_key(&thread.0) {
            match self.client.stack_trace(thread.0).await {
                Ok(frames) => {
                    self.frames.insert(thread.0, frames);
                }
                Err(e) => {
                    tracing::debug!(session = self.id, thread = thread.0, error = %e, "stackTrace failed");
                    return None;
                }
            }
        }
        self.frames.get(&thread.0).map(Vec::as_slice)
    }
}

/// State an adapter event moves the process to, if it is a state change
fn next_state(event: &Event, current: ProcessState) -> Option<ProcessState> {
    match event {
        Event::Stopped(body) if body.reason == "exception" => Some(ProcessState::Crashed),
        Event::Stopped(_) => Some(ProcessState::Stopped),
        Event::Continued { .. } => Some(ProcessState::Running),
        Event::Exited(_) => Some(ProcessState::Exited),
        Event::Terminated if current != ProcessState::Exited => Some(ProcessState::Exited),
        _ => None,
    }
}

/// Find the controlled program as a path, or on PATH
fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.exists() {
        return Ok(path.canonicalize()?);
    }
    which::which(program).map_err(|_| Error::ProgramNotFound(program.to_string()))
}

fn is_default_launch(info: &LaunchInfo) -> bool {
    info.args.is_empty() && info.env.is_none() && info.cwd.is_none() && !info.stop_on_entry
}

#[async_trait]
impl DebugSession for DapSession {
    fn set_async(&mut self, enabled: bool) -> Result<()> {
        if !enabled {
            return Err(Error::Unsupported(
                "synchronous event delivery".to_string(),
            ));
        }
        self.asynchronous = true;
        Ok(())
    }

    async fn create_target(&mut self, program: &str, arch: &str) -> Result<()> {
        if self.target.is_some() {
            return Err(Error::invalid_state("create a second target", self.state));
        }
        let path = resolve_program(program)?;
        let cwd = std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned());

        self.client
            .launch(LaunchArguments {
                program: path.to_string_lossy().into_owned(),
                args: Vec::new(),
                cwd,
                env: None,
                stop_on_entry: false,
                target_triple: Some(arch.to_string()),
            })
            .await?;
        self.client.wait_initialized(self.init_timeout).await?;

        tracing::debug!(session = self.id, program = %path.display(), arch, "target created");
        self.target = Some(path);
        Ok(())
    }

    async fn create_breakpoint(
        &mut self,
        function: &str,
        module: Option<&str>,
    ) -> Result<Checkpoint> {
        if self.target.is_none() {
            return Err(Error::invalid_state("set breakpoint", self.state));
        }
        if let Some(module) = module {
            tracing::debug!(session = self.id, module, "module qualifier ignored over DAP");
        }

        // The request replaces the whole set, so send every breakpoint so far
        self.breakpoints.push(FunctionBreakpoint {
            name: function.to_string(),
            condition: None,
        });
        let results = match self
            .client
            .set_function_breakpoints(self.breakpoints.clone())
            .await
        {
            Ok(results) => results,
            Err(e) => {
                self.breakpoints.pop();
                return Err(e);
            }
        };

        let resolved = results.get(self.breakpoints.len() - 1);
        if let Some(message) = resolved.and_then(|bp| bp.message.as_deref()) {
            tracing::debug!(session = self.id, function, message, "breakpoint message");
        }
        Ok(Checkpoint {
            name: function.to_string(),
            id: resolved.and_then(|bp| bp.id),
            verified: resolved.map(|bp| bp.verified).unwrap_or(false),
        })
    }

    async fn launch(&mut self, info: &LaunchInfo) -> Result<()> {
        if self.target.is_none() {
            return Err(Error::invalid_state("launch", self.state));
        }
        if !is_default_launch(info) {
            return Err(Error::Unsupported(
                "launch parameters after target creation".to_string(),
            ));
        }
        self.client.configuration_done().await?;
        self.state = ProcessState::Launching;
        Ok(())
    }

    fn subscribe(&mut self, category: EventCategory) -> bool {
        if self.events.is_none() {
            let Some((backlog, rx)) = self.client.take_events() else {
                return false;
            };
            self.events = Some(EventStream { backlog, rx });
        }
        if !self.subscriptions.contains(&category) {
            self.subscriptions.push(category);
        }
        true
    }

    async fn wait_for_event(&mut self, timeout: Duration) -> Option<DebugEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(stream) = self.events.as_mut() else {
                sleep_until(deadline).await;
                return None;
            };

            let next = stream.next(deadline).await;
            let event = match next {
                Ok(Some(event)) => self.apply(event),
                Ok(None) => {
                    // Adapter is gone; whatever it was debugging went with it
                    tracing::debug!(session = self.id, "adapter event stream closed");
                    self.events = None;
                    if !self.state.is_alive() {
                        continue;
                    }
                    self.state = ProcessState::Crashed;
                    self.invalidate();
                    DebugEvent::state_changed(ProcessState::Crashed)
                }
                Err(()) => return None,
            };

            if self.asynchronous && self.subscriptions.contains(&event.category) {
                return Some(event);
            }
        }
    }

    fn process_state(&self) -> ProcessState {
        self.state
    }

    async fn thread_at_index(&mut self, index: usize) -> Option<ThreadId> {
        if !self.state.is_alive() {
            return None;
        }
        if self.threads.is_none() {
            match self.client.threads().await {
                Ok(threads) => self.threads = Some(threads),
                Err(e) => {
                    tracing::debug!(session = self.id, error = %e, "threads request failed");
                    return None;
                }
            }
        }
        self.threads
            .as_ref()
            .and_then(|threads| threads.get(index))
            .map(|thread| ThreadId(thread.id))
    }

    async fn frame_count(&mut self, thread: ThreadId) -> usize {
        self.frames(thread).await.map_or(0, <[StackFrame]>::len)
    }

    async fn function_name(&mut self, thread: ThreadId, index: usize) -> Option<String> {
        self.frames(thread)
            .await?
            .get(index)
            .map(|frame| frame.name.clone())
    }

    async fn resume(&mut self) -> Result<()> {
        if !matches!(self.state, ProcessState::Stopped | ProcessState::Crashed) {
            return Err(Error::invalid_state("resume", self.state));
        }
        let thread = match self.stopped_thread {
            Some(id) => id,
            None => self
                .thread_at_index(0)
                .await
                .map(|thread| thread.0)
                .ok_or_else(|| Error::invalid_state("resume without a thread", self.state))?,
        };

        self.client.continue_execution(thread).await?;
        self.state = ProcessState::Running;
        self.stopped_thread = None;
        self.invalidate();
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        if !self.state.is_alive() {
            return Ok(());
        }
        self.client.terminate_debuggee().await
    }

    async fn destroy(&mut self) {
        self.events = None;
        self.client.shutdown().await;
        tracing::trace!(session = self.id, "adapter shut down");
    }
}
