//! DAP client for communicating with debug adapters
//!
//! A background reader task owns the adapter's stdout. It routes responses to
//! the request waiting on them and pushes events into a channel, so waiting
//! for an event with a timeout never cuts a message in half.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::codec;
use super::types::*;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;

/// DAP client for communicating with a debug adapter
pub struct DapClient {
    /// Adapter subprocess
    adapter: Child,
    /// Buffered writer for adapter stdin
    writer: BufWriter<ChildStdin>,
    /// Sequence number for requests
    seq: AtomicI64,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
    /// Requests waiting for their response
    pending: PendingMap,
    /// Events read by the background task, until someone takes them
    event_rx: Option<mpsc::UnboundedReceiver<Event>>,
    /// Events consumed while waiting for `initialized`
    backlog: VecDeque<Event>,
    /// Background reader
    reader_task: JoinHandle<()>,
    /// Upper bound on a single request round trip
    request_timeout: Duration,
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client
    ///
    /// Must be called from within a tokio runtime; the reader task is spawned
    /// onto it.
    pub fn spawn(adapter_path: &Path, args: &[String], request_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(
            BufReader::new(stdout),
            Arc::clone(&pending),
            event_tx,
        ));

        Ok(Self {
            adapter,
            writer: BufWriter::new(stdin),
            seq: AtomicI64::new(1),
            capabilities: Capabilities::default(),
            pending,
            event_rx: Some(event_rx),
            backlog: VecDeque::new(),
            reader_task,
            request_timeout,
        })
    }

    /// Take the event receiver (can only be called once)
    ///
    /// Events that arrived while waiting for `initialized` are returned with it
    /// so nothing is lost.
    pub fn take_events(&mut self) -> Option<(VecDeque<Event>, mpsc::UnboundedReceiver<Event>)> {
        let rx = self.event_rx.take()?;
        Some((std::mem::take(&mut self.backlog), rx))
    }

    /// Get the next sequence number
    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a request and return its sequence number
    async fn send_request(&mut self, command: &str, arguments: Option<Value>) -> Result<i64> {
        let seq = self.next_seq();
        self.write_request(seq, command, arguments).await?;
        Ok(seq)
    }

    async fn write_request(
        &mut self,
        seq: i64,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<()> {
        let mut request = serde_json::json!({
            "seq": seq,
            "type": "request",
            "command": command,
        });
        if let Some(args) = arguments {
            request["arguments"] = args;
        }

        let json = serde_json::to_string(&request)?;
        tracing::trace!("DAP >>> {}", json);

        codec::write_message(&mut self.writer, &json).await
    }

    /// Send a request and wait for the response
    pub async fn request<T: serde::de::DeserializeOwned>(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        // Registered before writing so a fast reply can't slip past us
        self.lock_pending()?.insert(seq, tx);

        if let Err(e) = self.write_request(seq, command, arguments).await {
            self.lock_pending()?.remove(&seq);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(Error::AdapterCrashed),
            Err(_) => {
                self.lock_pending()?.remove(&seq);
                return Err(Error::DapTimeout {
                    command: command.to_string(),
                    secs: self.request_timeout.as_secs(),
                });
            }
        };

        if !response.success {
            return Err(Error::dap_request_failed(
                command,
                response.message.as_deref().unwrap_or("Unknown error"),
            ));
        }

        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
        })
    }

    fn lock_pending(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<i64, oneshot::Sender<ResponseMessage>>>> {
        self.pending
            .lock()
            .map_err(|_| Error::Internal("DAP pending map poisoned".to_string()))
    }

    /// Initialize the debug adapter
    pub async fn initialize(&mut self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeArguments::for_adapter(adapter_id);

        let caps: Capabilities = self
            .request("initialize", Some(serde_json::to_value(&args)?))
            .await?;

        self.capabilities = caps.clone();
        Ok(caps)
    }

    /// Wait for the `initialized` event
    ///
    /// Other events seen on the way are kept for whoever takes the event stream.
    pub async fn wait_initialized(&mut self, timeout: Duration) -> Result<()> {
        let rx = self
            .event_rx
            .as_mut()
            .ok_or_else(|| Error::Internal("Event stream already taken".to_string()))?;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(Event::Initialized)) => return Ok(()),
                Ok(Some(event)) => self.backlog.push_back(event),
                Ok(None) => return Err(Error::AdapterCrashed),
                Err(_) => {
                    return Err(Error::DapTimeout {
                        command: "initialized".to_string(),
                        secs: timeout.as_secs(),
                    })
                }
            }
        }
    }

    /// Send the launch request
    pub async fn launch(&mut self, args: LaunchArguments) -> Result<()> {
        self.request::<Value>("launch", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Signal that configuration is done; the debuggee starts running
    pub async fn configuration_done(&mut self) -> Result<()> {
        self.request::<Value>("configurationDone", None).await?;
        Ok(())
    }

    /// Replace the full set of function breakpoints
    pub async fn set_function_breakpoints(
        &mut self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetFunctionBreakpointsArguments { breakpoints };

        let response: SetBreakpointsResponseBody = self
            .request(
                "setFunctionBreakpoints",
                Some(serde_json::to_value(&args)?),
            )
            .await?;

        Ok(response.breakpoints)
    }

    /// Continue execution
    pub async fn continue_execution(&mut self, thread_id: i64) -> Result<()> {
        let args = ContinueArguments {
            thread_id,
            single_thread: false,
        };

        self.request::<Value>("continue", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Get the full stack trace of a thread
    pub async fn stack_trace(&mut self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(0),
            levels: None,
        };

        let response: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.stack_frames)
    }

    /// Get threads
    pub async fn threads(&mut self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Ask the adapter to terminate the debuggee
    pub async fn terminate_debuggee(&mut self) -> Result<()> {
        if self.capabilities.supports_terminate_request {
            self.request::<Value>("terminate", None).await?;
        } else {
            let args = DisconnectArguments {
                restart: false,
                terminate_debuggee: Some(true),
            };
            self.send_request("disconnect", Some(serde_json::to_value(&args)?))
                .await?;
        }
        Ok(())
    }

    /// Disconnect from the debug adapter
    pub async fn disconnect(&mut self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };

        // Don't wait for response - adapter might exit immediately
        self.send_request("disconnect", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(())
    }

    /// Shut the adapter down
    pub async fn shutdown(&mut self) {
        let _ = self.disconnect(true).await;

        if tokio::time::timeout(Duration::from_millis(500), self.adapter.wait())
            .await
            .is_err()
        {
            let _ = self.adapter.kill().await;
        }
        self.reader_task.abort();
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        // Best-effort, we can't await in drop
        let _ = self.adapter.start_kill();
        self.reader_task.abort();
    }
}

/// Read messages until the adapter closes its stdout
async fn read_loop(
    mut reader: BufReader<ChildStdout>,
    pending: PendingMap,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        let json = match codec::read_message(&mut reader).await {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(error = %e, "DAP reader stopped");
                break;
            }
        };
        tracing::trace!("DAP <<< {}", json);

        let msg: Value = match serde_json::from_str(&json) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed DAP message");
                continue;
            }
        };

        match msg.get("type").and_then(|v| v.as_str()).unwrap_or("unknown") {
            "response" => match serde_json::from_value::<ResponseMessage>(msg) {
                Ok(response) => {
                    let waiter = pending
                        .lock()
                        .ok()
                        .and_then(|mut map| map.remove(&response.request_seq));
                    if let Some(tx) = waiter {
                        let _ = tx.send(response);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Dropping malformed DAP response"),
            },
            "event" => match serde_json::from_value::<EventMessage>(msg) {
                Ok(event_msg) => {
                    let _ = events.send(Event::from_message(&event_msg));
                }
                Err(e) => tracing::warn!(error = %e, "Dropping malformed DAP event"),
            },
            other => tracing::warn!("Unknown message type: {}", other),
        }
    }

    // Dropping the pending senders wakes every in-flight request with an error
    if let Ok(mut map) = pending.lock() {
        map.clear();
    }
}
