//! Mock DAP adapter binary for integration testing
//!
//! This binary implements a minimal Debug Adapter Protocol server that
//! pretends to debug the standard controlled program: `main` calls `foo`,
//! then `bar`, then returns. `--behavior` makes it misbehave in one specific
//! way so the DAP backend can be tested without a real debugger.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};

const ROOT: &str = "main";
const ENTRY: &str = "foo";
const EXIT: &str = "bar";

#[derive(Parser)]
#[command(name = "mock_adapter", about = "Scripted DAP adapter for tests")]
struct Args {
    #[arg(long, value_enum, default_value_t = Behavior::Normal)]
    behavior: Behavior,

    /// Render non-root frames as `name()`
    #[arg(long)]
    paren_names: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Behavior {
    Normal,
    /// Process exits instead of stopping in `bar`
    ExitEarly,
    /// First stop is in `baz`
    WrongStop,
    /// Stacks never reach `main`
    NoRoot,
    /// The `bar` breakpoint never verifies
    UnverifiedExit,
    /// Process never stops after configurationDone
    Hang,
    /// Process faults before reaching `foo`
    Crash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Position {
    NotLaunched,
    Start,
    AtEntry,
    AtExit,
    Stray,
    Faulted,
    Exited,
}

fn main() {
    let args = Args::parse();
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::new(args.behavior, args.paren_names);

    loop {
        // Read Content-Length header
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).unwrap_or(0) == 0 {
            break; // EOF
        }

        if !header_line.starts_with("Content-Length:") {
            continue;
        }

        let content_length: usize = header_line
            .trim_start_matches("Content-Length:")
            .trim()
            .parse()
            .unwrap_or(0);

        // Read empty line
        let mut empty_line = String::new();
        reader.read_line(&mut empty_line).ok();

        // Read JSON body
        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).is_err() {
            break;
        }

        let message: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => continue,
        };

        if let Some(outgoing) = state.process_message(&message) {
            for message in outgoing {
                send_message(&mut writer, &message);
            }
        }
        if state.disconnected {
            break;
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let Ok(body) = serde_json::to_string(message) else {
        return;
    };
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).ok();
    writer.write_all(body.as_bytes()).ok();
    writer.flush().ok();
}

struct MockState {
    seq: i64,
    behavior: Behavior,
    paren_names: bool,
    position: Position,
    breakpoints: HashSet<String>,
    disconnected: bool,
}

impl MockState {
    fn new(behavior: Behavior, paren_names: bool) -> Self {
        Self {
            seq: 1,
            behavior,
            paren_names,
            position: Position::NotLaunched,
            breakpoints: HashSet::new(),
            disconnected: false,
        }
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn event(&mut self, name: &str, body: Value) -> Value {
        json!({
            "seq": self.next_seq(),
            "type": "event",
            "event": name,
            "body": body
        })
    }

    fn alive(&self) -> bool {
        !matches!(self.position, Position::NotLaunched | Position::Exited)
    }

    /// Run the program from the current position to its next stop
    fn run(&mut self, events: &mut Vec<Value>) {
        let output = self.event("output", json!({ "category": "stdout", "output": "tick\n" }));
        events.push(output);

        let (reason, next) = match self.position {
            Position::Start if self.behavior == Behavior::Crash => {
                ("exception", Position::Faulted)
            }
            Position::Start if self.behavior == Behavior::WrongStop => {
                ("breakpoint", Position::Stray)
            }
            Position::Start if self.breakpoints.contains(ENTRY) => {
                ("function breakpoint", Position::AtEntry)
            }
            Position::Start | Position::AtEntry | Position::Stray
                if self.behavior != Behavior::ExitEarly && self.breakpoints.contains(EXIT) =>
            {
                ("function breakpoint", Position::AtExit)
            }
            _ => {
                self.exit(0, events);
                return;
            }
        };

        self.position = next;
        let stopped = self.event(
            "stopped",
            json!({
                "reason": reason,
                "threadId": 1,
                "allThreadsStopped": true
            }),
        );
        events.push(stopped);
    }

    fn exit(&mut self, code: i32, events: &mut Vec<Value>) {
        self.position = Position::Exited;
        let exited = self.event("exited", json!({ "exitCode": code }));
        events.push(exited);
        let terminated = self.event("terminated", json!({}));
        events.push(terminated);
    }

    fn render(&self, name: &str) -> String {
        if self.paren_names {
            format!("{name}()")
        } else {
            name.to_string()
        }
    }

    fn stack(&self) -> Vec<String> {
        let mut frames = match self.position {
            Position::AtEntry => vec![self.render(ENTRY)],
            Position::AtExit => vec![self.render(EXIT)],
            Position::Stray => vec![self.render("baz")],
            Position::Faulted => vec![self.render("abort")],
            _ => return Vec::new(),
        };
        if self.behavior == Behavior::NoRoot {
            frames.push("??".to_string());
        } else {
            frames.push(ROOT.to_string());
            frames.push("_start".to_string());
        }
        frames
    }

    fn process_message(&mut self, message: &Value) -> Option<Vec<Value>> {
        let msg_type = message.get("type")?.as_str()?;

        if msg_type != "request" {
            return None;
        }

        let command = message.get("command")?.as_str()?;
        let request_seq = message.get("seq")?.as_i64()?;
        let arguments = message.get("arguments").cloned().unwrap_or(json!({}));

        let seq = self.next_seq();
        let mut events = Vec::new();

        let (success, body) = match command {
            "initialize" => (
                true,
                json!({
                    "supportsConfigurationDoneRequest": true,
                    "supportsFunctionBreakpoints": true,
                    "supportsTerminateRequest": true
                }),
            ),
            "launch" => match arguments.get("program").and_then(|v| v.as_str()) {
                Some(_) => {
                    self.position = Position::Start;
                    let initialized = self.event("initialized", json!({}));
                    events.push(initialized);
                    (true, json!(null))
                }
                None => (false, json!({ "message": "no program given" })),
            },
            "setFunctionBreakpoints" => {
                let requested = arguments
                    .get("breakpoints")
                    .and_then(|b| b.as_array())
                    .cloned()
                    .unwrap_or_default();
                self.breakpoints.clear();

                let breakpoints: Vec<Value> = requested
                    .iter()
                    .enumerate()
                    .map(|(i, bp)| {
                        let name = bp.get("name").and_then(|n| n.as_str()).unwrap_or("");
                        let known = [ROOT, ENTRY, EXIT].contains(&name);
                        let suppressed = self.behavior == Behavior::UnverifiedExit && name == EXIT;
                        let verified = known && !suppressed;
                        if verified {
                            self.breakpoints.insert(name.to_string());
                        }
                        let message = if verified {
                            format!("Breakpoint at function {}", name)
                        } else {
                            format!("No locations for {}", name)
                        };
                        json!({
                            "id": 100 + i,
                            "verified": verified,
                            "message": message
                        })
                    })
                    .collect();
                (true, json!({ "breakpoints": breakpoints }))
            }
            "configurationDone" => {
                let process = self.event("process", json!({ "name": "testprog" }));
                events.push(process);
                if self.behavior != Behavior::Hang {
                    self.run(&mut events);
                }
                (true, json!(null))
            }
            "continue" => {
                if self.alive() {
                    let continued = self.event(
                        "continued",
                        json!({ "threadId": 1, "allThreadsContinued": true }),
                    );
                    events.push(continued);
                    self.run(&mut events);
                    (true, json!({ "allThreadsContinued": true }))
                } else {
                    (false, json!({ "message": "process is not running" }))
                }
            }
            "threads" => {
                let threads = if self.alive() {
                    json!([{ "id": 1, "name": "testprog" }])
                } else {
                    json!([])
                };
                (true, json!({ "threads": threads }))
            }
            "stackTrace" => {
                let frames: Vec<Value> = self
                    .stack()
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| {
                        json!({
                            "id": i + 1,
                            "name": name,
                            "line": 0,
                            "column": 0
                        })
                    })
                    .collect();
                let total = frames.len();
                (true, json!({ "stackFrames": frames, "totalFrames": total }))
            }
            "terminate" => {
                if self.alive() {
                    self.exit(9, &mut events);
                }
                (true, json!(null))
            }
            "disconnect" => {
                let terminate = arguments
                    .get("terminateDebuggee")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if terminate && self.alive() {
                    self.exit(9, &mut events);
                }
                self.disconnected = true;
                (true, json!(null))
            }
            _ => (
                false,
                json!({ "message": format!("Unknown command: {}", command) }),
            ),
        };

        let mut response = json!({
            "seq": seq,
            "type": "response",
            "request_seq": request_seq,
            "success": success,
            "command": command,
        });
        if success {
            response["body"] = body;
        } else if let Some(message) = body.get("message") {
            response["message"] = message.clone();
        }

        // The response always goes out before the events it caused
        let mut outgoing = vec![response];
        outgoing.extend(events);
        Some(outgoing)
    }
}
