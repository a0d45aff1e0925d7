//! Scripted collaborators for driving the orchestrator without processes or sleeps.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::events::{EventSink, RunEvent};
use crate::io::agent::{AgentError, AgentRequest, AgentResponse, RemediationAgent, WorkSpec};
use crate::io::clock::Clock;
use crate::io::command::{CommandError, CommandResult, CommandRunner, CommandSpec};
use crate::orchestrator::RunConfig;

/// Config with one-word shell commands (`check`, `extract`, `publish`, `changes`).
///
/// Poll interval 10s, budget 60min, three remediation attempts.
pub fn run_config() -> RunConfig {
    RunConfig {
        poll_interval: Duration::from_secs(10),
        budget: Duration::from_secs(60 * 60),
        max_work_iterations: 3,
        check: CommandSpec::shell("check"),
        extract: CommandSpec::shell("extract"),
        publish: CommandSpec::shell("publish"),
        change_check: CommandSpec::shell("changes"),
        work: WorkSpec {
            command: vec!["agent".to_string(), "{prompt}".to_string()],
            prompt: "Fix the build.".to_string(),
            transcript: None,
        },
        agent_timeout: Duration::from_secs(30 * 60),
    }
}

/// Canned outcome of one command invocation.
#[derive(Debug, Clone)]
pub enum Scripted {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

impl Scripted {
    /// Exit 0 with the given stdout.
    pub fn stdout(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    pub fn exit(code: i32, stdout: &str, stderr: &str) -> Self {
        Scripted::Exit {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn to_result(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError> {
        match self {
            Scripted::Exit {
                code: 0,
                stdout,
                stderr,
            } => Ok(CommandResult {
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
                exit_code: 0,
            }),
            Scripted::Exit {
                code,
                stdout,
                stderr,
            } => Err(CommandError::Failed {
                command: spec.to_string(),
                exit_code: Some(*code),
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
            }),
            Scripted::TimedOut => Err(CommandError::TimedOut {
                command: spec.to_string(),
                timeout: Duration::from_secs(1),
            }),
        }
    }
}

/// Command runner answering from per-command queues.
///
/// The last queued response for a command repeats once the queue drains.
/// Unscripted commands fail with `CommandError::Io`.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    queues: RefCell<HashMap<String, VecDeque<Scripted>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, spec: &CommandSpec, responses: Vec<Scripted>) -> Self {
        self.queues
            .borrow_mut()
            .insert(spec.to_string(), responses.into());
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, spec: &CommandSpec) -> usize {
        let key = spec.to_string();
        self.calls.borrow().iter().filter(|c| **c == key).count()
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError> {
        let key = spec.to_string();
        self.calls.borrow_mut().push(key.clone());
        let mut queues = self.queues.borrow_mut();
        let Some(queue) = queues.get_mut(&key) else {
            return Err(CommandError::Io {
                command: key,
                source: anyhow::anyhow!("unscripted command"),
            });
        };
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(scripted) => scripted.to_result(spec),
            None => Err(CommandError::Io {
                command: key,
                source: anyhow::anyhow!("empty script"),
            }),
        }
    }
}

/// Canned outcome of one agent session.
#[derive(Debug, Clone)]
pub enum ScriptedAgentOutcome {
    Response(AgentResponse),
    Failed { exit_code: i32, stderr: String },
    TimedOut,
}

/// Agent answering from a queue; the last outcome repeats.
#[derive(Debug)]
pub struct ScriptedAgent {
    outcomes: RefCell<VecDeque<ScriptedAgentOutcome>>,
    requests: RefCell<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(outcomes: Vec<ScriptedAgentOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Successful session with the given output.
    pub fn done(output: &str) -> ScriptedAgentOutcome {
        ScriptedAgentOutcome::Response(AgentResponse {
            success: true,
            output: output.to_string(),
        })
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl RemediationAgent for ScriptedAgent {
    fn remediate(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        self.requests.borrow_mut().push(request.clone());
        let mut outcomes = self.outcomes.borrow_mut();
        let next = if outcomes.len() > 1 {
            outcomes.pop_front()
        } else {
            outcomes.front().cloned()
        };
        match next {
            Some(ScriptedAgentOutcome::Response(response)) => Ok(response),
            Some(ScriptedAgentOutcome::Failed { exit_code, stderr }) => Err(AgentError::Failed {
                exit_code: Some(exit_code),
                stderr,
            }),
            Some(ScriptedAgentOutcome::TimedOut) => Err(AgentError::TimedOut {
                timeout: request.timeout,
            }),
            None => Err(AgentError::Invocation(anyhow::anyhow!(
                "unscripted agent call"
            ))),
        }
    }
}

/// Clock whose time only moves when slept on or advanced.
#[derive(Debug)]
pub struct FakeClock {
    base: Instant,
    offset: Cell<Duration>,
    sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Cell::new(Duration::ZERO),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.base + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        self.advance(duration);
    }
}

/// Sink that keeps every event for assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: RefCell<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.borrow().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &RunEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
