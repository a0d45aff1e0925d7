//! Remediation agent abstraction.
//!
//! The [`RemediationAgent`] trait decouples the orchestrator from the actual
//! agent backend (an AI coding CLI such as `claude -p`). The CLI backend
//! streams session messages on stdout; they are folded into a single bounded
//! transcript so the orchestrator only ever sees the final response.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Placeholder in the work command replaced by the rendered prompt.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// How to invoke the remediation agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSpec {
    /// Program and arguments; at least one argument must contain `{prompt}`.
    pub command: Vec<String>,
    /// Operator instructions placed at the top of every prompt.
    pub prompt: String,
    /// Optional file receiving the raw agent stdout as it streams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<PathBuf>,
}

impl WorkSpec {
    /// Check the invocation template is usable.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(AgentError::EmptyCommand);
        }
        if !self
            .command
            .iter()
            .any(|arg| arg.contains(PROMPT_PLACEHOLDER))
        {
            return Err(AgentError::MissingPromptPlaceholder {
                command: self.command.join(" "),
            });
        }
        Ok(())
    }

    /// Substitute the prompt into the command template.
    pub fn render_argv(&self, prompt: &str) -> Result<Vec<String>, AgentError> {
        self.validate()?;
        Ok(self
            .command
            .iter()
            .map(|arg| arg.replace(PROMPT_PLACEHOLDER, prompt))
            .collect())
    }
}

/// One remediation request.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub work: WorkSpec,
    /// Failure text spliced into the prompt.
    pub failure_detail: String,
    /// 1-indexed remediation attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Bound on the whole agent session.
    pub timeout: Duration,
}

/// Final, accumulated result of an agent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    /// False when the session itself reported an error.
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("work command is empty")]
    EmptyCommand,
    #[error("work command must contain the {{prompt}} placeholder: `{command}`")]
    MissingPromptPlaceholder { command: String },
    #[error("failed to invoke remediation agent")]
    Invocation(#[source] anyhow::Error),
    #[error("remediation agent exited with {}{}", exit_label(.exit_code), stderr_suffix(.stderr))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("remediation agent timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    match stderr.lines().find(|line| !line.trim().is_empty()) {
        Some(line) => format!(": {}", line.trim()),
        None => String::new(),
    }
}

/// Abstraction over remediation agent backends.
pub trait RemediationAgent {
    /// Run one remediation session against the working tree.
    fn remediate(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;
}

/// Agent that spawns the configured CLI with the prompt substituted into its argv.
#[derive(Debug, Clone)]
pub struct CliAgent {
    workdir: PathBuf,
    output_limit_bytes: usize,
    prompts: PromptBuilder,
}

impl CliAgent {
    pub fn new(workdir: impl Into<PathBuf>, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            output_limit_bytes,
            prompts: PromptBuilder::default(),
        }
    }
}

impl RemediationAgent for CliAgent {
    #[instrument(skip_all, fields(attempt = request.attempt, timeout_secs = request.timeout.as_secs()))]
    fn remediate(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let prompt = self
            .prompts
            .build(&PromptInputs {
                instructions: &request.work.prompt,
                failure_detail: &request.failure_detail,
                attempt: request.attempt,
                max_attempts: request.max_attempts,
            })
            .map_err(AgentError::Invocation)?;
        let argv = request.work.render_argv(&prompt)?;

        info!(program = %argv[0], workdir = %self.workdir.display(), "starting remediation agent");
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).current_dir(&self.workdir);

        let output = run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            self.output_limit_bytes,
            request.work.transcript.as_deref(),
            false,
        )
        .map_err(AgentError::Invocation)?;

        if output.timed_out {
            warn!(
                timeout_secs = request.timeout.as_secs(),
                "remediation agent timed out"
            );
            return Err(AgentError::TimedOut {
                timeout: request.timeout,
            });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "remediation agent failed");
            return Err(AgentError::Failed {
                exit_code: output.status.code(),
                stderr: output.stderr_lossy().trim().to_string(),
            });
        }

        let response = fold_session(&output.stdout_lossy(), self.output_limit_bytes);
        debug!(
            success = response.success,
            output_bytes = response.output.len(),
            "remediation agent finished"
        );
        Ok(response)
    }
}

/// Fold streamed session output into a single bounded response.
///
/// Each stdout line is either a JSON session message or plain text:
/// - `{"type":"assistant","message":{"content":[{"type":"text","text":..}]}}` contributes its text blocks
/// - `{"type":"result","result":..,"is_error":..}` sets success and contributes its
///   text only when nothing else was collected
/// - any other object with a top-level `text` string contributes it
/// - other JSON messages (tool calls, system events) are dropped
/// - non-JSON lines are kept verbatim
pub fn fold_session(stdout: &str, limit: usize) -> AgentResponse {
    let mut acc = BoundedText::new(limit);
    let mut success = true;
    let mut result_text: Option<String> = None;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let message = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => map,
            _ => {
                acc.push(line);
                continue;
            }
        };

        match message.get("type").and_then(Value::as_str) {
            Some("assistant") => {
                let blocks = message
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array);
                for block in blocks.into_iter().flatten() {
                    if block.get("type").and_then(Value::as_str) == Some("text")
                        && let Some(text) = block.get("text").and_then(Value::as_str)
                    {
                        acc.push(text);
                    }
                }
            }
            Some("result") => {
                if message.get("is_error").and_then(Value::as_bool) == Some(true) {
                    success = false;
                }
                result_text = message
                    .get("result")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            _ => {
                if let Some(text) = message.get("text").and_then(Value::as_str) {
                    acc.push(text);
                }
            }
        }
    }

    if acc.is_empty()
        && let Some(text) = result_text
    {
        acc.push(&text);
    }

    AgentResponse {
        success,
        output: acc.finish(),
    }
}

/// Text accumulator that stops growing at a byte limit.
struct BoundedText {
    buf: String,
    limit: usize,
    dropped: usize,
}

impl BoundedText {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
            dropped: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn push(&mut self, text: &str) {
        let sep = usize::from(!self.buf.is_empty());
        let remaining = self.limit.saturating_sub(self.buf.len() + sep);
        if self.dropped > 0 || remaining == 0 {
            self.dropped += text.len();
            return;
        }
        if sep == 1 {
            self.buf.push('\n');
        }
        if text.len() <= remaining {
            self.buf.push_str(text);
            return;
        }
        let mut end = remaining;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.push_str(&text[..end]);
        self.dropped += text.len() - end;
    }

    fn finish(mut self) -> String {
        if self.dropped > 0 {
            self.buf
                .push_str(&format!("\n[agent output truncated {} bytes]", self.dropped));
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(command: &[&str]) -> WorkSpec {
        WorkSpec {
            command: command.iter().map(|s| s.to_string()).collect(),
            prompt: "Fix CI.".to_string(),
            transcript: None,
        }
    }

    #[test]
    fn work_spec_requires_prompt_placeholder() {
        let err = work(&["claude", "-p"]).validate().unwrap_err();
        assert!(matches!(err, AgentError::MissingPromptPlaceholder { .. }));
        assert!(err.to_string().contains("{prompt}"));

        assert!(matches!(
            work(&[]).validate().unwrap_err(),
            AgentError::EmptyCommand
        ));
        work(&["claude", "-p", "{prompt}"])
            .validate()
            .expect("valid");
    }

    #[test]
    fn render_argv_substitutes_placeholder_inside_arguments() {
        let argv = work(&["agent", "--message={prompt}", "--yes"])
            .render_argv("do it")
            .expect("render");
        assert_eq!(argv, vec!["agent", "--message=do it", "--yes"]);
    }

    #[test]
    fn fold_session_collects_assistant_text_and_plain_lines() {
        let stdout = r#"{"type":"system","subtype":"init"}
{"type":"assistant","message":{"content":[{"type":"text","text":"Looking at the failure."},{"type":"tool_use","name":"Edit"}]}}
plain progress line
{"type":"assistant","message":{"content":[{"type":"text","text":"Fixed the test."}]}}
{"type":"result","result":"Fixed the test.","is_error":false}
"#;
        let response = fold_session(stdout, 10_000);
        assert!(response.success);
        assert_eq!(
            response.output,
            "Looking at the failure.\nplain progress line\nFixed the test."
        );
    }

    #[test]
    fn fold_session_uses_result_when_nothing_else_and_reports_errors() {
        let stdout = r#"{"type":"result","result":"rate limited","is_error":true}"#;
        let response = fold_session(stdout, 10_000);
        assert!(!response.success);
        assert_eq!(response.output, "rate limited");
    }

    #[test]
    fn fold_session_is_bounded() {
        let stdout = "0123456789\nabcdefghij\n";
        let response = fold_session(stdout, 14);
        assert_eq!(response.output, "0123456789\nabc\n[agent output truncated 7 bytes]");
    }

    #[cfg(unix)]
    #[test]
    fn cli_agent_runs_command_with_prompt_and_writes_transcript() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = temp.path().join("agent.log");
        let agent = CliAgent::new(temp.path(), 100_000);
        let request = AgentRequest {
            work: WorkSpec {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "printf '%s' \"$1\" | grep -c 'boom' ; echo done".to_string(),
                    "agent".to_string(),
                    "{prompt}".to_string(),
                ],
                prompt: "Fix CI.".to_string(),
                transcript: Some(transcript.clone()),
            },
            failure_detail: "boom".to_string(),
            attempt: 1,
            max_attempts: 3,
            timeout: Duration::from_secs(10),
        };

        let response = agent.remediate(&request).expect("remediate");
        assert!(response.success);
        assert_eq!(response.output, "1\ndone");
        let teed = std::fs::read_to_string(&transcript).expect("transcript");
        assert_eq!(teed, "1\ndone\n");
    }

    #[cfg(unix)]
    #[test]
    fn cli_agent_reports_timeout_and_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CliAgent::new(temp.path(), 1000);
        let mut request = AgentRequest {
            work: work(&["sh", "-c", "exec sleep 30", "{prompt}"]),
            failure_detail: "boom".to_string(),
            attempt: 1,
            max_attempts: 1,
            timeout: Duration::from_millis(200),
        };
        assert!(matches!(
            agent.remediate(&request).unwrap_err(),
            AgentError::TimedOut { .. }
        ));

        request.work = work(&["sh", "-c", "echo nope >&2; exit 4", "{prompt}"]);
        request.timeout = Duration::from_secs(10);
        match agent.remediate(&request).unwrap_err() {
            AgentError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, Some(4));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn cli_agent_rejects_missing_placeholder_before_spawning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = CliAgent::new(temp.path(), 1000);
        let request = AgentRequest {
            work: work(&["sh", "-c", "touch spawned"]),
            failure_detail: "boom".to_string(),
            attempt: 1,
            max_attempts: 1,
            timeout: Duration::from_secs(10),
        };

        let err = agent.remediate(&request).unwrap_err();

        assert!(matches!(err, AgentError::MissingPromptPlaceholder { .. }));
        assert!(!temp.path().join("spawned").exists());
    }
}
