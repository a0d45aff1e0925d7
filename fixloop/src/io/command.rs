//! External command execution for status checks, extraction and publishing.
//!
//! The [`CommandRunner`] trait decouples the orchestrator from process
//! spawning. Tests use scripted runners that return canned output.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// How an external command is invoked.
///
/// In TOML a plain string is run through the shell; an array is executed
/// directly as program + arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Exec(Vec<String>),
}

impl CommandSpec {
    pub fn shell(script: impl Into<String>) -> Self {
        CommandSpec::Shell(script.into())
    }

    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::Exec(argv.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CommandSpec::Shell(script) => script.trim().is_empty(),
            CommandSpec::Exec(argv) => argv
                .first()
                .is_none_or(|program| program.trim().is_empty()),
        }
    }

    fn to_command(&self) -> Command {
        match self {
            CommandSpec::Shell(script) => shell_command(script),
            CommandSpec::Exec(argv) => {
                let mut cmd = Command::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
        }
    }
}

#[cfg(unix)]
fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[cfg(windows)]
fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(script);
    cmd
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell(script) => f.write_str(script),
            CommandSpec::Exec(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

/// Output of a command that exited with status 0. Streams are trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum CommandError {
    /// The command ran to completion with a non-zero exit (or was killed by a signal).
    #[error("`{command}` exited with {}{}", exit_label(.exit_code), stderr_suffix(.stderr))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },
    #[error("failed to run `{command}`")]
    Io {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CommandError {
    /// Text the command managed to print before failing, if any.
    ///
    /// Only `Failed` carries output; stdout and stderr are joined by a newline.
    pub fn captured_output(&self) -> Option<String> {
        match self {
            CommandError::Failed { stdout, stderr, .. } => {
                let joined = join_nonempty(stdout, stderr);
                (!joined.is_empty()).then_some(joined)
            }
            CommandError::TimedOut { .. } | CommandError::Io { .. } => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Failed { exit_code, .. } => *exit_code,
            CommandError::TimedOut { .. } | CommandError::Io { .. } => None,
        }
    }
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

/// Join the non-empty parts of two outputs with a newline.
pub fn join_nonempty(first: &str, second: &str) -> String {
    match (first.is_empty(), second.is_empty()) {
        (false, false) => format!("{first}\n{second}"),
        (false, true) => first.to_string(),
        (true, false) => second.to_string(),
        (true, true) => String::new(),
    }
}

/// Abstraction over command execution backends.
pub trait CommandRunner {
    /// Run the command to completion. Any non-zero exit is an error.
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError>;
}

/// Runner that spawns real processes in a working directory.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl SystemCommandRunner {
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl CommandRunner for SystemCommandRunner {
    #[instrument(skip_all, fields(command = %spec, timeout_secs = self.timeout.as_secs()))]
    fn run(&self, spec: &CommandSpec) -> Result<CommandResult, CommandError> {
        let command = spec.to_string();
        if spec.is_empty() {
            return Err(CommandError::Io {
                command,
                source: anyhow::anyhow!("empty command"),
            });
        }

        let mut cmd = spec.to_command();
        cmd.current_dir(&self.workdir);

        // Own process group so a timeout also takes down shell pipelines.
        let output = run_command_with_timeout(
            cmd,
            None,
            self.timeout,
            self.output_limit_bytes,
            None,
            true,
        )
        .map_err(|source| CommandError::Io {
            command: command.clone(),
            source,
        })?;

        if output.timed_out {
            return Err(CommandError::TimedOut {
                command,
                timeout: self.timeout,
            });
        }

        let stdout = output.stdout_lossy().trim().to_string();
        let stderr = output.stderr_lossy().trim().to_string();
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "command failed");
            return Err(CommandError::Failed {
                command,
                exit_code: output.status.code(),
                stdout,
                stderr,
            });
        }

        debug!(stdout_bytes = stdout.len(), "command succeeded");
        Ok(CommandResult {
            stdout,
            stderr,
            exit_code: 0,
        })
    }
}
