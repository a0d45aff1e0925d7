//! Fix loop configuration stored in `fixloop.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::io::agent::WorkSpec;
use crate::io::command::CommandSpec;
use crate::io::git::default_status_command;
use crate::orchestrator::RunConfig;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "fixloop.toml";

/// Upper bound for any single wait or timeout, in seconds (one week).
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 60 * 60;
/// Upper bound for the whole-run budget (one week).
pub const MAX_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

const CONFIG_TEMPLATE: &str = r#"# fixloop configuration.
#
# Commands are either a string (run through `sh -c`) or an array
# (program + arguments, no shell).

# Seconds between status checks. Failure extraction waits 3x this first.
poll_interval_secs = 30
# Wall-clock budget for the whole run.
timeout_minutes = 60
# Remediation attempts before giving up.
max_work_iterations = 5
# Timeout for each status/extract/publish command.
command_timeout_secs = 300
# Timeout for one remediation agent session.
agent_timeout_secs = 1800
# Bytes of command and agent output kept in memory.
output_limit_bytes = 1000000

[commands]
# Must print a status keyword (success/passed/ok, failure/failed/error, pending/running/queued).
check = "gh run list --branch \"$(git branch --show-current)\" --limit 1 --json status,conclusion --jq '.[0].conclusion // .[0].status'"
# Prints failure details for the latest failed run.
extract = "gh run view \"$(gh run list --branch \"$(git branch --show-current)\" --limit 1 --json databaseId --jq '.[0].databaseId')\" --log-failed"
# Ships the agent's edits.
publish = "git add -A && git commit -m 'fix: address CI failure' && git push"
# Lists working-tree changes in porcelain format.
change_check = ["git", "status", "--porcelain=v1", "-uall"]

[work]
# Agent invocation; {prompt} is replaced with the rendered remediation prompt.
command = ["claude", "-p", "{prompt}", "--output-format", "stream-json", "--verbose", "--dangerously-skip-permissions"]
prompt = "The CI build for this branch is failing. Find the root cause and fix it."
# transcript = ".fixloop/agent.log"
"#;

/// Fix loop configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "defaults::timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "defaults::max_work_iterations")]
    pub max_work_iterations: u32,
    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "defaults::agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    #[serde(default = "defaults::output_limit_bytes")]
    pub output_limit_bytes: usize,
    pub commands: CommandsConfig,
    pub work: WorkSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandsConfig {
    pub check: CommandSpec,
    pub extract: CommandSpec,
    pub publish: CommandSpec,
    #[serde(default = "default_status_command")]
    pub change_check: CommandSpec,
}

mod defaults {
    pub fn poll_interval_secs() -> u64 {
        30
    }
    pub fn timeout_minutes() -> u64 {
        60
    }
    pub fn max_work_iterations() -> u32 {
        5
    }
    pub fn command_timeout_secs() -> u64 {
        5 * 60
    }
    pub fn agent_timeout_secs() -> u64 {
        30 * 60
    }
    pub fn output_limit_bytes() -> usize {
        1_000_000
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {} (run `fixloop init` to create one)", .0.display())]
    NotFound(PathBuf),
    #[error("read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config:\n- {}", .0.join("\n- "))]
    Invalid(Vec<String>),
}

/// Command-line overrides applied on top of the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub poll_interval_secs: Option<u64>,
    pub timeout_minutes: Option<u64>,
    pub max_work_iterations: Option<u32>,
}

impl Config {
    /// Collect every violation rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        check_range(
            &mut errors,
            "poll_interval_secs",
            self.poll_interval_secs,
            MAX_WAIT_SECS,
        );
        check_range(
            &mut errors,
            "timeout_minutes",
            self.timeout_minutes,
            MAX_TIMEOUT_MINUTES,
        );
        if self.max_work_iterations == 0 {
            errors.push("max_work_iterations must be > 0".to_string());
        }
        check_range(
            &mut errors,
            "command_timeout_secs",
            self.command_timeout_secs,
            MAX_WAIT_SECS,
        );
        check_range(
            &mut errors,
            "agent_timeout_secs",
            self.agent_timeout_secs,
            MAX_WAIT_SECS,
        );
        if self.output_limit_bytes == 0 {
            errors.push("output_limit_bytes must be > 0".to_string());
        }
        for (name, spec) in [
            ("commands.check", &self.commands.check),
            ("commands.extract", &self.commands.extract),
            ("commands.publish", &self.commands.publish),
            ("commands.change_check", &self.commands.change_check),
        ] {
            if spec.is_empty() {
                errors.push(format!("{name} must be a non-empty string or array"));
            }
        }
        if let Err(err) = self.work.validate() {
            errors.push(format!("work.command: {err}"));
        }
        if self.work.prompt.trim().is_empty() {
            errors.push("work.prompt must not be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Apply overrides and re-validate.
    pub fn with_overrides(mut self, overrides: &Overrides) -> Result<Self, ConfigError> {
        if let Some(secs) = overrides.poll_interval_secs {
            self.poll_interval_secs = secs;
        }
        if let Some(minutes) = overrides.timeout_minutes {
            self.timeout_minutes = minutes;
        }
        if let Some(max) = overrides.max_work_iterations {
            self.max_work_iterations = max;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            budget: Duration::from_secs(self.timeout_minutes.saturating_mul(60)),
            max_work_iterations: self.max_work_iterations,
            check: self.commands.check.clone(),
            extract: self.commands.extract.clone(),
            publish: self.commands.publish.clone(),
            change_check: self.commands.change_check.clone(),
            work: self.work.clone(),
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
        }
    }
}

fn check_range(errors: &mut Vec<String>, name: &str, value: u64, max: u64) {
    if value == 0 {
        errors.push(format!("{name} must be > 0"));
    } else if value > max {
        errors.push(format!("{name} must be at most {max}"));
    }
}

/// Parse and validate config text.
pub fn parse_config(path: &Path, contents: &str) -> Result<Config, ConfigError> {
    let cfg: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file. A missing file is an error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(path, &contents)
}

/// Commented starter config.
pub fn default_config_template() -> &'static str {
    CONFIG_TEMPLATE
}

/// Atomically write raw config text to disk (temp file + rename).
pub fn write_config_text(path: &Path, contents: &str) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
