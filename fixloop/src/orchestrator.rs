//! Poll / remediate / publish loop.
//!
//! Each cycle starts with a wall-clock budget check, then polls the build
//! status. Pending builds are re-polled after the poll interval. Failed builds
//! consume one remediation attempt: wait out the grace period, extract failure
//! details, run the agent, and publish its edits if the working tree changed.
//! The loop ends on success, budget exhaustion, or when a failure is observed
//! with no attempts left.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::core::budget::{Budget, grace_period};
use crate::core::classifier::{classify, match_keywords};
use crate::core::types::{BuildStatus, IterationRecord, RunResult, StopReason};
use crate::events::{EventSink, RunEvent, WaitReason};
use crate::io::agent::{AgentError, AgentRequest, RemediationAgent, WorkSpec};
use crate::io::clock::Clock;
use crate::io::command::{CommandError, CommandRunner, CommandSpec};
use crate::io::git::parse_porcelain;

/// Immutable parameters for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole run.
    pub budget: Duration,
    /// Maximum remediation attempts.
    pub max_work_iterations: u32,
    /// Prints the build status.
    pub check: CommandSpec,
    /// Prints failure details for the failing build.
    pub extract: CommandSpec,
    /// Ships the agent's edits (commit + push).
    pub publish: CommandSpec,
    /// Prints working-tree changes in `git status --porcelain` format.
    pub change_check: CommandSpec,
    pub work: WorkSpec,
    pub agent_timeout: Duration,
}

/// External call a command failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StatusCheck,
    FailureExtraction,
    ChangeDetection,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::StatusCheck => "status check",
            Stage::FailureExtraction => "failure extraction",
            Stage::ChangeDetection => "change detection",
            Stage::Publish => "publish",
        };
        f.write_str(label)
    }
}

/// Unrecovered failure of an external collaborator. Aborts the run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{stage} failed")]
    Command {
        stage: Stage,
        #[source]
        source: CommandError,
    },
    #[error("remediation failed")]
    Agent(#[from] AgentError),
}

impl RunError {
    fn command(stage: Stage) -> impl FnOnce(CommandError) -> RunError {
        move |source| RunError::Command { stage, source }
    }
}

/// Drives one run against borrowed collaborators.
pub struct Orchestrator<'a, R, A, C, S> {
    commands: &'a R,
    agent: &'a A,
    clock: &'a C,
    events: &'a S,
}

impl<'a, R, A, C, S> Orchestrator<'a, R, A, C, S>
where
    R: CommandRunner,
    A: RemediationAgent,
    C: Clock,
    S: EventSink,
{
    pub fn new(commands: &'a R, agent: &'a A, clock: &'a C, events: &'a S) -> Self {
        Self {
            commands,
            agent,
            clock,
            events,
        }
    }

    /// Run the loop to a terminal outcome.
    ///
    /// Budget and cap exhaustion are normal outcomes reported in the
    /// [`RunResult`]; only collaborator failures are errors. No partial result
    /// is returned on error.
    pub fn run(&self, config: &RunConfig) -> Result<RunResult, RunError> {
        let budget = Budget::new(self.clock.now(), config.budget);
        let mut iterations: Vec<IterationRecord> = Vec::new();
        let mut attempts = 0u32;
        let mut cycle = 0u32;

        loop {
            cycle += 1;

            // The budget is only consulted between cycles; an in-flight
            // remediation always runs to completion.
            let now = self.clock.now();
            if budget.is_exceeded(now) {
                let last_seen = iterations
                    .last()
                    .map_or(BuildStatus::Pending, |record| record.status);
                let final_status = self.final_status(config, cycle, last_seen);
                return Ok(self.finish(
                    iterations,
                    final_status,
                    StopReason::BudgetExceeded,
                    attempts,
                    &budget,
                ));
            }
            self.events.emit(&RunEvent::CycleStarted {
                cycle,
                elapsed: budget.elapsed(now),
            });

            let status = self.check_status(config, cycle)?;
            match status {
                BuildStatus::Success => {
                    iterations.push(record(cycle, status, false));
                    return Ok(self.finish(
                        iterations,
                        status,
                        StopReason::Succeeded,
                        attempts,
                        &budget,
                    ));
                }
                BuildStatus::Pending => {
                    iterations.push(record(cycle, status, false));
                    self.wait(cycle, WaitReason::Poll, config.poll_interval);
                    continue;
                }
                BuildStatus::Failure => {}
            }

            if attempts >= config.max_work_iterations {
                iterations.push(record(cycle, status, false));
                return Ok(self.finish(
                    iterations,
                    status,
                    StopReason::IterationCapReached,
                    attempts,
                    &budget,
                ));
            }
            attempts += 1;

            self.wait(
                cycle,
                WaitReason::GracePeriod,
                grace_period(config.poll_interval),
            );
            let failure_detail = self.extract_failures(config, cycle)?;

            self.events.emit(&RunEvent::RemediationStarted {
                cycle,
                attempt: attempts,
                max_attempts: config.max_work_iterations,
            });
            let response = self.agent.remediate(&AgentRequest {
                work: config.work.clone(),
                failure_detail,
                attempt: attempts,
                max_attempts: config.max_work_iterations,
                timeout: config.agent_timeout,
            })?;
            self.events.emit(&RunEvent::RemediationFinished {
                cycle,
                attempt: attempts,
                success: response.success,
            });

            let changed_files = self.count_changes(config)?;
            iterations.push(record(cycle, status, true));
            if changed_files == 0 {
                self.events.emit(&RunEvent::NoChanges { cycle });
                self.wait(cycle, WaitReason::Poll, config.poll_interval);
                continue;
            }
            self.events.emit(&RunEvent::ChangesDetected {
                cycle,
                files: changed_files,
            });

            self.commands
                .run(&config.publish)
                .map_err(RunError::command(Stage::Publish))?;
            self.events.emit(&RunEvent::Published { cycle });
            self.wait(cycle, WaitReason::Poll, config.poll_interval);
        }
    }

    fn check_status(&self, config: &RunConfig, cycle: u32) -> Result<BuildStatus, RunError> {
        let result = self
            .commands
            .run(&config.check)
            .map_err(RunError::command(Stage::StatusCheck))?;
        Ok(self.observe(cycle, result.stdout))
    }

    fn observe(&self, cycle: u32, raw: String) -> BuildStatus {
        if match_keywords(&raw).is_none() {
            tracing::debug!(cycle, raw = %raw, "unrecognized status, treating as pending");
        }
        let status = classify(&raw);
        self.events
            .emit(&RunEvent::StatusObserved { cycle, status, raw });
        status
    }

    /// Best-effort status check at budget exhaustion; falls back to `last_seen`.
    fn final_status(&self, config: &RunConfig, cycle: u32, last_seen: BuildStatus) -> BuildStatus {
        match self.commands.run(&config.check) {
            Ok(result) => self.observe(cycle, result.stdout),
            Err(err) => {
                self.events.emit(&RunEvent::FinalCheckFailed {
                    error: err.to_string(),
                });
                last_seen
            }
        }
    }

    /// Run the extraction command, tolerating a non-zero exit that still printed output.
    fn extract_failures(&self, config: &RunConfig, cycle: u32) -> Result<String, RunError> {
        let (detail, tolerated_exit) = match self.commands.run(&config.extract) {
            Ok(result) => {
                let detail = if result.stdout.is_empty() {
                    result.stderr
                } else {
                    result.stdout
                };
                (detail, None)
            }
            Err(err) => match err.captured_output() {
                Some(detail) => (detail, err.exit_code()),
                None => {
                    return Err(RunError::Command {
                        stage: Stage::FailureExtraction,
                        source: err,
                    });
                }
            },
        };
        self.events.emit(&RunEvent::FailureExtracted {
            cycle,
            bytes: detail.len(),
            tolerated_exit,
        });
        Ok(detail)
    }

    fn count_changes(&self, config: &RunConfig) -> Result<usize, RunError> {
        let result = self
            .commands
            .run(&config.change_check)
            .map_err(RunError::command(Stage::ChangeDetection))?;
        Ok(parse_porcelain(&result.stdout).len())
    }

    fn wait(&self, cycle: u32, reason: WaitReason, duration: Duration) {
        self.events.emit(&RunEvent::Waiting {
            cycle,
            reason,
            duration,
        });
        self.clock.sleep(duration);
    }

    fn finish(
        &self,
        iterations: Vec<IterationRecord>,
        final_status: BuildStatus,
        stop: StopReason,
        attempts_used: u32,
        budget: &Budget,
    ) -> RunResult {
        let elapsed = budget.elapsed(self.clock.now());
        self.events.emit(&RunEvent::Terminated {
            reason: stop,
            final_status,
            attempts_used,
            elapsed,
        });
        RunResult {
            iterations,
            final_status,
            max_iterations_reached: stop == StopReason::IterationCapReached,
            stop,
            attempts_used,
            elapsed_secs: elapsed.as_secs(),
        }
    }
}

fn record(cycle: u32, status: BuildStatus, remediation_attempted: bool) -> IterationRecord {
    IterationRecord {
        cycle,
        status,
        remediation_attempted,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        FakeClock, RecordingSink, Scripted, ScriptedAgent, ScriptedCommandRunner, run_config,
    };

    #[test]
    fn pending_then_success_sleeps_one_poll_interval() {
        let config = run_config();
        let commands = ScriptedCommandRunner::new().script(
            &config.check,
            vec![Scripted::stdout("queued"), Scripted::stdout("passed")],
        );
        let agent = ScriptedAgent::new(Vec::new());
        let clock = FakeClock::new();
        let events = RecordingSink::default();

        let result = Orchestrator::new(&commands, &agent, &clock, &events)
            .run(&config)
            .expect("run");

        assert_eq!(result.stop, StopReason::Succeeded);
        assert_eq!(result.iterations.len(), 2);
        assert_eq!(result.iterations[0].status, BuildStatus::Pending);
        assert_eq!(result.iterations[1].cycle, 2);
        assert_eq!(clock.sleeps(), vec![config.poll_interval]);
        assert_eq!(agent.requests().len(), 0);
    }

    #[test]
    fn grace_period_precedes_extraction() {
        let config = run_config();
        let commands = ScriptedCommandRunner::new()
            .script(
                &config.check,
                vec![Scripted::stdout("failed"), Scripted::stdout("success")],
            )
            .script(&config.extract, vec![Scripted::stdout("assertion failed")])
            .script(&config.change_check, vec![Scripted::stdout(" M src/lib.rs")])
            .script(&config.publish, vec![Scripted::stdout("pushed")]);
        let agent = ScriptedAgent::new(vec![ScriptedAgent::done("fixed")]);
        let clock = FakeClock::new();
        let events = RecordingSink::default();

        let result = Orchestrator::new(&commands, &agent, &clock, &events)
            .run(&config)
            .expect("run");

        assert_eq!(result.stop, StopReason::Succeeded);
        assert_eq!(result.attempts_used, 1);
        assert_eq!(
            clock.sleeps(),
            vec![config.poll_interval * 3, config.poll_interval]
        );
        assert_eq!(
            commands.calls(),
            vec!["check", "extract", "changes", "publish", "check"]
        );
        let request = &agent.requests()[0];
        assert_eq!(request.failure_detail, "assertion failed");
        assert_eq!(request.attempt, 1);
        assert_eq!(request.timeout, config.agent_timeout);
    }

    #[test]
    fn status_check_failure_aborts_with_stage() {
        let config = run_config();
        let commands = ScriptedCommandRunner::new()
            .script(&config.check, vec![Scripted::exit(2, "", "gh: not logged in")]);
        let agent = ScriptedAgent::new(Vec::new());
        let clock = FakeClock::new();
        let events = RecordingSink::default();

        let err = Orchestrator::new(&commands, &agent, &clock, &events)
            .run(&config)
            .unwrap_err();

        assert!(matches!(
            err,
            RunError::Command {
                stage: Stage::StatusCheck,
                ..
            }
        ));
        assert_eq!(
            format!("{:#}", anyhow::Error::from(err)),
            "status check failed: `check` exited with exit code 2: gh: not logged in"
        );
    }

    #[test]
    fn stage_labels_are_human_readable() {
        assert_eq!(Stage::FailureExtraction.to_string(), "failure extraction");
        assert_eq!(Stage::ChangeDetection.to_string(), "change detection");
    }
}
