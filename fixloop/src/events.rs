//! Structured events emitted by the orchestrator.
//!
//! # Separation of Concerns
//!
//! - **Events (this module)**: what the loop decided and observed, in order.
//!   Sinks render them for humans ([`ConsoleSink`]) or as structured logs
//!   ([`TracingSink`]); tests record them.
//! - **Tracing (`logging`)**: developer diagnostics from the I/O layer.
//!
//! Sinks never influence control flow.

use std::time::Duration;

use tracing::{info, warn};

use crate::core::types::{BuildStatus, StopReason};

/// Why the loop is sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Between poll cycles.
    Poll,
    /// Before extracting failure details.
    GracePeriod,
}

impl WaitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            WaitReason::Poll => "poll",
            WaitReason::GracePeriod => "grace_period",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    CycleStarted {
        cycle: u32,
        elapsed: Duration,
    },
    StatusObserved {
        cycle: u32,
        status: BuildStatus,
        /// Trimmed status-check stdout.
        raw: String,
    },
    Waiting {
        cycle: u32,
        reason: WaitReason,
        duration: Duration,
    },
    FailureExtracted {
        cycle: u32,
        bytes: usize,
        /// Exit code of an extraction command whose non-zero exit was tolerated.
        tolerated_exit: Option<i32>,
    },
    RemediationStarted {
        cycle: u32,
        attempt: u32,
        max_attempts: u32,
    },
    RemediationFinished {
        cycle: u32,
        attempt: u32,
        success: bool,
    },
    ChangesDetected {
        cycle: u32,
        files: usize,
    },
    NoChanges {
        cycle: u32,
    },
    Published {
        cycle: u32,
    },
    /// The best-effort status check at budget exhaustion failed.
    FinalCheckFailed {
        error: String,
    },
    Terminated {
        reason: StopReason,
        final_status: BuildStatus,
        attempts_used: u32,
        elapsed: Duration,
    },
}

pub trait EventSink {
    fn emit(&self, event: &RunEvent);
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn emit(&self, event: &RunEvent) {
        (**self).emit(event);
    }
}

impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&self, event: &RunEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &RunEvent) {}
}

/// Emits each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::CycleStarted { cycle, elapsed } => {
                info!(cycle, elapsed_secs = elapsed.as_secs(), "cycle started");
            }
            RunEvent::StatusObserved { cycle, status, raw } => {
                info!(cycle, status = %status, raw = %raw, "status observed");
            }
            RunEvent::Waiting {
                cycle,
                reason,
                duration,
            } => {
                info!(
                    cycle,
                    reason = reason.as_str(),
                    secs = duration.as_secs(),
                    "waiting"
                );
            }
            RunEvent::FailureExtracted {
                cycle,
                bytes,
                tolerated_exit,
            } => {
                info!(cycle, bytes, tolerated_exit = ?tolerated_exit, "failure details extracted");
            }
            RunEvent::RemediationStarted {
                cycle,
                attempt,
                max_attempts,
            } => {
                info!(cycle, attempt, max_attempts, "remediation started");
            }
            RunEvent::RemediationFinished {
                cycle,
                attempt,
                success,
            } => {
                if *success {
                    info!(cycle, attempt, "remediation finished");
                } else {
                    warn!(cycle, attempt, "remediation session reported an error");
                }
            }
            RunEvent::ChangesDetected { cycle, files } => {
                info!(cycle, files, "workspace changes detected");
            }
            RunEvent::NoChanges { cycle } => {
                info!(cycle, "no workspace changes, skipping publish");
            }
            RunEvent::Published { cycle } => {
                info!(cycle, "changes published");
            }
            RunEvent::FinalCheckFailed { error } => {
                warn!(error = %error, "final status check failed");
            }
            RunEvent::Terminated {
                reason,
                final_status,
                attempts_used,
                elapsed,
            } => {
                info!(
                    reason = %reason,
                    final_status = %final_status,
                    attempts_used,
                    elapsed_secs = elapsed.as_secs(),
                    "run terminated"
                );
            }
        }
    }
}

/// Prints one human-readable line per event to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn render(event: &RunEvent) -> String {
        match event {
            RunEvent::CycleStarted { cycle, elapsed } => {
                format!("cycle {cycle}: started ({}s elapsed)", elapsed.as_secs())
            }
            RunEvent::StatusObserved { cycle, status, .. } => {
                format!("cycle {cycle}: build {status}")
            }
            RunEvent::Waiting {
                cycle,
                reason,
                duration,
            } => match reason {
                WaitReason::Poll => {
                    format!("cycle {cycle}: next check in {}s", duration.as_secs())
                }
                WaitReason::GracePeriod => format!(
                    "cycle {cycle}: waiting {}s for CI logs before extracting failures",
                    duration.as_secs()
                ),
            },
            RunEvent::FailureExtracted {
                cycle,
                bytes,
                tolerated_exit,
            } => match tolerated_exit {
                Some(code) => format!(
                    "cycle {cycle}: extracted {bytes} bytes of failure details (extractor exited {code})"
                ),
                None => format!("cycle {cycle}: extracted {bytes} bytes of failure details"),
            },
            RunEvent::RemediationStarted {
                cycle,
                attempt,
                max_attempts,
            } => format!("cycle {cycle}: remediation attempt {attempt}/{max_attempts}"),
            RunEvent::RemediationFinished {
                cycle,
                attempt,
                success,
            } => {
                if *success {
                    format!("cycle {cycle}: remediation attempt {attempt} finished")
                } else {
                    format!("cycle {cycle}: remediation attempt {attempt} reported an error")
                }
            }
            RunEvent::ChangesDetected { cycle, files } => {
                format!("cycle {cycle}: {files} changed file(s)")
            }
            RunEvent::NoChanges { cycle } => {
                format!("cycle {cycle}: no changes made, nothing to publish")
            }
            RunEvent::Published { cycle } => format!("cycle {cycle}: changes published"),
            RunEvent::FinalCheckFailed { error } => {
                format!("warning: final status check failed: {error}")
            }
            RunEvent::Terminated {
                reason,
                final_status,
                attempts_used,
                elapsed,
            } => format!(
                "done: {reason}, build {final_status}, {attempts_used} remediation attempt(s), {}s",
                elapsed.as_secs()
            ),
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &RunEvent) {
        println!("{}", Self::render(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Counting {
        seen: RefCell<u32>,
    }

    impl EventSink for Counting {
        fn emit(&self, _event: &RunEvent) {
            *self.seen.borrow_mut() += 1;
        }
    }

    #[test]
    fn pair_sink_forwards_to_both() {
        let a = Counting::default();
        let b = Counting::default();
        let pair = (&a, &b);
        pair.emit(&RunEvent::Published { cycle: 1 });
        assert_eq!(*a.seen.borrow(), 1);
        assert_eq!(*b.seen.borrow(), 1);
    }

    #[test]
    fn console_renders_termination_summary() {
        let line = ConsoleSink::render(&RunEvent::Terminated {
            reason: StopReason::IterationCapReached,
            final_status: BuildStatus::Failure,
            attempts_used: 2,
            elapsed: Duration::from_secs(95),
        });
        assert_eq!(
            line,
            "done: iteration cap reached, build failure, 2 remediation attempt(s), 95s"
        );
    }

    #[test]
    fn console_mentions_tolerated_extractor_exit() {
        let line = ConsoleSink::render(&RunEvent::FailureExtracted {
            cycle: 3,
            bytes: 120,
            tolerated_exit: Some(1),
        });
        assert!(line.contains("extractor exited 1"));
    }
}
