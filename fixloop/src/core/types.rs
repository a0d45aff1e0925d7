//! Shared deterministic types for the fix loop.
//!
//! These types define the contract between the orchestrator and its callers.
//! They carry no I/O handles and serialize to stable JSON for run summaries.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state classification of a CI build, derived fresh on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failure,
    Pending,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry for one poll cycle. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Poll cycle index (1-indexed).
    pub cycle: u32,
    /// Status observed by this cycle's status check.
    pub status: BuildStatus,
    /// True if the remediation agent was invoked during this cycle.
    pub remediation_attempted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Why the loop stopped. Exactly one reason holds per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The status check reported success.
    Succeeded,
    /// The wall-clock budget ran out at the start of a cycle.
    BudgetExceeded,
    /// A failure was observed after all remediation attempts were spent.
    IterationCapReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Succeeded => "succeeded",
            StopReason::BudgetExceeded => "budget exceeded",
            StopReason::IterationCapReached => "iteration cap reached",
        };
        f.write_str(label)
    }
}

/// Final outcome of an orchestration run, built once at loop exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// One record per poll cycle, in chronological order.
    pub iterations: Vec<IterationRecord>,
    /// Status observed when the loop terminated.
    pub final_status: BuildStatus,
    pub max_iterations_reached: bool,
    pub stop: StopReason,
    /// Remediation attempts consumed against the cap.
    pub attempts_used: u32,
    pub elapsed_secs: u64,
}

impl RunResult {
    /// True when the run should be reported as a success to the caller.
    pub fn is_success(&self) -> bool {
        self.final_status == BuildStatus::Success
    }
}
