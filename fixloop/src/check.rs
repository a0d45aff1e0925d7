//! One-shot status check for `fixloop check`.

use crate::core::classifier::classify;
use crate::core::types::BuildStatus;
use crate::io::command::{CommandError, CommandRunner, CommandSpec};

/// Classified result of a single status-check invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub status: BuildStatus,
    /// Trimmed stdout of the status-check command.
    pub raw: String,
}

/// Run the status-check command once and classify its output.
pub fn check_once<R: CommandRunner>(
    runner: &R,
    check: &CommandSpec,
) -> Result<CheckOutcome, CommandError> {
    let result = runner.run(check)?;
    Ok(CheckOutcome {
        status: classify(&result.stdout),
        raw: result.stdout,
    })
}
