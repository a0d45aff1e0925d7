//! JSON run summary for CI consumption.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::types::RunResult;

/// Serialize `result` to pretty-printed JSON with trailing newline.
pub fn write_summary(path: &Path, result: &RunResult) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut payload = serde_json::to_string_pretty(result).context("serialize run summary")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BuildStatus, IterationRecord, StopReason};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    #[test]
    fn summary_uses_lowercase_statuses_and_snake_case_stop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out/summary.json");
        let result = RunResult {
            iterations: vec![IterationRecord {
                cycle: 1,
                status: BuildStatus::Failure,
                remediation_attempted: false,
                timestamp: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            }],
            final_status: BuildStatus::Failure,
            max_iterations_reached: true,
            stop: StopReason::IterationCapReached,
            attempts_used: 0,
            elapsed_secs: 12,
        };

        write_summary(&path, &result).expect("write");

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.ends_with("}\n"));
        let json: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json["final_status"], "failure");
        assert_eq!(json["stop"], "iteration_cap_reached");
        assert_eq!(json["max_iterations_reached"], true);
        assert_eq!(json["iterations"][0]["timestamp"], "2026-01-02T03:04:05Z");
    }
}
