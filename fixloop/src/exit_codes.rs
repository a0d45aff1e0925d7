//! Stable exit codes for fixloop CLI commands.

/// Build is green (run succeeded, or `check` saw a success status).
pub const OK: i32 = 0;
/// Build not green, cap reached, budget spent without success, or any error.
pub const FAILED: i32 = 1;
