//! CI fix loop: poll a build, remediate failures with an agent, publish fixes.
//!
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (status classification, budget
//!   arithmetic, result types). No I/O.
//! - **[`io`]**: Side-effecting collaborators (process execution, the
//!   remediation agent, config files, time). Each sits behind a trait so the
//!   loop can be driven by scripted doubles in tests.
//!
//! [`orchestrator`] coordinates the two; [`check`] backs the one-shot CLI
//! command and [`events`] carries the run narrative to its sinks.

pub mod check;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
