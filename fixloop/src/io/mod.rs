//! Side-effecting collaborators: processes, the agent, config and time.

pub mod agent;
pub mod clock;
pub mod command;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
pub mod summary;
