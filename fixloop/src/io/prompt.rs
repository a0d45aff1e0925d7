//! Remediation prompt rendering.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::debug;

const REMEDIATION_TEMPLATE: &str = include_str!("prompts/remediation.md");

/// Default cap on failure-detail bytes spliced into the prompt.
pub const DEFAULT_FAILURE_BUDGET_BYTES: usize = 40_000;

/// Inputs for one remediation prompt.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    /// Operator-supplied instructions from the work spec.
    pub instructions: &'a str,
    /// Extracted CI failure text.
    pub failure_detail: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Builds prompts, keeping the tail of oversized failure logs.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    failure_budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(failure_budget_bytes: usize) -> Self {
        Self {
            failure_budget_bytes,
        }
    }

    pub fn build(&self, inputs: &PromptInputs<'_>) -> Result<String> {
        let (failure_detail, truncated_bytes) =
            keep_tail(inputs.failure_detail.trim(), self.failure_budget_bytes);
        if truncated_bytes > 0 {
            debug!(truncated_bytes, "failure detail truncated for prompt");
        }

        let mut env = Environment::new();
        env.add_template("remediation.md", REMEDIATION_TEMPLATE)
            .context("load remediation template")?;
        let template = env
            .get_template("remediation.md")
            .context("get remediation template")?;
        let rendered = template
            .render(context! {
                instructions => inputs.instructions.trim(),
                failure_detail => failure_detail,
                attempt => inputs.attempt,
                max_attempts => inputs.max_attempts,
                truncated_bytes => truncated_bytes,
            })
            .context("render remediation prompt")?;
        Ok(rendered)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_BUDGET_BYTES)
    }
}

/// Keep at most `budget` trailing bytes of `text`, cut on a char boundary.
///
/// CI logs put the decisive errors last, so the head is dropped.
fn keep_tail(text: &str, budget: usize) -> (&str, usize) {
    if text.len() <= budget {
        return (text, 0);
    }
    let mut start = text.len() - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    (&text[start..], start)
}
