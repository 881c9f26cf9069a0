//! Text summary builder for CLI output.
//!
//! Formats a finished optimization as human-readable lines for text mode.

use crate::model::{JobOutcome, OptimizeError};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from the submitted prompt and the terminal outcome.
pub(crate) fn build_text_summary(initial_prompt: &str, outcome: &JobOutcome) -> TextSummary {
    let mut lines = Vec::new();

    lines.push("Prompt:".to_string());
    lines.extend(initial_prompt.lines().map(|l| format!("  {l}")));

    match outcome {
        JobOutcome::Improved { final_prompt } => {
            lines.push("Improved prompt:".to_string());
            lines.extend(final_prompt.lines().map(|l| format!("  {l}")));
        }
        JobOutcome::Failed {
            error: OptimizeError::Cancelled,
        } => {
            lines.push("Cancelled before completion.".to_string());
        }
        failed => {
            lines.push(failed.display_text());
        }
    }

    TextSummary { lines }
}
