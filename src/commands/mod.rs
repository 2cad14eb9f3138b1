//! Command implementations for the `trackbridge` binary.
//!
//! Each `cmd_*` function drives one [`Bridge`](crate::bridge::Bridge)
//! operation and renders the result as text or, with `--json`, as JSON.

mod analyze;
mod audit;
mod execute;
mod history;
mod ignore;
mod link;
mod watch;

pub use analyze::cmd_analyze;
pub use audit::cmd_audit;
pub use execute::cmd_execute;
pub use history::{cmd_history, cmd_rollback};
pub use ignore::{cmd_ignore_add, cmd_ignore_clear_temp, cmd_ignore_ls, cmd_ignore_remove};
pub use link::{cmd_link, cmd_unlink};
pub use watch::{WatchOptions, cmd_check, cmd_watch};

use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputOptions;
use crate::error::Result;
use crate::sync::OutcomeStatus;

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A result with both a JSON and a text rendering.
pub struct CommandOutput {
    json: Value,
    text: Option<String>,
}

impl CommandOutput {
    pub fn new(json: Value) -> Self {
        Self { json, text: None }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn print(self, output: OutputOptions) -> Result<()> {
        if output.json {
            return print_json(&self.json);
        }
        if let Some(text) = self.text {
            println!("{text}");
        }
        Ok(())
    }
}

fn colored_outcome(status: OutcomeStatus) -> String {
    match status {
        OutcomeStatus::Success => status.green().to_string(),
        OutcomeStatus::Failed => status.red().to_string(),
        OutcomeStatus::Partial => status.yellow().to_string(),
        OutcomeStatus::Skipped => status.dimmed().to_string(),
    }
}

fn or_dash(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}
