use owo_colors::OwoColorize;
use serde_json::json;

use super::CommandOutput;
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::error::Result;

/// Link a board task to a tracker issue
pub async fn cmd_link(
    bridge: &Bridge,
    task_id: &str,
    issue_id: &str,
    output: OutputOptions,
) -> Result<()> {
    let created = bridge.link(task_id, issue_id).await?;
    let text = if created {
        format!("Linked {} <-> {}", task_id.cyan(), issue_id.green())
    } else {
        format!("{task_id} is already linked to {issue_id}")
    };
    CommandOutput::new(json!({
        "task_id": task_id,
        "issue_id": issue_id,
        "created": created,
    }))
    .with_text(text)
    .print(output)
}

/// Remove the link containing `id`
pub async fn cmd_unlink(bridge: &Bridge, id: &str, output: OutputOptions) -> Result<()> {
    let removed = bridge.unlink(id).await?;
    let text = match &removed {
        Some(mapping) => format!("Unlinked {mapping}"),
        None => format!("{id} is not linked"),
    };
    CommandOutput::new(json!({ "removed": removed }))
        .with_text(text)
        .print(output)
}
