use owo_colors::OwoColorize;
use serde_json::json;

use super::CommandOutput;
use crate::bridge::Bridge;
use crate::cli::OutputOptions;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::scheduler::{SchedulerAction, SchedulerKind, SchedulerStatus};

/// Which schedulers `watch` runs, and how often
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub sync_interval: Option<u64>,
    pub create_interval: Option<u64>,
    pub no_sync: bool,
    pub no_create: bool,
}

fn describe(status: &SchedulerStatus) -> String {
    let mut line = format!("{}: ", status.kind.to_string().bold());
    if status.running {
        line.push_str(&format!("every {}s", status.interval.unwrap_or_default()));
    } else {
        line.push_str("stopped");
    }
    line.push_str(&format!(
        ", {} run(s), {} skipped",
        status.run_count, status.skipped_count
    ));
    if let Some(summary) = &status.last_run_summary {
        line.push_str(&format!(", last: {summary}"));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(", {} {error}", "error:".red()));
    }
    line
}

/// Run the schedulers until Ctrl-C
pub async fn cmd_watch(bridge: &Bridge, options: WatchOptions, output: OutputOptions) -> Result<()> {
    if options.no_sync && options.no_create {
        return Err(BridgeError::Config(
            "nothing to watch: both schedulers disabled".to_string(),
        ));
    }

    let mut kinds = Vec::new();
    if !options.no_sync {
        kinds.push((SchedulerKind::AutoSync, options.sync_interval));
    }
    if !options.no_create {
        kinds.push((SchedulerKind::AutoCreate, options.create_interval));
    }

    for (kind, interval) in &kinds {
        let status = bridge.scheduler_control(*kind, SchedulerAction::Start, *interval)?;
        if !output.json {
            println!("{}", describe(&status));
        }
    }
    if !output.json {
        println!("{}", "Watching; press Ctrl-C to stop.".dimmed());
    }

    tokio::signal::ctrl_c().await?;

    let mut statuses = Vec::new();
    for (kind, _) in &kinds {
        statuses.push(bridge.scheduler_control(*kind, SchedulerAction::Stop, None)?);
    }
    let text = statuses.iter().map(describe).collect::<Vec<_>>().join("\n");
    CommandOutput::new(json!({ "schedulers": statuses }))
        .with_text(format!("\n{text}"))
        .print(output)
}

/// Validate configuration and both credentials
pub async fn cmd_check(bridge: &Bridge, config: &Config, output: OutputOptions) -> Result<()> {
    let checks = bridge.check().await;

    let mut text = String::new();
    text.push_str(&format!("{}: {}\n", "scope".cyan(), bridge.scope()));
    text.push_str(&format!(
        "{}: {} ({})\n",
        "storage".cyan(),
        config.storage.backend,
        config.storage_path().display()
    ));
    for check in &checks {
        let state = if check.ok {
            "ok".green().to_string()
        } else {
            format!("{} {}", "failed".red(), check.error.as_deref().unwrap_or_default())
        };
        text.push_str(&format!("{}: {state}\n", check.platform.to_string().cyan()));
    }

    CommandOutput::new(json!({
        "scope": bridge.scope(),
        "storage": {
            "backend": config.storage.backend,
            "path": config.storage_path(),
        },
        "checks": checks,
    }))
    .with_text(text.trim_end().to_string())
    .print(output)?;

    match checks.iter().find(|c| !c.ok) {
        Some(failed) => Err(BridgeError::Config(format!(
            "{} credentials are not usable",
            failed.platform
        ))),
        None => Ok(()),
    }
}
