use std::env;
use std::process::ExitCode;

use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use trackbridge::cli::{Cli, Commands, IgnoreCommand};
use trackbridge::commands::{
    WatchOptions, cmd_analyze, cmd_audit, cmd_check, cmd_execute, cmd_history,
    cmd_ignore_add, cmd_ignore_clear_temp, cmd_ignore_ls, cmd_ignore_remove, cmd_link,
    cmd_rollback, cmd_unlink, cmd_watch,
};
use trackbridge::{Bridge, Config, DeleteScope, OperationKind, Result};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TRACKBRIDGE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "trackbridge=debug,info"
        } else {
            "trackbridge=info,warn"
        })
    });

    let format = env::var("TRACKBRIDGE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let output = cli.output;
    let config = Config::load()?;
    let bridge = Bridge::from_config(&config)?;

    match cli.command {
        Commands::Analyze { column, all } => cmd_analyze(&bridge, column, all, output).await,
        Commands::Sync { ids } => {
            cmd_execute(&bridge, OperationKind::Sync, ids, DeleteScope::default(), output).await
        }
        Commands::Create { ids } => {
            cmd_execute(&bridge, OperationKind::Create, ids, DeleteScope::default(), output).await
        }
        Commands::Delete { ids, scope } => {
            cmd_execute(&bridge, OperationKind::Delete, ids, scope, output).await
        }

        Commands::Link { task_id, issue_id } => cmd_link(&bridge, &task_id, &issue_id, output).await,
        Commands::Unlink { id } => cmd_unlink(&bridge, &id, output).await,

        Commands::Ignore { action } => match action {
            IgnoreCommand::Add { id, ignore_type } => {
                cmd_ignore_add(&bridge, &id, ignore_type, output).await
            }
            IgnoreCommand::Remove { id } => cmd_ignore_remove(&bridge, &id, output).await,
            IgnoreCommand::Ls => cmd_ignore_ls(&bridge, output),
            IgnoreCommand::ClearTemp => cmd_ignore_clear_temp(&bridge, output).await,
        },

        Commands::History { limit } => cmd_history(&bridge, limit, output),
        Commands::Rollback { operation_id } => cmd_rollback(&bridge, &operation_id, output).await,
        Commands::Audit { filter, csv } => cmd_audit(&bridge, filter.into(), csv, output),

        Commands::Watch {
            sync_interval,
            create_interval,
            no_sync,
            no_create,
        } => {
            let options = WatchOptions {
                sync_interval,
                create_interval,
                no_sync,
                no_create,
            };
            cmd_watch(&bridge, options, output).await
        }
        Commands::Check => cmd_check(&bridge, &config, output).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "error:".red());
            ExitCode::FAILURE
        }
    }
}
