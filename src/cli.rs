use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use jiff::Timestamp;
use jiff::civil::Date;
use jiff::tz::TimeZone;

use crate::audit::{AuditAction, AuditFilter};
use crate::error::BridgeError;
use crate::sync::DeleteScope;
use crate::types::{IgnoreType, Platform};

#[derive(Parser)]
#[command(name = "trackbridge")]
#[command(about = "Reconcile and synchronize a task board with an issue tracker")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub output: OutputOptions,
}

/// Output format shared by every command
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify board tasks and tracker issues
    #[command(visible_alias = "a")]
    Analyze {
        /// Only report tickets in this board column
        #[arg(short, long)]
        column: Option<String>,

        /// Also list matched pairs
        #[arg(long)]
        all: bool,
    },

    /// Push board values onto mismatched tracker issues
    Sync {
        /// Board task ids (default: every mismatched pair)
        ids: Vec<String>,
    },

    /// Create counterparts for missing tickets
    Create {
        /// Ticket ids (default: every create candidate)
        ids: Vec<String>,
    },

    /// Delete tickets from one or both systems
    Delete {
        /// Ticket ids (board task or tracker issue)
        #[arg(required = true)]
        ids: Vec<String>,

        /// Which side to delete: task, issue, both
        #[arg(short, long, default_value = "both", value_parser = parse_enum::<DeleteScope>)]
        scope: DeleteScope,
    },

    /// Link a board task to a tracker issue
    Link {
        task_id: String,
        issue_id: String,
    },

    /// Remove the link containing a ticket
    Unlink {
        /// Board task or tracker issue id
        id: String,
    },

    /// Manage ignored tickets
    Ignore {
        #[command(subcommand)]
        action: IgnoreCommand,
    },

    /// List recent sync operations
    History {
        /// Maximum number of operations
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Undo a sync operation from its snapshot
    Rollback { operation_id: String },

    /// Query the audit log
    Audit {
        #[command(flatten)]
        filter: AuditArgs,

        /// Export as CSV (takes precedence over --json)
        #[arg(long)]
        csv: bool,
    },

    /// Run the auto-sync and auto-create schedulers until interrupted
    Watch {
        /// Seconds between auto-sync ticks (default: from config)
        #[arg(long)]
        sync_interval: Option<u64>,

        /// Seconds between auto-create ticks (default: from config)
        #[arg(long)]
        create_interval: Option<u64>,

        /// Do not run auto-sync
        #[arg(long)]
        no_sync: bool,

        /// Do not run auto-create
        #[arg(long)]
        no_create: bool,
    },

    /// Verify configuration and credentials
    Check,
}

#[derive(Subcommand)]
pub enum IgnoreCommand {
    /// Suppress a ticket from reconciliation
    Add {
        id: String,

        /// temp or forever
        #[arg(short = 't', long = "type", default_value = "temp", value_parser = parse_enum::<IgnoreType>)]
        ignore_type: IgnoreType,
    },
    /// Stop ignoring a ticket
    #[command(visible_alias = "rm")]
    Remove { id: String },
    /// List ignored tickets
    Ls,
    /// Drop every temporary entry
    ClearTemp,
}

/// Audit log filters
#[derive(Args, Debug, Clone, Default)]
pub struct AuditArgs {
    #[arg(long)]
    pub ticket: Option<String>,

    /// board or tracker
    #[arg(long, value_parser = parse_enum::<Platform>)]
    pub platform: Option<Platform>,

    #[arg(long, value_parser = parse_enum::<AuditAction>)]
    pub action: Option<AuditAction>,

    #[arg(long)]
    pub actor: Option<String>,

    #[arg(long)]
    pub operation: Option<String>,

    /// Inclusive lower bound (RFC 3339 timestamp or YYYY-MM-DD)
    #[arg(long, value_parser = parse_timestamp)]
    pub since: Option<Timestamp>,

    /// Exclusive upper bound (RFC 3339 timestamp or YYYY-MM-DD)
    #[arg(long, value_parser = parse_timestamp)]
    pub until: Option<Timestamp>,

    /// Keep only the most recent N entries
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

impl From<AuditArgs> for AuditFilter {
    fn from(args: AuditArgs) -> Self {
        AuditFilter {
            ticket_id: args.ticket,
            platform: args.platform,
            action: args.action,
            actor: args.actor,
            operation_id: args.operation,
            since: args.since,
            until: args.until,
            limit: args.limit,
        }
    }
}

fn parse_enum<T>(s: &str) -> Result<T, String>
where
    T: FromStr<Err = BridgeError>,
{
    s.parse().map_err(|e: BridgeError| e.to_string())
}

/// Accept a full timestamp or a bare date (midnight UTC).
pub fn parse_timestamp(s: &str) -> Result<Timestamp, String> {
    if let Ok(ts) = s.parse::<Timestamp>() {
        return Ok(ts);
    }
    s.parse::<Date>()
        .and_then(|date| date.to_zoned(TimeZone::UTC))
        .map(|zoned| zoned.timestamp())
        .map_err(|_| BridgeError::InvalidTimestamp(s.to_string()).to_string())
}
