#[macro_use]
mod macros;

pub mod audit;
pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod ignore;
pub mod locks;
pub mod mapper;
pub mod reconcile;
pub mod remote;
pub mod rollback;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod types;

pub use audit::{AuditAction, AuditFilter, AuditLogEntry, AuditLogger};
pub use bridge::{Bridge, ConnectionCheck, Core, Settings};
pub use config::Config;
pub use error::{BridgeError, Result};
pub use ignore::{IgnoreAction, IgnoreRegistry};
pub use mapper::{ColumnMapping, Mapper, TagMapping};
pub use reconcile::{AnalyzeOptions, ReconciliationResult, TicketPair};
pub use rollback::RollbackSnapshot;
pub use scheduler::{Scheduler, SchedulerAction, SchedulerKind, SchedulerStatus};
pub use storage::{FileStorage, SqliteStorage, Storage};
pub use sync::{DeleteScope, OperationKind, OperationStatus, OutcomeStatus, SyncOperation, SyncReport};
pub use types::{
    IgnoreType, IgnoredTicket, IssueItem, Platform, Scope, TaskItem, TicketMapping,
};
