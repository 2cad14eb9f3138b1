//! The [`Bridge`] facade.
//!
//! One `Bridge` is built at startup for a (user, project pair) scope and
//! handed to the CLI. It owns the adapters, the storage handle, the locks and
//! the two schedulers; everything else borrows the shared [`Core`].

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use jiff::Timestamp;
use serde::Serialize;

use crate::audit::{AuditAction, AuditFilter, AuditLogEntry, AuditLogger};
use crate::config::{Config, SchedulerConfig};
use crate::error::{BridgeError, Result};
use crate::ignore::{IgnoreAction, IgnoreRegistry};
use crate::locks::Locks;
use crate::mapper::Mapper;
use crate::reconcile::{self, AnalyzeOptions, ReconciliationResult};
use crate::remote::{self, IssueTracker, TaskBoard};
use crate::rollback;
use crate::scheduler::{Job, Scheduler, SchedulerAction, SchedulerKind, SchedulerStatus};
use crate::storage::{self, MappingWrite, Storage};
use crate::sync::{self, DeleteScope, ExecuteRequest, OperationKind, SyncOperation, SyncReport};
use crate::types::{
    IgnoreType, IgnoredTicket, MappingOrigin, Platform, Scope, TicketMapping, field,
};

/// Tunables copied out of [`Config`] at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Recorded as the actor of on-demand changes
    pub actor: String,
    pub reverse: bool,
    pub max_concurrency: usize,
    pub snapshot_retention_days: u32,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            actor: config.user(),
            reverse: config.sync.reverse,
            max_concurrency: config.sync.max_concurrency,
            snapshot_retention_days: config.sync.snapshot_retention_days,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared state every operation works against.
pub struct Core {
    pub scope: Scope,
    pub board: Arc<dyn TaskBoard>,
    pub tracker: Arc<dyn IssueTracker>,
    pub storage: Arc<dyn Storage>,
    pub mapper: Mapper,
    pub locks: Arc<Locks>,
    pub audit: AuditLogger,
    pub ignores: IgnoreRegistry,
    pub settings: Settings,
}

impl Core {
    pub fn new(
        scope: Scope,
        board: Arc<dyn TaskBoard>,
        tracker: Arc<dyn IssueTracker>,
        storage: Arc<dyn Storage>,
        mapper: Mapper,
        settings: Settings,
    ) -> Self {
        let audit = AuditLogger::new(Arc::clone(&storage), scope.clone());
        let ignores = IgnoreRegistry::new(Arc::clone(&storage), audit.clone(), scope.clone());
        Self {
            scope,
            board,
            tracker,
            storage,
            mapper,
            locks: Arc::new(Locks::new()),
            audit,
            ignores,
            settings,
        }
    }

    pub fn analyze_options(&self, column_filter: Option<String>) -> AnalyzeOptions {
        AnalyzeOptions {
            column_filter,
            reverse: self.settings.reverse,
        }
    }

    /// Fetch both sides and classify them.
    pub async fn analyze(&self, options: AnalyzeOptions) -> Result<ReconciliationResult> {
        let (tasks, issues) = tokio::try_join!(self.board.fetch_tasks(), self.tracker.fetch_issues())?;
        let mappings = self.storage.list_mappings(&self.scope)?;
        let ignored = self.ignores.ids()?;

        let result = reconcile::analyze(&tasks, &issues, &mappings, &ignored, &self.mapper, &options);
        tracing::debug!(counts = ?result.counts(), "analysis complete");
        Ok(result)
    }

    /// One scheduler tick: reap expired snapshots, analyze, and run a batch
    /// over whatever the analysis proposes.
    pub async fn auto_pass(&self, kind: SchedulerKind) -> Result<String> {
        let purged = self.storage.purge_expired_snapshots(Timestamp::now())?;
        if purged > 0 {
            tracing::info!(purged, "purged expired rollback snapshots");
        }

        let analysis = self.analyze(self.analyze_options(None)).await?;
        let (op_kind, ticket_ids) = match kind {
            SchedulerKind::AutoSync => (OperationKind::Sync, analysis.sync_candidates()),
            SchedulerKind::AutoCreate => (OperationKind::Create, analysis.create_candidates()),
        };
        if ticket_ids.is_empty() {
            return Ok("nothing to do".to_string());
        }

        let report = sync::execute(self, ExecuteRequest::new(op_kind, ticket_ids, kind.as_str())).await?;
        Ok(format!("{} {}: {}", report.operation.kind, report.operation.id, report.summary))
    }
}

/// Credential check result for one side
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionCheck {
    pub platform: Platform,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Bridge {
    core: Arc<Core>,
    auto_sync: Scheduler,
    auto_create: Scheduler,
    intervals: SchedulerConfig,
}

impl Bridge {
    /// Connect both remotes and open the configured storage backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let (board, tracker) = remote::connect(config)?;
        let storage = storage::open(config)?;
        Ok(Self::new(config, board, tracker, storage))
    }

    /// Build from explicit adapters; used by tests and offline runs.
    pub fn new(
        config: &Config,
        board: Arc<dyn TaskBoard>,
        tracker: Arc<dyn IssueTracker>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let core = Arc::new(Core::new(
            config.scope(),
            board,
            tracker,
            storage,
            Mapper::from_config(&config.mapping),
            Settings::from_config(config),
        ));
        Self {
            auto_sync: Scheduler::new(SchedulerKind::AutoSync, tick_job(&core, SchedulerKind::AutoSync)),
            auto_create: Scheduler::new(
                SchedulerKind::AutoCreate,
                tick_job(&core, SchedulerKind::AutoCreate),
            ),
            intervals: config.scheduler.clone(),
            core,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.core.scope
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    fn actor(&self) -> &str {
        &self.core.settings.actor
    }

    pub async fn analyze(&self, column_filter: Option<String>) -> Result<ReconciliationResult> {
        self.core.analyze(self.core.analyze_options(column_filter)).await
    }

    /// Run a create, sync or delete batch. `delete_scope` only applies to
    /// deletes.
    pub async fn execute(
        &self,
        kind: OperationKind,
        ticket_ids: Vec<String>,
        delete_scope: DeleteScope,
    ) -> Result<SyncReport> {
        let request =
            ExecuteRequest::new(kind, ticket_ids, self.actor()).with_delete_scope(delete_scope);
        sync::execute(&self.core, request).await
    }

    pub async fn rollback(&self, operation_id: &str) -> Result<SyncReport> {
        rollback::rollback(&self.core, operation_id, self.actor()).await
    }

    /// Add or remove an ignore entry. Returns whether anything changed.
    pub async fn ignore(
        &self,
        ticket_id: &str,
        action: IgnoreAction,
        ignore_type: IgnoreType,
    ) -> Result<bool> {
        let _guard = self.core.locks.lock_user(&self.core.scope.user).await;
        match action {
            IgnoreAction::Add => self.core.ignores.add(ticket_id, ignore_type, self.actor()),
            IgnoreAction::Remove => self.core.ignores.remove(ticket_id, self.actor()),
        }
    }

    pub fn list_ignored(&self) -> Result<Vec<IgnoredTicket>> {
        self.core.ignores.list()
    }

    pub async fn clear_temporary_ignores(&self) -> Result<Vec<IgnoredTicket>> {
        let _guard = self.core.locks.lock_user(&self.core.scope.user).await;
        self.core.ignores.clear_temporary(self.actor())
    }

    /// Link a board task to a tracker issue by hand.
    ///
    /// Returns false when the identical link already exists.
    pub async fn link(&self, task_id: &str, issue_id: &str) -> Result<bool> {
        let scope = &self.core.scope;
        if scope.platform_of(task_id) != Platform::Board
            || scope.platform_of(issue_id) != Platform::Tracker
        {
            return Err(BridgeError::MappingConflict {
                task_id: task_id.to_string(),
                issue_id: issue_id.to_string(),
                reason: "expected a board task id followed by a tracker issue id".to_string(),
            });
        }

        let mapping = TicketMapping::new(scope, task_id, issue_id, MappingOrigin::Manual);
        let _guard = self.core.locks.lock_user(&scope.user).await;
        if self.core.storage.upsert_mapping(&mapping)? == MappingWrite::Unchanged {
            return Ok(false);
        }
        tracing::info!(%mapping, "linked");
        self.core.audit.record(vec![
            AuditLogEntry::new(scope, task_id, Platform::Board, AuditAction::MappingAdded, self.actor())
                .with_change(field::MAPPING, None, Some(mapping.to_string())),
        ])?;
        Ok(true)
    }

    /// Remove the link containing `ticket_id` (either side).
    pub async fn unlink(&self, ticket_id: &str) -> Result<Option<TicketMapping>> {
        let scope = &self.core.scope;
        let platform = scope.platform_of(ticket_id);
        let _guard = self.core.locks.lock_user(&scope.user).await;
        let Some(removed) = self.core.storage.remove_mapping(scope, platform, ticket_id)? else {
            return Ok(None);
        };
        tracing::info!(mapping = %removed, "unlinked");
        self.core.audit.record(vec![
            AuditLogEntry::new(scope, ticket_id, platform, AuditAction::MappingRemoved, self.actor())
                .with_change(field::MAPPING, Some(removed.to_string()), None),
        ])?;
        Ok(Some(removed))
    }

    pub fn mappings(&self) -> Result<Vec<TicketMapping>> {
        self.core.storage.list_mappings(&self.core.scope)
    }

    /// Most recent operations first.
    pub fn sync_history(&self, limit: usize) -> Result<Vec<SyncOperation>> {
        self.core.storage.list_operations(&self.core.scope, limit)
    }

    pub fn operation(&self, operation_id: &str) -> Result<Option<SyncOperation>> {
        Ok(self
            .core
            .storage
            .get_operation(operation_id)?
            .filter(|op| op.scope() == self.core.scope))
    }

    pub fn audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        self.core.audit.query(filter)
    }

    pub fn audit_logs_csv(&self, filter: &AuditFilter) -> Result<String> {
        self.core.audit.export_csv(filter)
    }

    pub fn purge_expired_snapshots(&self) -> Result<usize> {
        self.core.storage.purge_expired_snapshots(Timestamp::now())
    }

    fn scheduler(&self, kind: SchedulerKind) -> &Scheduler {
        match kind {
            SchedulerKind::AutoSync => &self.auto_sync,
            SchedulerKind::AutoCreate => &self.auto_create,
        }
    }

    /// Start, stop or inspect a scheduler. `interval` (seconds) defaults to
    /// the configured one.
    pub fn scheduler_control(
        &self,
        kind: SchedulerKind,
        action: SchedulerAction,
        interval: Option<u64>,
    ) -> Result<SchedulerStatus> {
        let scheduler = self.scheduler(kind);
        match action {
            SchedulerAction::Start => {
                let secs = interval.unwrap_or(match kind {
                    SchedulerKind::AutoSync => self.intervals.auto_sync_interval,
                    SchedulerKind::AutoCreate => self.intervals.auto_create_interval,
                });
                scheduler.start(Duration::from_secs(secs))
            }
            SchedulerAction::Stop => Ok(scheduler.stop()),
            SchedulerAction::Status => Ok(scheduler.status()),
        }
    }

    /// Run one scheduler tick immediately. Returns false if a tick was
    /// already running.
    pub async fn run_scheduler_once(&self, kind: SchedulerKind) -> bool {
        self.scheduler(kind).run_now().await
    }

    /// Verify credentials on both sides.
    pub async fn check(&self) -> Vec<ConnectionCheck> {
        let (board, tracker) = tokio::join!(
            self.core.board.test_credentials(),
            self.core.tracker.test_credentials()
        );
        [(Platform::Board, board), (Platform::Tracker, tracker)]
            .into_iter()
            .map(|(platform, result)| ConnectionCheck {
                platform,
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            })
            .collect()
    }
}

fn tick_job(core: &Arc<Core>, kind: SchedulerKind) -> Job {
    let core = Arc::clone(core);
    Arc::new(move || {
        let core = Arc::clone(&core);
        async move { core.auto_pass(kind).await }.boxed()
    })
}
