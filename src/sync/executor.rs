//! Batch execution.
//!
//! A batch runs in four phases:
//! 1. claim the (user, project) batch slot and check credentials
//! 2. analyze both systems and plan one step per requested ticket
//! 3. persist the operation and its rollback snapshot in one write
//! 4. run the steps concurrently and record every change in the audit log
//!
//! Steps are independent. A transient or API failure only fails its own
//! ticket; a 401/403 aborts every step that has not started yet and marks
//! the operation failed.

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::json;

use crate::audit::{AuditAction, AuditLogEntry};
use crate::bridge::Core;
use crate::error::{BridgeError, Result};
use crate::rollback::RollbackSnapshot;
use crate::sync::plan::{self, FieldChange, PlannedStep, Step};
use crate::sync::types::{
    DeleteScope, OperationKind, OperationStatus, OutcomeStatus, OutcomeSummary, SideResult,
    SyncOperation, SyncReport, TicketOutcome,
};
use crate::types::{IssueItem, MappingOrigin, Platform, TaskItem, TicketMapping, field};

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub kind: OperationKind,
    pub ticket_ids: Vec<String>,
    /// Only consulted for deletes
    pub delete_scope: DeleteScope,
    /// Recorded as the actor of every audit entry
    pub actor: String,
}

impl ExecuteRequest {
    pub fn new(kind: OperationKind, ticket_ids: Vec<String>, actor: impl Into<String>) -> Self {
        Self {
            kind,
            ticket_ids,
            delete_scope: DeleteScope::default(),
            actor: actor.into(),
        }
    }

    pub fn with_delete_scope(mut self, scope: DeleteScope) -> Self {
        self.delete_scope = scope;
        self
    }
}

/// Run one batch and return its operation with per-ticket outcomes.
///
/// Returns `Err` only when the batch was refused (another batch is in
/// flight) or storage failed; remote failures end up in the report.
pub async fn execute(core: &Core, request: ExecuteRequest) -> Result<SyncReport> {
    if request.kind == OperationKind::Rollback {
        return Err(BridgeError::Other(
            "rollbacks are started from an operation id, not a ticket list".to_string(),
        ));
    }

    let mut ticket_ids = Vec::with_capacity(request.ticket_ids.len());
    for id in request.ticket_ids {
        let id = id.trim().to_string();
        if !id.is_empty() && !ticket_ids.contains(&id) {
            ticket_ids.push(id);
        }
    }

    let _batch = core.locks.begin_batch(&core.scope)?;
    let mut op = SyncOperation::new(&core.scope, request.kind, ticket_ids.clone());
    tracing::info!(
        operation_id = %op.id,
        kind = %op.kind,
        tickets = ticket_ids.len(),
        "starting batch"
    );

    if let Err(err) = preflight(core, request.kind, request.delete_scope).await {
        return fail_batch(core, op, err);
    }

    let analysis = match core.analyze(core.analyze_options(None)).await {
        Ok(analysis) => analysis,
        Err(err) if err.is_remote() => return fail_batch(core, op, err),
        Err(err) => return Err(err),
    };
    let mappings = core.storage.list_mappings(&core.scope)?;

    let steps = plan::plan(request.kind, &ticket_ids, &analysis, request.delete_scope);
    let entries = steps
        .iter()
        .flat_map(|step| plan::snapshot_entries(step, &mappings))
        .collect();
    let snapshot = RollbackSnapshot::capture(
        &op.id,
        &op.user,
        &op.project,
        entries,
        core.settings.snapshot_retention_days,
    );
    core.storage.insert_operation(&op, Some(&snapshot))?;
    op.start();
    core.storage.update_operation(&op)?;

    let ctx = StepContext {
        core,
        operation_id: &op.id,
        actor: &request.actor,
        abort: Mutex::new(None),
    };
    let ctx = &ctx;
    let mut results: Vec<(usize, TicketOutcome)> = stream::iter(steps.into_iter().enumerate())
        .map(|(i, planned)| async move { (i, run_step(ctx, planned).await) })
        .buffer_unordered(core.settings.max_concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(i, _)| *i);
    let outcomes: Vec<TicketOutcome> = results.into_iter().map(|(_, o)| o).collect();

    let aborted = ctx.abort.lock().clone();
    let status = if aborted.is_some() {
        OperationStatus::Failed
    } else {
        OperationStatus::Completed
    };
    let counts = OutcomeSummary::from_outcomes(&outcomes);
    op.finish(
        status,
        json!({
            "summary": counts.to_string(),
            "counts": counts,
            "outcomes": outcomes,
            "aborted": aborted,
        }),
    );
    core.storage.update_operation(&op)?;
    tracing::info!(
        operation_id = %op.id,
        status = %op.status,
        summary = %counts,
        "batch finished"
    );

    Ok(SyncReport::new(op, outcomes))
}

/// Check credentials for every side the batch may write to.
async fn preflight(core: &Core, kind: OperationKind, delete_scope: DeleteScope) -> Result<()> {
    let (board, tracker) = match kind {
        OperationKind::Sync => (false, true),
        OperationKind::Create => (core.settings.reverse, true),
        OperationKind::Delete => (
            delete_scope.includes(Platform::Board),
            delete_scope.includes(Platform::Tracker),
        ),
        OperationKind::Rollback => (true, true),
    };
    if board {
        core.board.test_credentials().await?;
    }
    if tracker {
        core.tracker.test_credentials().await?;
    }
    Ok(())
}

/// Record an operation that could not run at all.
fn fail_batch(core: &Core, mut op: SyncOperation, err: BridgeError) -> Result<SyncReport> {
    tracing::warn!(operation_id = %op.id, error = %err, "batch could not run");
    let outcomes: Vec<TicketOutcome> = op
        .ticket_ids
        .iter()
        .map(|id| TicketOutcome::failed(id, &err))
        .collect();
    let counts = OutcomeSummary::from_outcomes(&outcomes);
    op.start();
    op.finish(
        OperationStatus::Failed,
        json!({
            "summary": counts.to_string(),
            "counts": counts,
            "error": err.to_string(),
        }),
    );
    core.storage.insert_operation(&op, None)?;
    Ok(SyncReport::new(op, outcomes))
}

struct StepContext<'a> {
    core: &'a Core,
    operation_id: &'a str,
    actor: &'a str,
    /// First auth failure seen; later steps do not start
    abort: Mutex<Option<String>>,
}

impl StepContext<'_> {
    fn entry(&self, ticket_id: &str, platform: Platform, action: AuditAction) -> AuditLogEntry {
        AuditLogEntry::new(&self.core.scope, ticket_id, platform, action, self.actor)
            .with_operation(self.operation_id)
    }

    fn trip(&self, err: &BridgeError) {
        let mut abort = self.abort.lock();
        if abort.is_none() {
            tracing::warn!(operation_id = %self.operation_id, error = %err, "aborting batch");
            *abort = Some(err.to_string());
        }
    }

    fn remote_failed(&self, ticket_id: &str, platform: Platform, err: BridgeError) -> TicketOutcome {
        let err = err.for_ticket(ticket_id, platform);
        if err.is_auth() {
            self.trip(&err);
        }
        tracing::warn!(ticket_id, %platform, error = %err, "ticket failed");
        TicketOutcome::failed(ticket_id, err)
    }

    fn record(&self, entries: Vec<AuditLogEntry>, problems: &mut Vec<String>) {
        if let Err(err) = self.core.audit.record(entries) {
            problems.push(format!("audit write failed: {err}"));
        }
    }
}

/// A remote write that succeeded but whose bookkeeping did not is partial.
fn degrade(mut outcome: TicketOutcome, problems: Vec<String>) -> TicketOutcome {
    if problems.is_empty() {
        return outcome;
    }
    tracing::warn!(ticket_id = %outcome.ticket_id, problems = ?problems, "ticket partially applied");
    if outcome.status == OutcomeStatus::Success {
        outcome.status = OutcomeStatus::Partial;
    }
    let mut message: Vec<String> = outcome.message.take().into_iter().collect();
    message.extend(problems);
    outcome.message = Some(message.join("; "));
    outcome
}

async fn run_step(ctx: &StepContext<'_>, planned: PlannedStep) -> TicketOutcome {
    let PlannedStep { ticket_id, step } = planned;
    let aborted = ctx.abort.lock().clone();
    if let Some(reason) = aborted
        && !matches!(step, Step::Skip { .. })
    {
        return TicketOutcome::failed(ticket_id, format!("aborted: {reason}"));
    }

    match step {
        Step::Skip { reason } => {
            tracing::debug!(ticket_id = %ticket_id, reason = %reason, "skipping");
            TicketOutcome::skipped(ticket_id, reason)
        }
        Step::CreateIssue { task, stale } => create_issue(ctx, &ticket_id, task, stale).await,
        Step::CreateTask { issue, stale } => create_task(ctx, &ticket_id, issue, stale).await,
        Step::UpdateIssue { pair, changes } => {
            update_issue(ctx, &ticket_id, &pair.issue.id, changes).await
        }
        Step::Delete { task, issue } => delete(ctx, &ticket_id, task, issue).await,
    }
}

async fn create_issue(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    task: TaskItem,
    stale: Option<TicketMapping>,
) -> TicketOutcome {
    let core = ctx.core;
    let mut problems = Vec::new();
    match claim_source(ctx, ticket_id, Platform::Board, &task.id, stale.as_ref()).await {
        Ok(entries) => ctx.record(entries, &mut problems),
        Err(outcome) => return outcome,
    }

    let issue = match core
        .tracker
        .create_issue(plan::new_issue(&task, &core.mapper))
        .await
    {
        Ok(issue) => issue,
        Err(err) => return ctx.remote_failed(ticket_id, Platform::Tracker, err),
    };
    tracing::info!(ticket_id, issue_id = %issue.id, "created issue");

    let mapping = TicketMapping::new(&core.scope, &task.id, &issue.id, MappingOrigin::Created);
    finish_create(ctx, ticket_id, Platform::Tracker, &issue.id, mapping, problems).await
}

async fn create_task(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    issue: IssueItem,
    stale: Option<TicketMapping>,
) -> TicketOutcome {
    let core = ctx.core;
    let mut problems = Vec::new();
    match claim_source(ctx, ticket_id, Platform::Tracker, &issue.id, stale.as_ref()).await {
        Ok(entries) => ctx.record(entries, &mut problems),
        Err(outcome) => return outcome,
    }

    let task = match core
        .board
        .create_task(plan::new_task(&issue, &core.mapper))
        .await
    {
        Ok(task) => task,
        Err(err) => return ctx.remote_failed(ticket_id, Platform::Board, err),
    };
    tracing::info!(ticket_id, task_id = %task.id, "created task");

    let mapping = TicketMapping::new(&core.scope, &task.id, &issue.id, MappingOrigin::Created);
    finish_create(ctx, ticket_id, Platform::Board, &task.id, mapping, problems).await
}

/// Make sure `source_id` is free to link before its counterpart is created.
///
/// A mapping to a live counterpart skips the ticket. The planned `stale`
/// mapping is removed, and its removal returned for the audit log.
async fn claim_source(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    platform: Platform,
    source_id: &str,
    stale: Option<&TicketMapping>,
) -> std::result::Result<Vec<AuditLogEntry>, TicketOutcome> {
    let core = ctx.core;
    let _guard = core.locks.lock_user(&core.scope.user).await;
    let mappings = core
        .storage
        .list_mappings(&core.scope)
        .map_err(|err| TicketOutcome::failed(ticket_id, err))?;
    let Some(existing) = mappings.iter().find(|m| m.id_on(platform) == source_id) else {
        return Ok(Vec::new());
    };
    let replaceable =
        stale.is_some_and(|s| s.task_id == existing.task_id && s.issue_id == existing.issue_id);
    if !replaceable {
        return Err(TicketOutcome::skipped(
            ticket_id,
            format!("already linked to {}", existing.id_on(platform.other())),
        ));
    }

    match core.storage.remove_mapping(&core.scope, platform, source_id) {
        Ok(Some(removed)) => {
            tracing::info!(ticket_id, mapping = %removed, "replacing stale mapping");
            Ok(vec![
                ctx.entry(ticket_id, platform, AuditAction::MappingRemoved)
                    .with_change(field::MAPPING, Some(removed.to_string()), None),
            ])
        }
        Ok(None) => Ok(Vec::new()),
        Err(err) => Err(TicketOutcome::failed(ticket_id, err)),
    }
}

async fn finish_create(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    platform: Platform,
    created_id: &str,
    mapping: TicketMapping,
    mut problems: Vec<String>,
) -> TicketOutcome {
    let mut entries = vec![
        ctx.entry(ticket_id, platform, AuditAction::Created)
            .with_change(field::ID, None, Some(created_id.to_string())),
    ];
    // A link made while the remote create was in flight shows up as a conflict
    let written = {
        let _guard = ctx.core.locks.lock_user(&ctx.core.scope.user).await;
        ctx.core.storage.upsert_mapping(&mapping)
    };
    match written {
        Ok(_) => entries.push(
            ctx.entry(ticket_id, platform, AuditAction::MappingAdded)
                .with_change(field::MAPPING, None, Some(mapping.to_string())),
        ),
        Err(err) => problems.push(format!("created {created_id} but mapping write failed: {err}")),
    }
    ctx.record(entries, &mut problems);
    degrade(
        TicketOutcome::success(ticket_id, Some(created_id.to_string())),
        problems,
    )
}

async fn update_issue(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    issue_id: &str,
    changes: Vec<FieldChange>,
) -> TicketOutcome {
    let update = plan::issue_update(&changes);
    if update.is_empty() {
        return TicketOutcome::skipped(ticket_id, "nothing to change");
    }
    if let Err(err) = ctx.core.tracker.update_issue(issue_id, update).await {
        return ctx.remote_failed(ticket_id, Platform::Tracker, err);
    }
    tracing::info!(ticket_id, issue_id, fields = changes.len(), "updated issue");

    let entries = changes
        .into_iter()
        .map(|change| {
            let action = if change.field == field::STATE {
                AuditAction::StatusChanged
            } else {
                AuditAction::Updated
            };
            ctx.entry(ticket_id, Platform::Tracker, action).with_change(
                change.field,
                change.old_value,
                change.new_value,
            )
        })
        .collect();
    let mut problems = Vec::new();
    ctx.record(entries, &mut problems);
    degrade(
        TicketOutcome::success(ticket_id, Some(issue_id.to_string())),
        problems,
    )
}

async fn delete(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    task: Option<TaskItem>,
    issue: Option<IssueItem>,
) -> TicketOutcome {
    let core = ctx.core;
    let mut sides = Vec::new();
    let mut entries = Vec::new();

    if let Some(task) = &task {
        let result = match core.board.delete_task(&task.id).await {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        };
        sides.push(side_result(ctx, ticket_id, Platform::Board, &task.id, result));
    }
    if let Some(issue) = &issue {
        let result = match core.tracker.delete_issue(&issue.id).await {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        };
        sides.push(side_result(ctx, ticket_id, Platform::Tracker, &issue.id, result));
    }

    for side in sides.iter().filter(|s| s.success) {
        entries.push(
            ctx.entry(ticket_id, side.platform, AuditAction::Deleted).with_change(
                field::ID,
                Some(side.ticket_id.clone()),
                None,
            ),
        );
    }

    let mut problems = Vec::new();
    if let Some(side) = sides.iter().find(|s| s.success) {
        let _guard = core.locks.lock_user(&core.scope.user).await;
        match core
            .storage
            .remove_mapping(&core.scope, side.platform, &side.ticket_id)
        {
            Ok(Some(mapping)) => entries.push(
                ctx.entry(ticket_id, side.platform, AuditAction::MappingRemoved)
                    .with_change(field::MAPPING, Some(mapping.to_string()), None),
            ),
            Ok(None) => {}
            Err(err) => problems.push(format!("mapping removal failed: {err}")),
        }
    }
    ctx.record(entries, &mut problems);

    degrade(TicketOutcome::from_sides(ticket_id, sides), problems)
}

fn side_result(
    ctx: &StepContext<'_>,
    ticket_id: &str,
    platform: Platform,
    remote_id: &str,
    result: Result<()>,
) -> SideResult {
    match result {
        Ok(()) => {
            tracing::info!(ticket_id, %platform, remote_id, "deleted");
            SideResult::ok(platform, remote_id)
        }
        Err(err) => {
            let err = err.for_ticket(remote_id, platform);
            if err.is_auth() {
                ctx.trip(&err);
            }
            tracing::warn!(ticket_id, %platform, error = %err, "delete failed");
            SideResult::failed(platform, remote_id, err)
        }
    }
}
