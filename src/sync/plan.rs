//! Turning requested ticket ids into concrete steps.
//!
//! Planning is pure: it reads a fresh [`ReconciliationResult`] and decides,
//! per ticket, what the executor will do and what the snapshot must capture.

use crate::mapper::Mapper;
use crate::reconcile::{Bucket, Direction, ReconciliationResult, TicketPair};
use crate::remote::{IssueUpdate, NewIssue, NewTask};
use crate::rollback::SnapshotEntry;
use crate::sync::types::{DeleteScope, OperationKind};
use crate::types::{IssueItem, Platform, TaskItem, TicketMapping, field};

/// One field change pushed to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// What the executor does for one requested ticket
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Create the tracker counterpart of a missing task.
    ///
    /// `stale` is a mapping whose issue no longer exists; it is replaced.
    CreateIssue {
        task: TaskItem,
        stale: Option<TicketMapping>,
    },
    /// Create the board counterpart of an orphaned issue
    CreateTask {
        issue: IssueItem,
        stale: Option<TicketMapping>,
    },
    /// Push mapped board values onto the tracker issue
    UpdateIssue {
        pair: TicketPair,
        changes: Vec<FieldChange>,
    },
    /// Remove one or both sides
    Delete {
        task: Option<TaskItem>,
        issue: Option<IssueItem>,
    },
    Skip { reason: String },
}

/// A requested ticket id and its step
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub ticket_id: String,
    pub step: Step,
}

impl PlannedStep {
    fn skip(ticket_id: &str, reason: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.to_string(),
            step: Step::Skip {
                reason: reason.into(),
            },
        }
    }

    fn new(ticket_id: &str, step: Step) -> Self {
        Self {
            ticket_id: ticket_id.to_string(),
            step,
        }
    }
}

/// Plan `kind` for every requested id, in request order.
pub fn plan(
    kind: OperationKind,
    ticket_ids: &[String],
    analysis: &ReconciliationResult,
    delete_scope: DeleteScope,
) -> Vec<PlannedStep> {
    ticket_ids
        .iter()
        .map(|id| match kind {
            OperationKind::Create => plan_create(id, analysis),
            OperationKind::Sync => plan_sync(id, analysis),
            OperationKind::Delete => plan_delete(id, analysis, delete_scope),
            OperationKind::Rollback => PlannedStep::skip(id, "rollback is not a batch step"),
        })
        .collect()
}

fn plan_create(id: &str, analysis: &ReconciliationResult) -> PlannedStep {
    if let Some(task) = analysis.missing_task(id) {
        return PlannedStep::new(
            id,
            Step::CreateIssue {
                task: task.clone(),
                stale: stale_mapping(analysis, Platform::Board, &task.id),
            },
        );
    }
    if let Some(issue) = analysis.orphaned_issue(id) {
        if analysis.direction == Direction::Reverse {
            return PlannedStep::new(
                id,
                Step::CreateTask {
                    issue: issue.clone(),
                    stale: stale_mapping(analysis, Platform::Tracker, &issue.id),
                },
            );
        }
        return PlannedStep::skip(id, "orphaned issues are only created in reverse mode");
    }
    if let Some(pair) = analysis.pair(id) {
        let counterpart = if pair.task.id == id {
            &pair.issue.id
        } else {
            &pair.task.id
        };
        return PlannedStep::skip(id, format!("already linked to {counterpart}"));
    }
    PlannedStep::skip(id, not_actionable(id, analysis))
}

fn stale_mapping(
    analysis: &ReconciliationResult,
    platform: Platform,
    id: &str,
) -> Option<TicketMapping> {
    analysis
        .stale_mappings
        .iter()
        .find(|m| m.id_on(platform) == id)
        .cloned()
}

fn plan_sync(id: &str, analysis: &ReconciliationResult) -> PlannedStep {
    if let Some(pair) = analysis.mismatched_pair(id) {
        let changes = field_changes(pair);
        return PlannedStep::new(
            id,
            Step::UpdateIssue {
                pair: pair.clone(),
                changes,
            },
        );
    }
    if analysis.pair(id).is_some() {
        return PlannedStep::skip(id, "already in sync");
    }
    PlannedStep::skip(id, not_actionable(id, analysis))
}

fn plan_delete(id: &str, analysis: &ReconciliationResult, scope: DeleteScope) -> PlannedStep {
    let (task, issue) = if let Some(pair) = analysis.pair(id) {
        (Some(pair.task.clone()), Some(pair.issue.clone()))
    } else if let Some(task) = analysis.missing_task(id) {
        (Some(task.clone()), None)
    } else if let Some(issue) = analysis.orphaned_issue(id) {
        (None, Some(issue.clone()))
    } else if let Some(alert) = analysis
        .findings
        .iter()
        .find(|f| f.issue.id == id || f.task.as_ref().is_some_and(|t| t.id == id))
    {
        (alert.task.clone(), Some(alert.issue.clone()))
    } else if let Some(shown) = analysis
        .display_only
        .iter()
        .find(|d| d.task.id == id || d.issue.as_ref().is_some_and(|i| i.id == id))
    {
        (Some(shown.task.clone()), shown.issue.clone())
    } else {
        return PlannedStep::skip(id, not_actionable(id, analysis));
    };

    let task = task.filter(|_| scope.includes(Platform::Board));
    let issue = issue.filter(|_| scope.includes(Platform::Tracker));
    if task.is_none() && issue.is_none() {
        return PlannedStep::skip(id, format!("nothing to delete for scope '{scope}'"));
    }
    PlannedStep::new(id, Step::Delete { task, issue })
}

fn not_actionable(id: &str, analysis: &ReconciliationResult) -> String {
    match analysis.bucket_of(id) {
        Some(Bucket::Ignored) => "ticket is ignored".to_string(),
        Some(Bucket::DisplayOnly) => "ticket is in a display-only column".to_string(),
        Some(Bucket::Findings) => "findings alert requires triage".to_string(),
        Some(bucket) => format!("ticket is {bucket}"),
        None => crate::error::BridgeError::UnknownTicket(id.to_string()).to_string(),
    }
}

/// Changes that bring the tracker issue in line with the task.
pub fn field_changes(pair: &TicketPair) -> Vec<FieldChange> {
    pair.field_diffs
        .iter()
        .map(|diff| FieldChange {
            field: diff.field.clone(),
            old_value: diff.actual.clone(),
            new_value: diff.expected.clone(),
        })
        .collect()
}

/// Update payload for a set of tracker field changes.
pub fn issue_update(changes: &[FieldChange]) -> IssueUpdate {
    let mut update = IssueUpdate::default();
    for change in changes {
        match change.field.as_str() {
            field::STATE => update.state = Some(change.new_value.clone()),
            field::SUBSYSTEM => update.subsystem = Some(change.new_value.clone()),
            field::TITLE => update.title = change.new_value.clone(),
            field::DESCRIPTION => update.description = change.new_value.clone(),
            _ => {}
        }
    }
    update
}

/// Tracker issue for a missing task.
pub fn new_issue(task: &TaskItem, mapper: &Mapper) -> NewIssue {
    let projected = mapper.project_task(task);
    NewIssue {
        title: task.title.clone(),
        description: task.notes.clone(),
        state: projected.state,
        subsystem: projected.subsystem,
        tags: Vec::new(),
    }
}

/// Board task for an orphaned issue.
pub fn new_task(issue: &IssueItem, mapper: &Mapper) -> NewTask {
    NewTask {
        title: issue.title.clone(),
        notes: issue.description.clone(),
        column: mapper
            .column_for_state(issue.state.as_deref())
            .map(str::to_string),
        tags: mapper
            .tag_for_subsystem(issue.subsystem.as_deref())
            .map(|t| vec![t.to_string()])
            .unwrap_or_default(),
    }
}

/// Pre-operation state the snapshot must hold for `planned`.
pub fn snapshot_entries(planned: &PlannedStep, mappings: &[TicketMapping]) -> Vec<SnapshotEntry> {
    let mapping_for = |platform: Platform, id: &str| {
        mappings
            .iter()
            .find(|m| match platform {
                Platform::Board => m.task_id == id,
                Platform::Tracker => m.issue_id == id,
            })
            .cloned()
    };
    let task_entry = |task: &TaskItem| SnapshotEntry {
        ticket_id: planned.ticket_id.clone(),
        platform: Platform::Board,
        remote_id: task.id.clone(),
        before: task.field_values(),
        mapping: mapping_for(Platform::Board, &task.id),
    };
    let issue_entry = |issue: &IssueItem| SnapshotEntry {
        ticket_id: planned.ticket_id.clone(),
        platform: Platform::Tracker,
        remote_id: issue.id.clone(),
        before: issue.field_values(),
        mapping: mapping_for(Platform::Tracker, &issue.id),
    };

    match &planned.step {
        Step::CreateIssue { task, .. } => vec![task_entry(task)],
        Step::CreateTask { issue, .. } => vec![issue_entry(issue)],
        Step::UpdateIssue { pair, .. } => vec![issue_entry(&pair.issue)],
        Step::Delete { task, issue } => task
            .iter()
            .map(task_entry)
            .chain(issue.iter().map(issue_entry))
            .collect(),
        Step::Skip { .. } => Vec::new(),
    }
}
