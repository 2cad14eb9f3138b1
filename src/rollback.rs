//! Rollback snapshots.
//!
//! A snapshot is written together with its operation, before any remote
//! call, and holds the pre-operation values of every ticket the batch is
//! about to touch. Rollback replays inverse changes from those values and
//! from the operation's audit entries; it never re-derives state from the
//! remotes.

use std::collections::{BTreeMap, BTreeSet};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditAction, AuditFilter, AuditLogEntry};
use crate::bridge::Core;
use crate::error::{BridgeError, Result};
use crate::remote::{IssueUpdate, NewIssue, NewTask, TaskUpdate};
use crate::sync::{
    OperationKind, OperationStatus, OutcomeSummary, SideResult, SyncOperation, SyncReport,
    TicketOutcome,
};
use crate::types::{FieldMap, Platform, TicketMapping, field};

/// Pre-operation state of one remote ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Ticket id the batch was asked to process
    pub ticket_id: String,
    /// Side this entry captures
    pub platform: Platform,
    /// Id of the captured ticket on that side
    pub remote_id: String,
    pub before: FieldMap,
    /// Mapping that linked the ticket when the snapshot was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<TicketMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub operation_id: String,
    pub user: String,
    pub project: String,
    pub entries: Vec<SnapshotEntry>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl RollbackSnapshot {
    /// Capture a snapshot for `operation_id`, expiring after `retention_days`.
    pub fn capture(
        operation_id: impl Into<String>,
        user: impl Into<String>,
        project: impl Into<String>,
        entries: Vec<SnapshotEntry>,
        retention_days: u32,
    ) -> Self {
        let created_at = Timestamp::now();
        Self {
            operation_id: operation_id.into(),
            user: user.into(),
            project: project.into(),
            entries,
            created_at,
            expires_at: expiry(created_at, retention_days),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    pub fn entry(&self, ticket_id: &str, platform: Platform) -> Option<&SnapshotEntry> {
        self.entries
            .iter()
            .find(|e| e.ticket_id == ticket_id && e.platform == platform)
    }
}

/// Expiry of a snapshot taken at `created_at`.
pub fn expiry(created_at: Timestamp, retention_days: u32) -> Timestamp {
    let retention = SignedDuration::from_hours(i64::from(retention_days) * 24);
    created_at.checked_add(retention).unwrap_or(Timestamp::MAX)
}

/// One inverse change, and the snapshot entry it consumes.
#[derive(Debug, Clone, PartialEq)]
enum Inverse {
    /// Delete a counterpart the operation created
    RemoveCreated {
        ticket_id: String,
        platform: Platform,
        created_id: String,
        /// Mapping the create replaced, linked again once the new ticket is gone
        restore: Option<TicketMapping>,
    },
    /// Put back the named fields of a ticket the operation updated
    Restore {
        entry: SnapshotEntry,
        fields: FieldMap,
        /// Values the operation wrote, by field
        replaced: BTreeMap<String, Option<String>>,
    },
    /// Re-create a ticket the operation deleted
    Recreate { entry: SnapshotEntry },
}

impl Inverse {
    fn ticket_id(&self) -> &str {
        match self {
            Inverse::RemoveCreated { ticket_id, .. } => ticket_id,
            Inverse::Restore { entry, .. } | Inverse::Recreate { entry } => &entry.ticket_id,
        }
    }

    /// (ticket, platform) of the snapshot entry this step consumes.
    fn key(&self) -> (String, Platform) {
        match self {
            // Creates capture the source side
            Inverse::RemoveCreated {
                ticket_id,
                platform,
                ..
            } => (ticket_id.clone(), platform.other()),
            Inverse::Restore { entry, .. } | Inverse::Recreate { entry } => {
                (entry.ticket_id.clone(), entry.platform)
            }
        }
    }
}

/// Derive inverse steps from the operation's audit trail. Only changes
/// whose snapshot entry is still present are undone, so a retried rollback
/// does not repeat steps that already succeeded.
fn inverse_steps(snapshot: &RollbackSnapshot, entries: &[AuditLogEntry]) -> Vec<Inverse> {
    let mut steps = Vec::new();
    let mut touched: BTreeMap<(String, Platform), BTreeMap<String, Option<String>>> =
        BTreeMap::new();

    for entry in entries {
        match entry.action {
            AuditAction::Created => {
                let Some(created_id) = entry.new_value.clone() else {
                    continue;
                };
                if let Some(source) = snapshot.entry(&entry.ticket_id, entry.platform.other()) {
                    steps.push(Inverse::RemoveCreated {
                        ticket_id: entry.ticket_id.clone(),
                        platform: entry.platform,
                        restore: source
                            .mapping
                            .clone()
                            .filter(|m| m.id_on(entry.platform) != created_id),
                        created_id,
                    });
                }
            }
            AuditAction::Updated | AuditAction::StatusChanged => {
                if let Some(name) = &entry.field_name {
                    touched
                        .entry((entry.ticket_id.clone(), entry.platform))
                        .or_default()
                        .insert(name.clone(), entry.new_value.clone());
                }
            }
            AuditAction::Deleted => {
                if let Some(captured) = snapshot.entry(&entry.ticket_id, entry.platform) {
                    steps.push(Inverse::Recreate {
                        entry: captured.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    for ((ticket_id, platform), replaced) in touched {
        let Some(captured) = snapshot.entry(&ticket_id, platform) else {
            continue;
        };
        let fields: FieldMap = captured
            .before
            .iter()
            .filter(|(name, _)| replaced.contains_key(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if !fields.is_empty() {
            steps.push(Inverse::Restore {
                entry: captured.clone(),
                fields,
                replaced,
            });
        }
    }
    steps
}

/// Undo a completed (or failed) batch from its snapshot.
///
/// On success the original operation becomes `rolled_back` and the snapshot
/// is deleted. If any step fails the original operation is left untouched,
/// the snapshot is reduced to the steps still to undo, and
/// [`BridgeError::RollbackIncomplete`] is returned.
pub async fn rollback(core: &Core, operation_id: &str, actor: &str) -> Result<SyncReport> {
    let _batch = core.locks.begin_batch(&core.scope)?;

    let mut original = core
        .storage
        .get_operation(operation_id)?
        .filter(|op| op.scope() == core.scope)
        .ok_or_else(|| BridgeError::OperationNotFound(operation_id.to_string()))?;
    if original.kind == OperationKind::Rollback || !original.status.can_roll_back() {
        return Err(BridgeError::InvalidOperationState {
            id: original.id.clone(),
            status: format!("{} ({})", original.status, original.kind),
        });
    }

    let now = Timestamp::now();
    let mut snapshot = match core.storage.get_snapshot(operation_id)? {
        Some(snapshot) if snapshot.is_expired(now) => {
            core.storage.delete_snapshot(operation_id)?;
            return Err(BridgeError::SnapshotExpired(operation_id.to_string()));
        }
        Some(snapshot) => snapshot,
        None if expiry(original.created_at, core.settings.snapshot_retention_days) <= now => {
            return Err(BridgeError::SnapshotExpired(operation_id.to_string()));
        }
        None => return Err(BridgeError::SnapshotMissing(operation_id.to_string())),
    };

    let audit = core.audit.query(&AuditFilter::for_operation(operation_id))?;
    let steps = inverse_steps(&snapshot, &audit);

    let mut op = SyncOperation::new(&core.scope, OperationKind::Rollback, original.ticket_ids.clone());
    op.start();
    core.storage.insert_operation(&op, None)?;
    tracing::info!(
        operation_id = %op.id,
        rolls_back = %operation_id,
        steps = steps.len(),
        "starting rollback"
    );

    let replay = Replay {
        core,
        operation_id: &op.id,
        actor,
    };
    let mut sides: BTreeMap<String, Vec<SideResult>> = BTreeMap::new();
    let mut failed_keys = BTreeSet::new();
    // (ticket, platform) -> id of the re-created ticket
    let mut recreated: BTreeMap<(String, Platform), String> = BTreeMap::new();

    for step in &steps {
        let result = replay.apply(step).await;
        let ticket_id = step.ticket_id().to_string();
        match result {
            Ok(side) => {
                if let Inverse::Recreate { entry } = step {
                    recreated.insert(
                        (entry.ticket_id.clone(), entry.platform),
                        side.ticket_id.clone(),
                    );
                }
                sides.entry(ticket_id).or_default().push(side);
            }
            Err(side) => {
                failed_keys.insert(step.key());
                sides.entry(ticket_id).or_default().push(side);
            }
        }
    }

    // A failed relink is reported but not retried: the ticket already exists
    let relink_failures = replay.relink(&snapshot, &recreated).await;
    for ((ticket_id, platform), message) in &relink_failures {
        sides
            .entry(ticket_id.clone())
            .or_default()
            .push(SideResult::failed(*platform, ticket_id.as_str(), message));
    }

    let mut outcomes: Vec<TicketOutcome> = original
        .ticket_ids
        .iter()
        .map(|id| match sides.remove(id) {
            Some(results) => TicketOutcome::from_sides(id, results),
            None => TicketOutcome::skipped(id, "nothing to undo"),
        })
        .collect();
    outcomes.extend(
        sides
            .into_iter()
            .map(|(id, results)| TicketOutcome::from_sides(id, results)),
    );
    let counts = OutcomeSummary::from_outcomes(&outcomes);

    let failed = failed_keys.len() + relink_failures.len();
    if failed > 0 {
        // Keep only what is still to undo, with mappings pointing at any
        // tickets re-created on this attempt
        snapshot
            .entries
            .retain(|e| failed_keys.contains(&(e.ticket_id.clone(), e.platform)));
        for entry in &mut snapshot.entries {
            if let Some(mapping) = &mut entry.mapping {
                for ((ticket_id, platform), new_id) in &recreated {
                    if *ticket_id == entry.ticket_id {
                        match platform {
                            Platform::Board => mapping.task_id = new_id.clone(),
                            Platform::Tracker => mapping.issue_id = new_id.clone(),
                        }
                    }
                }
            }
        }
        core.storage.save_snapshot(&snapshot)?;
        op.finish(
            OperationStatus::Failed,
            json!({
                "rolls_back": operation_id,
                "summary": counts.to_string(),
                "outcomes": outcomes,
            }),
        );
        core.storage.update_operation(&op)?;
        tracing::warn!(operation_id = %operation_id, failed, "rollback incomplete");
        return Err(BridgeError::RollbackIncomplete {
            id: operation_id.to_string(),
            failed,
        });
    }

    original.status = OperationStatus::RolledBack;
    original.finished_at = Some(Timestamp::now());
    core.storage.update_operation(&original)?;
    core.storage.delete_snapshot(operation_id)?;
    op.finish(
        OperationStatus::Completed,
        json!({
            "rolls_back": operation_id,
            "summary": counts.to_string(),
            "outcomes": outcomes,
        }),
    );
    core.storage.update_operation(&op)?;
    tracing::info!(operation_id = %operation_id, summary = %counts, "rolled back");

    Ok(SyncReport::new(original, outcomes))
}

struct Replay<'a> {
    core: &'a Core,
    operation_id: &'a str,
    actor: &'a str,
}

impl Replay<'_> {
    fn entry(&self, ticket_id: &str, platform: Platform) -> AuditLogEntry {
        AuditLogEntry::new(
            &self.core.scope,
            ticket_id,
            platform,
            AuditAction::RolledBack,
            self.actor,
        )
        .with_operation(self.operation_id)
    }

    fn record(&self, entries: Vec<AuditLogEntry>) {
        if let Err(err) = self.core.audit.record(entries) {
            tracing::warn!(operation_id = %self.operation_id, error = %err, "audit write failed");
        }
    }

    /// Apply one inverse step. The returned side names the remote ticket
    /// acted on (the new id for re-creations).
    async fn apply(&self, step: &Inverse) -> std::result::Result<SideResult, SideResult> {
        let core = self.core;
        match step {
            Inverse::RemoveCreated {
                ticket_id,
                platform,
                created_id,
                restore,
            } => {
                let result = match platform {
                    Platform::Board => core.board.delete_task(created_id).await,
                    Platform::Tracker => core.tracker.delete_issue(created_id).await,
                };
                if let Err(err) = result
                    && !err.is_not_found()
                {
                    return Err(self.failed(ticket_id, *platform, created_id, err));
                }

                let mut entries = vec![
                    self.entry(ticket_id, *platform)
                        .with_change(field::ID, Some(created_id.clone()), None),
                ];
                let _guard = core.locks.lock_user(&core.scope.user).await;
                match core.storage.remove_mapping(&core.scope, *platform, created_id) {
                    Ok(Some(mapping)) => entries.push(
                        AuditLogEntry::new(
                            &core.scope,
                            ticket_id.as_str(),
                            *platform,
                            AuditAction::MappingRemoved,
                            self.actor,
                        )
                        .with_operation(self.operation_id)
                        .with_change(field::MAPPING, Some(mapping.to_string()), None),
                    ),
                    Ok(None) => {}
                    Err(err) => return Err(self.failed(ticket_id, *platform, created_id, err)),
                }
                if let Some(mapping) = restore {
                    match core.storage.upsert_mapping(mapping) {
                        Ok(_) => entries.push(
                            AuditLogEntry::new(
                                &core.scope,
                                ticket_id.as_str(),
                                *platform,
                                AuditAction::MappingAdded,
                                self.actor,
                            )
                            .with_operation(self.operation_id)
                            .with_change(field::MAPPING, None, Some(mapping.to_string())),
                        ),
                        Err(err) => {
                            tracing::warn!(ticket_id = %ticket_id, error = %err, "mapping not restored");
                        }
                    }
                }
                self.record(entries);
                Ok(SideResult::ok(*platform, created_id.clone()))
            }
            Inverse::Restore {
                entry,
                fields,
                replaced,
            } => {
                let result = match entry.platform {
                    Platform::Board => {
                        core.board
                            .update_task(&entry.remote_id, TaskUpdate::restoring(fields))
                            .await
                    }
                    Platform::Tracker => {
                        core.tracker
                            .update_issue(&entry.remote_id, IssueUpdate::restoring(fields))
                            .await
                    }
                };
                if let Err(err) = result {
                    return Err(self.failed(&entry.ticket_id, entry.platform, &entry.remote_id, err));
                }
                let entries = fields
                    .iter()
                    .map(|(name, value)| {
                        self.entry(&entry.ticket_id, entry.platform).with_change(
                            name.clone(),
                            replaced.get(name).cloned().flatten(),
                            Some(value.to_text()),
                        )
                    })
                    .collect();
                self.record(entries);
                Ok(SideResult::ok(entry.platform, entry.remote_id.clone()))
            }
            Inverse::Recreate { entry } => {
                let result = match entry.platform {
                    Platform::Board => core
                        .board
                        .create_task(NewTask::from_fields(&entry.before))
                        .await
                        .map(|task| task.id),
                    Platform::Tracker => core
                        .tracker
                        .create_issue(NewIssue::from_fields(&entry.before))
                        .await
                        .map(|issue| issue.id),
                };
                let new_id = match result {
                    Ok(id) => id,
                    Err(err) => {
                        return Err(self.failed(&entry.ticket_id, entry.platform, &entry.remote_id, err));
                    }
                };
                self.record(vec![self.entry(&entry.ticket_id, entry.platform).with_change(
                    field::ID,
                    Some(entry.remote_id.clone()),
                    Some(new_id.clone()),
                )]);
                Ok(SideResult::ok(entry.platform, new_id))
            }
        }
    }

    fn failed(&self, ticket_id: &str, platform: Platform, remote_id: &str, err: BridgeError) -> SideResult {
        let err = err.for_ticket(remote_id, platform);
        tracing::warn!(ticket_id, %platform, error = %err, "rollback step failed");
        SideResult::failed(platform, remote_id, err)
    }

    /// Restore mappings of re-created tickets. Returns the snapshot keys
    /// whose mapping could not be written.
    async fn relink(
        &self,
        snapshot: &RollbackSnapshot,
        recreated: &BTreeMap<(String, Platform), String>,
    ) -> Vec<((String, Platform), String)> {
        let mut problems = Vec::new();
        let mut linked = BTreeSet::new();
        for ((ticket_id, platform), _) in recreated {
            let Some(mut mapping) = snapshot
                .entry(ticket_id, *platform)
                .and_then(|e| e.mapping.clone())
            else {
                continue;
            };
            if !linked.insert(ticket_id.clone()) {
                continue;
            }
            for side in [Platform::Board, Platform::Tracker] {
                if let Some(new_id) = recreated.get(&(ticket_id.clone(), side)) {
                    match side {
                        Platform::Board => mapping.task_id = new_id.clone(),
                        Platform::Tracker => mapping.issue_id = new_id.clone(),
                    }
                }
            }
            let _guard = self.core.locks.lock_user(&self.core.scope.user).await;
            match self.core.storage.upsert_mapping(&mapping) {
                Ok(_) => self.record(vec![
                    AuditLogEntry::new(
                        &self.core.scope,
                        ticket_id.as_str(),
                        *platform,
                        AuditAction::MappingAdded,
                        self.actor,
                    )
                    .with_operation(self.operation_id)
                    .with_change(field::MAPPING, None, Some(mapping.to_string())),
                ]),
                Err(err) => problems.push((
                    (ticket_id.clone(), *platform),
                    format!("mapping write failed: {err}"),
                )),
            }
        }
        problems
    }
}
