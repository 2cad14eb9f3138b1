//! Audit log record types.
//!
//! Entries are immutable once written. Each one describes a single mutation
//! of a remote ticket or of local mapping/ignore state, with enough context
//! (operation id, platform, field) to be read without the operation that
//! produced it.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::types::{Platform, Scope};

/// What happened to the ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    StatusChanged,
    Deleted,
    Ignored,
    Unignored,
    RolledBack,
    MappingAdded,
    MappingRemoved,
}

enum_display_fromstr!(AuditAction, BridgeError::invalid_audit_action, {
    Created => "created",
    Updated => "updated",
    StatusChanged => "status_changed",
    Deleted => "deleted",
    Ignored => "ignored",
    Unignored => "unignored",
    RolledBack => "rolled_back",
    MappingAdded => "mapping_added",
    MappingRemoved => "mapping_removed",
});

/// A single audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    /// Batch that produced the entry; absent for manual actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub user: String,
    pub project: String,
    pub ticket_id: String,
    pub platform: Platform,
    pub action: AuditAction,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    pub timestamp: Timestamp,
}

impl AuditLogEntry {
    pub fn new(
        scope: &Scope,
        ticket_id: impl Into<String>,
        platform: Platform,
        action: AuditAction,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_id: None,
            user: scope.user.clone(),
            project: scope.project.clone(),
            ticket_id: ticket_id.into(),
            platform,
            action,
            actor: actor.into(),
            field_name: None,
            old_value: None,
            new_value: None,
            timestamp: Timestamp::now(),
        }
    }

    pub fn with_operation(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Record a field-level change. Empty values are stored as absent.
    pub fn with_change(
        mut self,
        field: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        self.field_name = Some(field.into());
        self.old_value = old_value.filter(|v| !v.is_empty());
        self.new_value = new_value.filter(|v| !v.is_empty());
        self
    }

    pub fn with_new_value(mut self, new_value: impl Into<String>) -> Self {
        self.new_value = Some(new_value.into());
        self
    }
}

/// Read-side filter over the audit log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub ticket_id: Option<String>,
    pub platform: Option<Platform>,
    pub action: Option<AuditAction>,
    pub actor: Option<String>,
    pub operation_id: Option<String>,
    /// Inclusive lower bound
    pub since: Option<Timestamp>,
    /// Exclusive upper bound
    pub until: Option<Timestamp>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn for_ticket(ticket_id: impl Into<String>) -> Self {
        Self {
            ticket_id: Some(ticket_id.into()),
            ..Default::default()
        }
    }

    pub fn for_operation(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: Some(operation_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(ticket_id) = &self.ticket_id
            && entry.ticket_id != *ticket_id
        {
            return false;
        }
        if self.platform.is_some_and(|p| p != entry.platform) {
            return false;
        }
        if self.action.is_some_and(|a| a != entry.action) {
            return false;
        }
        if let Some(actor) = &self.actor
            && !entry.actor.eq_ignore_ascii_case(actor)
        {
            return false;
        }
        if let Some(operation_id) = &self.operation_id
            && entry.operation_id.as_deref() != Some(operation_id.as_str())
        {
            return false;
        }
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp >= until) {
            return false;
        }
        true
    }

    /// Apply the filter to entries in write order; the sort is stable so
    /// entries sharing a timestamp keep that order.
    pub fn apply(&self, entries: impl IntoIterator<Item = AuditLogEntry>) -> Vec<AuditLogEntry> {
        let mut matched: Vec<AuditLogEntry> =
            entries.into_iter().filter(|e| self.matches(e)).collect();
        matched.sort_by_key(|e| e.timestamp);
        if let Some(limit) = self.limit
            && matched.len() > limit
        {
            matched.drain(..matched.len() - limit);
        }
        matched
    }
}
