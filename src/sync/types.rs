use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::types::{Platform, Scope};

/// Kind of batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Sync,
    Create,
    Delete,
    Rollback,
}

enum_display_fromstr!(OperationKind, BridgeError::invalid_operation_kind, {
    Sync => "sync" | "update",
    Create => "create",
    Delete => "delete",
    Rollback => "rollback",
});

/// Lifecycle of a batch: `pending → running → completed | failed`, and
/// `completed | failed → rolled_back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

enum_display_fromstr!(OperationStatus, BridgeError::invalid_operation_status, {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    RolledBack => "rolled_back",
});

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::RolledBack
        )
    }

    /// Whether a rollback may be attempted from this status.
    pub fn can_roll_back(self) -> bool {
        matches!(self, OperationStatus::Completed | OperationStatus::Failed)
    }
}

/// Which side(s) a delete removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    Task,
    Issue,
    #[default]
    Both,
}

enum_display_fromstr!(DeleteScope, BridgeError::invalid_delete_scope, {
    Task => "task" | "board" | "asana",
    Issue => "issue" | "tracker" | "youtrack",
    Both => "both",
});

impl DeleteScope {
    pub fn includes(self, platform: Platform) -> bool {
        match (self, platform) {
            (DeleteScope::Both, _) => true,
            (DeleteScope::Task, Platform::Board) => true,
            (DeleteScope::Issue, Platform::Tracker) => true,
            _ => false,
        }
    }
}

/// One attempted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: String,
    pub user: String,
    pub project: String,
    pub kind: OperationKind,
    pub ticket_ids: Vec<String>,
    pub status: OperationStatus,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Free-form result metadata (summary, per-ticket outcomes, errors)
    #[serde(default)]
    pub result: serde_json::Value,
}

impl SyncOperation {
    pub fn new(scope: &Scope, kind: OperationKind, ticket_ids: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user: scope.user.clone(),
            project: scope.project.clone(),
            kind,
            ticket_ids,
            status: OperationStatus::Pending,
            created_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
            result: serde_json::Value::Null,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.user.clone(), self.project.clone())
    }

    pub fn start(&mut self) {
        self.status = OperationStatus::Running;
        self.started_at = Some(Timestamp::now());
    }

    pub fn finish(&mut self, status: OperationStatus, result: serde_json::Value) {
        self.status = status;
        self.finished_at = Some(Timestamp::now());
        self.result = result;
    }
}

/// Per-ticket (or per-side) result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Partial,
    Skipped,
}

enum_display!(OutcomeStatus, {
    Success => "success",
    Failed => "failed",
    Partial => "partial",
    Skipped => "skipped",
});

/// Result of one side of a two-sided action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideResult {
    pub platform: Platform,
    pub ticket_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SideResult {
    pub fn ok(platform: Platform, ticket_id: impl Into<String>) -> Self {
        Self {
            platform,
            ticket_id: ticket_id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(platform: Platform, ticket_id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            platform,
            ticket_id: ticket_id.into(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Outcome of one requested ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketOutcome {
    pub ticket_id: String,
    pub status: OutcomeStatus,
    /// Counterpart created or updated, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterpart_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sides: Vec<SideResult>,
    /// Short explanation for skips and failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TicketOutcome {
    pub fn success(ticket_id: impl Into<String>, counterpart_id: Option<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            status: OutcomeStatus::Success,
            counterpart_id,
            sides: Vec::new(),
            message: None,
        }
    }

    pub fn failed(ticket_id: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            status: OutcomeStatus::Failed,
            counterpart_id: None,
            sides: Vec::new(),
            message: Some(message.to_string()),
        }
    }

    pub fn skipped(ticket_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            status: OutcomeStatus::Skipped,
            counterpart_id: None,
            sides: Vec::new(),
            message: Some(reason.into()),
        }
    }

    /// Combine independent side results: all ok is success, none ok is
    /// failed, anything else is partial.
    pub fn from_sides(ticket_id: impl Into<String>, sides: Vec<SideResult>) -> Self {
        let ok = sides.iter().filter(|s| s.success).count();
        let status = match ok {
            0 => OutcomeStatus::Failed,
            n if n == sides.len() => OutcomeStatus::Success,
            _ => OutcomeStatus::Partial,
        };
        let message = sides
            .iter()
            .filter_map(|s| s.error.as_ref().map(|e| format!("{}: {e}", s.platform)))
            .collect::<Vec<_>>();
        Self {
            ticket_id: ticket_id.into(),
            status,
            counterpart_id: None,
            sides,
            message: (!message.is_empty()).then(|| message.join("; ")),
        }
    }

    pub fn with_counterpart(mut self, counterpart_id: impl Into<String>) -> Self {
        self.counterpart_id = Some(counterpart_id.into());
        self
    }
}

/// Outcome counts for a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub partial: usize,
    pub skipped: usize,
}

impl OutcomeSummary {
    pub fn from_outcomes(outcomes: &[TicketOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Success => summary.succeeded += 1,
                OutcomeStatus::Failed => summary.failed += 1,
                OutcomeStatus::Partial => summary.partial += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

impl fmt::Display for OutcomeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} partial, {} skipped",
            self.succeeded, self.failed, self.partial, self.skipped
        )
    }
}

/// What an execute or rollback call returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub operation: SyncOperation,
    pub outcomes: Vec<TicketOutcome>,
    pub counts: OutcomeSummary,
    pub summary: String,
}

impl SyncReport {
    pub fn new(operation: SyncOperation, outcomes: Vec<TicketOutcome>) -> Self {
        let counts = OutcomeSummary::from_outcomes(&outcomes);
        Self {
            operation,
            outcomes,
            summary: counts.to_string(),
            counts,
        }
    }

    pub fn outcome(&self, ticket_id: &str) -> Option<&TicketOutcome> {
        self.outcomes.iter().find(|o| o.ticket_id == ticket_id)
    }
}
