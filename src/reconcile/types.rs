use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::types::{IssueItem, Platform, TaskItem, TicketMapping};

/// Which side's unmatched tickets are create-candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Missing tasks become tracker issues
    #[default]
    Forward,
    /// Additionally, orphaned issues become board tasks
    Reverse,
}

/// How a pair was linked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Mapping,
    Heuristic,
}

/// A field whose mapped board value differs from the tracker value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    /// Value the board projects to
    pub expected: Option<String>,
    /// Value currently on the tracker
    pub actual: Option<String>,
}

/// A task and its tracker counterpart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPair {
    pub task: TaskItem,
    pub issue: IssueItem,
    pub via: MatchKind,
    pub status_mismatch: bool,
    pub tag_mismatch: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_diffs: Vec<FieldDiff>,
}

impl TicketPair {
    pub fn is_mismatched(&self) -> bool {
        self.status_mismatch || self.tag_mismatch
    }
}

/// A tracker issue in a findings state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingsAlert {
    pub issue: IssueItem,
    /// Counterpart task, when one resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskItem>,
}

/// A task in a display-only column, with the issue it resolved to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayOnlyTicket {
    pub task: TaskItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<IssueItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredRef {
    pub ticket_id: String,
    pub platform: Platform,
}

/// A heuristic tie left for a human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbiguousMatch {
    pub ticket_id: String,
    pub platform: Platform,
    pub candidates: Vec<String>,
}

/// Partition bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Matched,
    Mismatched,
    Missing,
    Orphaned,
    Findings,
    Ignored,
    DisplayOnly,
}

enum_display_fromstr!(Bucket, BridgeError::Other, {
    Matched => "matched",
    Mismatched => "mismatched",
    Missing => "missing",
    Orphaned => "orphaned",
    Findings => "findings",
    Ignored => "ignored",
    DisplayOnly => "display_only",
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub direction: Direction,
    pub matched: Vec<TicketPair>,
    pub mismatched: Vec<TicketPair>,
    /// Board tasks with no counterpart
    pub missing: Vec<TaskItem>,
    /// Tracker issues with no counterpart
    pub orphaned: Vec<IssueItem>,
    pub findings: Vec<FindingsAlert>,
    pub ignored: Vec<IgnoredRef>,
    /// Tasks in display-only columns and their counterparts; reported,
    /// never synced
    pub display_only: Vec<DisplayOnlyTicket>,
    pub ambiguous: Vec<AmbiguousMatch>,
    /// Mappings whose counterpart no longer exists on one side
    pub stale_mappings: Vec<TicketMapping>,
}

impl ReconciliationResult {
    /// Bucket holding `ticket_id`, from either side.
    pub fn bucket_of(&self, ticket_id: &str) -> Option<Bucket> {
        let in_pair = |p: &TicketPair| p.task.id == ticket_id || p.issue.id == ticket_id;
        if self.ignored.iter().any(|i| i.ticket_id == ticket_id) {
            Some(Bucket::Ignored)
        } else if self.matched.iter().any(in_pair) {
            Some(Bucket::Matched)
        } else if self.mismatched.iter().any(in_pair) {
            Some(Bucket::Mismatched)
        } else if self.missing.iter().any(|t| t.id == ticket_id) {
            Some(Bucket::Missing)
        } else if self.orphaned.iter().any(|i| i.id == ticket_id) {
            Some(Bucket::Orphaned)
        } else if self.findings.iter().any(|f| {
            f.issue.id == ticket_id || f.task.as_ref().is_some_and(|t| t.id == ticket_id)
        }) {
            Some(Bucket::Findings)
        } else if self.display_only.iter().any(|d| {
            d.task.id == ticket_id || d.issue.as_ref().is_some_and(|i| i.id == ticket_id)
        }) {
            Some(Bucket::DisplayOnly)
        } else {
            None
        }
    }

    /// Pair (matched or mismatched) containing `ticket_id`.
    pub fn pair(&self, ticket_id: &str) -> Option<&TicketPair> {
        self.matched
            .iter()
            .chain(&self.mismatched)
            .find(|p| p.task.id == ticket_id || p.issue.id == ticket_id)
    }

    pub fn mismatched_pair(&self, ticket_id: &str) -> Option<&TicketPair> {
        self.mismatched
            .iter()
            .find(|p| p.task.id == ticket_id || p.issue.id == ticket_id)
    }

    pub fn missing_task(&self, ticket_id: &str) -> Option<&TaskItem> {
        self.missing.iter().find(|t| t.id == ticket_id)
    }

    pub fn orphaned_issue(&self, ticket_id: &str) -> Option<&IssueItem> {
        self.orphaned.iter().find(|i| i.id == ticket_id)
    }

    /// Ids a create batch may act on.
    pub fn create_candidates(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.missing.iter().map(|t| t.id.clone()).collect();
        if self.direction == Direction::Reverse {
            ids.extend(self.orphaned.iter().map(|i| i.id.clone()));
        }
        ids
    }

    /// Ids a sync batch may act on (board ids of mismatched pairs).
    pub fn sync_candidates(&self) -> Vec<String> {
        self.mismatched.iter().map(|p| p.task.id.clone()).collect()
    }

    /// Bucket sizes, for logs and summaries.
    pub fn counts(&self) -> BucketCounts {
        BucketCounts {
            matched: self.matched.len(),
            mismatched: self.mismatched.len(),
            missing: self.missing.len(),
            orphaned: self.orphaned.len(),
            findings: self.findings.len(),
            ignored: self.ignored.len(),
            display_only: self.display_only.len(),
            ambiguous: self.ambiguous.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub matched: usize,
    pub mismatched: usize,
    pub missing: usize,
    pub orphaned: usize,
    pub findings: usize,
    pub ignored: usize,
    pub display_only: usize,
    pub ambiguous: usize,
}
