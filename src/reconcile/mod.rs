//! Reconciliation engine.
//!
//! [`analyze`] takes both systems' full ticket sets, the user's mappings and
//! ignore set, and classifies every ticket into exactly one bucket. It is a
//! pure function: identical inputs produce identical buckets in identical
//! order (each bucket sorted by its primary ticket id).
//!
//! Classification order:
//! 1. ignored tickets, and the mapped counterparts of ignored tickets, are
//!    pulled out before anything else
//! 2. every remaining task is resolved against the remaining issues
//! 3. pairs whose issue is in a findings state become findings alerts
//! 4. tasks in display-only columns are reported separately, along with
//!    their counterparts
//! 5. other pairs are matched or mismatched; unresolved tasks are missing
//! 6. unclaimed issues are findings alerts or orphaned

pub mod types;

pub use types::{
    AmbiguousMatch, Bucket, BucketCounts, Direction, DisplayOnlyTicket, FieldDiff, FindingsAlert,
    IgnoredRef,
    MatchKind, ReconciliationResult, TicketPair,
};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::identity::{MappingIndex, Resolution, TargetSet, resolve};
use crate::mapper::{Mapper, same_value};
use crate::types::{ExternalTicket, IssueItem, Platform, TaskItem, TicketMapping, field};

/// Knobs for one analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeOptions {
    /// Restrict the result to tickets in this board column
    pub column_filter: Option<String>,
    pub reverse: bool,
}

impl AnalyzeOptions {
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column_filter = Some(column.into());
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// Classify `tasks` (source) against `issues` (target).
pub fn analyze(
    tasks: &[TaskItem],
    issues: &[IssueItem],
    mappings: &[TicketMapping],
    ignored_ids: &BTreeSet<String>,
    mapper: &Mapper,
    options: &AnalyzeOptions,
) -> ReconciliationResult {
    let index = MappingIndex::new(mappings);
    let mut result = ReconciliationResult {
        direction: if options.reverse {
            Direction::Reverse
        } else {
            Direction::Forward
        },
        ..Default::default()
    };

    // Ignored tickets and their explicitly mapped counterparts
    let mut suppressed: BTreeMap<String, Platform> = BTreeMap::new();
    for task in tasks.iter().filter(|t| ignored_ids.contains(&t.id)) {
        suppressed.insert(task.id.clone(), Platform::Board);
        if let Some(issue_id) = index.counterpart(Platform::Board, &task.id)
            && issues.iter().any(|i| i.id == issue_id)
        {
            suppressed.insert(issue_id.to_string(), Platform::Tracker);
        }
    }
    for issue in issues.iter().filter(|i| ignored_ids.contains(&i.id)) {
        suppressed.insert(issue.id.clone(), Platform::Tracker);
        if let Some(task_id) = index.counterpart(Platform::Tracker, &issue.id)
            && tasks.iter().any(|t| t.id == task_id)
        {
            suppressed.insert(task_id.to_string(), Platform::Board);
        }
    }
    result.ignored = suppressed
        .iter()
        .map(|(id, platform)| IgnoredRef {
            ticket_id: id.clone(),
            platform: *platform,
        })
        .collect();

    let mut tasks: Vec<&TaskItem> = tasks
        .iter()
        .filter(|t| !suppressed.contains_key(&t.id))
        .collect();
    tasks.sort_by(|a, b| a.id.cmp(&b.id));
    let mut issues: Vec<&IssueItem> = issues
        .iter()
        .filter(|i| !suppressed.contains_key(&i.id))
        .collect();
    issues.sort_by(|a, b| a.id.cmp(&b.id));
    let issues_by_id: HashMap<&str, &IssueItem> =
        issues.iter().map(|i| (i.id.as_str(), *i)).collect();

    let owned_issues: Vec<IssueItem> = issues.iter().map(|i| (*i).clone()).collect();
    let targets = TargetSet::from_issues(&owned_issues);

    let resolutions: Vec<(&TaskItem, Resolution)> = tasks
        .iter()
        .map(|task| {
            let r = resolve(&ExternalTicket::Task((*task).clone()), &index, &targets);
            tracing::debug!(task_id = %task.id, resolution = ?r, "resolved");
            (*task, r)
        })
        .collect();

    // Two tasks heuristically claiming the same issue is a tie too
    let mut claims: HashMap<&str, Vec<&str>> = HashMap::new();
    for (task, r) in &resolutions {
        if let Resolution::Matched(issue_id) = r {
            claims
                .entry(issue_id.as_str())
                .or_default()
                .push(task.id.as_str());
        }
    }

    let mut stale: BTreeMap<(String, String), TicketMapping> = BTreeMap::new();
    let mut claimed: HashSet<&str> = HashSet::new();

    for (task, resolution) in &resolutions {
        let counterpart = match resolution {
            Resolution::Mapped(id) => Some((id.as_str(), MatchKind::Mapping)),
            Resolution::Matched(id) => {
                let contenders = claims.get(id.as_str()).map(Vec::len).unwrap_or(0);
                if contenders > 1 {
                    result.ambiguous.push(AmbiguousMatch {
                        ticket_id: id.clone(),
                        platform: Platform::Tracker,
                        candidates: claims[id.as_str()].iter().map(|s| s.to_string()).collect(),
                    });
                    None
                } else {
                    Some((id.as_str(), MatchKind::Heuristic))
                }
            }
            Resolution::Ambiguous(candidates) => {
                result.ambiguous.push(AmbiguousMatch {
                    ticket_id: task.id.clone(),
                    platform: Platform::Board,
                    candidates: candidates.clone(),
                });
                None
            }
            Resolution::StaleMapping(_) => {
                if let Some(m) = mappings.iter().find(|m| m.task_id == task.id) {
                    stale.insert((m.task_id.clone(), m.issue_id.clone()), m.clone());
                }
                None
            }
            Resolution::Unmatched => None,
        };

        let issue = counterpart.and_then(|(id, via)| issues_by_id.get(id).map(|i| (*i, via)));
        if let Some((issue, _)) = issue {
            claimed.insert(issue.id.as_str());
        }

        match issue {
            Some((issue, _)) if mapper.is_findings_issue(issue) => {
                result.findings.push(FindingsAlert {
                    issue: issue.clone(),
                    task: Some((*task).clone()),
                });
            }
            _ if mapper.is_display_only_column(task.column.as_deref()) => {
                result.display_only.push(DisplayOnlyTicket {
                    task: (*task).clone(),
                    issue: issue.map(|(issue, _)| issue.clone()),
                });
            }
            Some((issue, via)) => {
                let pair = compare(task, issue, via, mapper);
                if pair.is_mismatched() {
                    result.mismatched.push(pair);
                } else {
                    result.matched.push(pair);
                }
            }
            None => result.missing.push((*task).clone()),
        }
    }

    for issue in &issues {
        if claimed.contains(issue.id.as_str()) {
            continue;
        }
        if let Some(task_id) = index.counterpart(Platform::Tracker, &issue.id)
            && !tasks.iter().any(|t| t.id == task_id)
            && let Some(m) = mappings.iter().find(|m| m.issue_id == issue.id)
        {
            stale.insert((m.task_id.clone(), m.issue_id.clone()), m.clone());
        }
        if mapper.is_findings_issue(issue) {
            result.findings.push(FindingsAlert {
                issue: (*issue).clone(),
                task: None,
            });
        } else {
            result.orphaned.push((*issue).clone());
        }
    }
    result.stale_mappings = stale.into_values().collect();

    if let Some(column) = options.column_filter.as_deref() {
        apply_column_filter(&mut result, column, mapper);
    }

    sort_buckets(&mut result);
    result
}

/// Compare the mapped board values of `task` against `issue`. Unmapped
/// board values never count as divergence.
fn compare(task: &TaskItem, issue: &IssueItem, via: MatchKind, mapper: &Mapper) -> TicketPair {
    let expected = mapper.project_task(task);
    let mut field_diffs = Vec::new();

    let status_mismatch = expected
        .state
        .as_deref()
        .is_some_and(|state| !same_value(Some(state), issue.state.as_deref()));
    if status_mismatch {
        field_diffs.push(FieldDiff {
            field: field::STATE.to_string(),
            expected: expected.state.clone(),
            actual: issue.state.clone(),
        });
    }

    let tag_mismatch = expected
        .subsystem
        .as_deref()
        .is_some_and(|subsystem| !same_value(Some(subsystem), issue.subsystem.as_deref()));
    if tag_mismatch {
        field_diffs.push(FieldDiff {
            field: field::SUBSYSTEM.to_string(),
            expected: expected.subsystem.clone(),
            actual: issue.subsystem.clone(),
        });
    }

    TicketPair {
        task: task.clone(),
        issue: issue.clone(),
        via,
        status_mismatch,
        tag_mismatch,
        field_diffs,
    }
}

fn apply_column_filter(result: &mut ReconciliationResult, column: &str, mapper: &Mapper) {
    let in_column = |task: &TaskItem| same_value(task.column.as_deref(), Some(column));
    let maps_back = |issue: &IssueItem| {
        mapper
            .column_for_state(issue.state.as_deref())
            .is_some_and(|c| same_value(Some(c), Some(column)))
    };

    result.matched.retain(|p| in_column(&p.task));
    result.mismatched.retain(|p| in_column(&p.task));
    result.missing.retain(|t| in_column(t));
    result.display_only.retain(|d| in_column(&d.task));
    result.orphaned.retain(|i| maps_back(i));
    result.findings.retain(|f| match &f.task {
        Some(task) => in_column(task),
        None => maps_back(&f.issue),
    });
}

fn sort_buckets(result: &mut ReconciliationResult) {
    result.matched.sort_by(|a, b| a.task.id.cmp(&b.task.id));
    result.mismatched.sort_by(|a, b| a.task.id.cmp(&b.task.id));
    result.missing.sort_by(|a, b| a.id.cmp(&b.id));
    result.orphaned.sort_by(|a, b| a.id.cmp(&b.id));
    result.findings.sort_by(|a, b| a.issue.id.cmp(&b.issue.id));
    result.display_only.sort_by(|a, b| a.task.id.cmp(&b.task.id));
    result.ambiguous.sort_by(|a, b| a.ticket_id.cmp(&b.ticket_id));
    result.ambiguous.dedup();
}
