//! Ticket identity resolution.
//!
//! Given a ticket from one system, find its counterpart in the other:
//! explicit [`TicketMapping`]s are authoritative; otherwise titles are
//! compared after stripping identifier prefixes such as `SEC-12 ` or
//! `[SEC-12]`. A heuristic tie is never guessed: it resolves to
//! [`Resolution::Ambiguous`] and the ticket is left for a human.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use unicase::UniCase;

use crate::types::{ExternalTicket, IssueItem, Platform, TaskItem, TicketMapping};

static ID_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[\[(]?[A-Za-z][A-Za-z0-9_]*-\d+[\])]?\s*[:\-]?\s+").expect("valid regex")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize a title for heuristic comparison.
///
/// Strips one leading identifier prefix and collapses whitespace. Case is
/// left intact; comparison goes through [`UniCase`].
pub fn normalize_title(title: &str) -> String {
    let stripped = ID_PREFIX.replace(title, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Outcome of resolving one ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Linked by an explicit mapping whose counterpart still exists
    Mapped(String),
    /// Exactly one unclaimed counterpart has the same normalized title
    Matched(String),
    /// More than one candidate; never auto-resolved
    Ambiguous(Vec<String>),
    /// A mapping exists but the counterpart is gone from the other system
    StaleMapping(String),
    Unmatched,
}

impl Resolution {
    /// The counterpart id, when resolution is conclusive.
    pub fn counterpart(&self) -> Option<&str> {
        match self {
            Resolution::Mapped(id) | Resolution::Matched(id) => Some(id),
            _ => None,
        }
    }
}

/// Bidirectional lookup over a user's mappings.
#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    task_to_issue: HashMap<String, String>,
    issue_to_task: HashMap<String, String>,
}

impl MappingIndex {
    pub fn new(mappings: &[TicketMapping]) -> Self {
        let mut index = Self::default();
        for m in mappings {
            index
                .task_to_issue
                .insert(m.task_id.clone(), m.issue_id.clone());
            index
                .issue_to_task
                .insert(m.issue_id.clone(), m.task_id.clone());
        }
        index
    }

    pub fn counterpart(&self, platform: Platform, id: &str) -> Option<&str> {
        match platform {
            Platform::Board => self.task_to_issue.get(id),
            Platform::Tracker => self.issue_to_task.get(id),
        }
        .map(String::as_str)
    }

    pub fn is_mapped(&self, platform: Platform, id: &str) -> bool {
        self.counterpart(platform, id).is_some()
    }
}

/// The set of tickets on the other side that a resolver may return.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    platform: Option<Platform>,
    ids: HashSet<String>,
    by_title: HashMap<UniCase<String>, Vec<String>>,
}

impl TargetSet {
    fn build<'a>(platform: Platform, items: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut set = Self {
            platform: Some(platform),
            ..Default::default()
        };
        for (id, title) in items {
            set.ids.insert(id.to_string());
            let key = UniCase::new(normalize_title(title));
            if key.is_empty() {
                continue;
            }
            set.by_title.entry(key).or_default().push(id.to_string());
        }
        for ids in set.by_title.values_mut() {
            ids.sort();
        }
        set
    }

    pub fn from_issues(issues: &[IssueItem]) -> Self {
        Self::build(
            Platform::Tracker,
            issues.iter().map(|i| (i.id.as_str(), i.title.as_str())),
        )
    }

    pub fn from_tasks(tasks: &[TaskItem]) -> Self {
        Self::build(
            Platform::Board,
            tasks.iter().map(|t| (t.id.as_str(), t.title.as_str())),
        )
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn candidates(&self, title: &str) -> &[String] {
        self.by_title
            .get(&UniCase::new(normalize_title(title)))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Resolve `ticket` against `targets` (the other system's tickets).
///
/// Pure and read-only; callers persist mappings only after a successful
/// create.
pub fn resolve(ticket: &ExternalTicket, mappings: &MappingIndex, targets: &TargetSet) -> Resolution {
    let platform = ticket.platform();
    debug_assert_eq!(targets.platform, Some(platform.other()));

    if let Some(counterpart) = mappings.counterpart(platform, ticket.id()) {
        if targets.contains(counterpart) {
            return Resolution::Mapped(counterpart.to_string());
        }
        return Resolution::StaleMapping(counterpart.to_string());
    }

    // Targets already linked to some other ticket are not up for grabs.
    let unclaimed: Vec<&String> = targets
        .candidates(ticket.title())
        .iter()
        .filter(|id| !mappings.is_mapped(platform.other(), id))
        .collect();

    match unclaimed.as_slice() {
        [] => Resolution::Unmatched,
        [only] => Resolution::Matched((*only).clone()),
        many => Resolution::Ambiguous(many.iter().map(|s| (*s).clone()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MappingOrigin, Scope};

    fn task(id: &str, title: &str) -> ExternalTicket {
        ExternalTicket::Task(TaskItem::new(id, title))
    }

    #[test]
    fn test_normalize_title_strips_prefixes() {
        assert_eq!(normalize_title("SEC-123 Fix login bug"), "Fix login bug");
        assert_eq!(normalize_title("[SEC-123] Fix login bug"), "Fix login bug");
        assert_eq!(normalize_title("SEC-123: Fix  login\tbug"), "Fix login bug");
        assert_eq!(normalize_title("  Fix login bug "), "Fix login bug");
        // A bare identifier with no following text is not a prefix
        assert_eq!(normalize_title("SEC-123"), "SEC-123");
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let scope = Scope::new("alice", "p");
        let mappings = MappingIndex::new(&[TicketMapping::new(
            &scope,
            "T-1",
            "SEC-9",
            MappingOrigin::Manual,
        )]);
        let targets = TargetSet::from_issues(&[
            IssueItem::new("SEC-9", "Something else"),
            IssueItem::new("SEC-1", "Fix login bug"),
        ]);

        let r = resolve(&task("T-1", "Fix login bug"), &mappings, &targets);
        assert_eq!(r, Resolution::Mapped("SEC-9".to_string()));
    }

    #[test]
    fn test_stale_mapping_is_reported() {
        let scope = Scope::new("alice", "p");
        let mappings = MappingIndex::new(&[TicketMapping::new(
            &scope,
            "T-1",
            "SEC-9",
            MappingOrigin::Created,
        )]);
        let targets = TargetSet::from_issues(&[IssueItem::new("SEC-1", "Fix login bug")]);

        let r = resolve(&task("T-1", "Fix login bug"), &mappings, &targets);
        assert_eq!(r, Resolution::StaleMapping("SEC-9".to_string()));
        assert_eq!(r.counterpart(), None);
    }

    #[test]
    fn test_heuristic_match_case_insensitive() {
        let targets = TargetSet::from_issues(&[IssueItem::new("SEC-1", "SEC-1 fix LOGIN bug")]);
        let r = resolve(
            &task("T-1", "Fix login bug"),
            &MappingIndex::default(),
            &targets,
        );
        assert_eq!(r, Resolution::Matched("SEC-1".to_string()));
    }

    #[test]
    fn test_heuristic_ambiguity_is_not_guessed() {
        let targets = TargetSet::from_issues(&[
            IssueItem::new("SEC-2", "Fix login bug"),
            IssueItem::new("SEC-1", "fix login bug"),
        ]);
        let r = resolve(
            &task("T-1", "Fix login bug"),
            &MappingIndex::default(),
            &targets,
        );
        assert_eq!(
            r,
            Resolution::Ambiguous(vec!["SEC-1".to_string(), "SEC-2".to_string()])
        );
    }

    #[test]
    fn test_heuristic_skips_claimed_targets() {
        let scope = Scope::new("alice", "p");
        let mappings = MappingIndex::new(&[TicketMapping::new(
            &scope,
            "T-9",
            "SEC-2",
            MappingOrigin::Manual,
        )]);
        let targets = TargetSet::from_issues(&[
            IssueItem::new("SEC-2", "Fix login bug"),
            IssueItem::new("SEC-1", "Fix login bug"),
        ]);
        let r = resolve(&task("T-1", "Fix login bug"), &mappings, &targets);
        assert_eq!(r, Resolution::Matched("SEC-1".to_string()));
    }

    #[test]
    fn test_resolve_issue_against_tasks() {
        let targets = TargetSet::from_tasks(&[TaskItem::new("T-4", "Rotate keys")]);
        let issue = ExternalTicket::Issue(IssueItem::new("SEC-4", "SEC-4 Rotate keys"));
        let r = resolve(&issue, &MappingIndex::default(), &targets);
        assert_eq!(r, Resolution::Matched("T-4".to_string()));
    }
}
