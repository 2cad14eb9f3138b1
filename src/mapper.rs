//! Translation between board and tracker vocabularies.
//!
//! Board columns map to tracker workflow states, board tags map to tracker
//! subsystems. Every lookup is case-insensitive. A mapping marked
//! `display_only` is shown in reports but never drives a sync.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use unicase::UniCase;

use crate::config::MappingConfig;
use crate::types::{IssueItem, TaskItem};

/// Board column → tracker state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub column: String,
    pub state: String,
    #[serde(default)]
    pub display_only: bool,
}

impl ColumnMapping {
    pub fn new(column: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            state: state.into(),
            display_only: false,
        }
    }

    pub fn display_only(mut self) -> Self {
        self.display_only = true;
        self
    }
}

/// Board tag → tracker subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMapping {
    pub tag: String,
    pub subsystem: String,
    #[serde(default)]
    pub display_only: bool,
}

impl TagMapping {
    pub fn new(tag: impl Into<String>, subsystem: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            subsystem: subsystem.into(),
            display_only: false,
        }
    }

    pub fn display_only(mut self) -> Self {
        self.display_only = true;
        self
    }
}

/// Case-insensitive equality of two optional values, ignoring surrounding
/// whitespace. Two absent values are equal.
pub fn same_value(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => UniCase::new(a.trim()) == UniCase::new(b.trim()),
        (None, None) => true,
        _ => false,
    }
}

/// Tracker-side values a task projects to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectedFields {
    pub state: Option<String>,
    pub subsystem: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Mapper {
    columns: Vec<ColumnMapping>,
    column_index: HashMap<UniCase<String>, usize>,
    tags: Vec<TagMapping>,
    tag_index: HashMap<UniCase<String>, usize>,
    findings_states: Vec<UniCase<String>>,
}

impl Mapper {
    pub fn new(columns: &[ColumnMapping], tags: &[TagMapping], findings_states: &[String]) -> Self {
        let column_index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (UniCase::new(c.column.trim().to_string()), i))
            .collect();
        let tag_index = tags
            .iter()
            .enumerate()
            .map(|(i, t)| (UniCase::new(t.tag.trim().to_string()), i))
            .collect();

        Self {
            columns: columns.to_vec(),
            column_index,
            tags: tags.to_vec(),
            tag_index,
            findings_states: findings_states
                .iter()
                .map(|s| UniCase::new(s.trim().to_string()))
                .collect(),
        }
    }

    pub fn from_config(config: &MappingConfig) -> Self {
        Self::new(&config.columns, &config.tags, &config.findings_states)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnMapping> {
        self.column_index
            .get(&UniCase::new(column.trim().to_string()))
            .map(|&i| &self.columns[i])
    }

    /// Tracker state for a board column, if the column is mapped.
    pub fn map_column(&self, column: Option<&str>) -> Option<&str> {
        column
            .and_then(|c| self.column(c))
            .map(|m| m.state.as_str())
    }

    pub fn is_display_only_column(&self, column: Option<&str>) -> bool {
        column
            .and_then(|c| self.column(c))
            .is_some_and(|m| m.display_only)
    }

    /// Subsystem for a tag list: the first tag, in task order, with a
    /// syncable mapping.
    pub fn map_tags(&self, tags: &[String]) -> Option<&str> {
        tags.iter()
            .filter_map(|tag| self.tag_index.get(&UniCase::new(tag.trim().to_string())))
            .map(|&i| &self.tags[i])
            .find(|m| !m.display_only)
            .map(|m| m.subsystem.as_str())
    }

    pub fn project_task(&self, task: &TaskItem) -> ProjectedFields {
        ProjectedFields {
            state: self.map_column(task.column.as_deref()).map(str::to_string),
            subsystem: self.map_tags(&task.tags).map(str::to_string),
        }
    }

    pub fn is_findings_state(&self, state: Option<&str>) -> bool {
        state.is_some_and(|s| {
            let s = UniCase::new(s.trim().to_string());
            self.findings_states.iter().any(|f| *f == s)
        })
    }

    pub fn is_findings_issue(&self, issue: &IssueItem) -> bool {
        self.is_findings_state(issue.state.as_deref())
    }

    /// Reverse lookup: first syncable column whose state matches.
    pub fn column_for_state(&self, state: Option<&str>) -> Option<&str> {
        let state = state?;
        self.columns
            .iter()
            .filter(|m| !m.display_only)
            .find(|m| same_value(Some(&m.state), Some(state)))
            .map(|m| m.column.as_str())
    }

    /// Reverse lookup: first syncable tag whose subsystem matches.
    pub fn tag_for_subsystem(&self, subsystem: Option<&str>) -> Option<&str> {
        let subsystem = subsystem?;
        self.tags
            .iter()
            .filter(|m| !m.display_only)
            .find(|m| same_value(Some(&m.subsystem), Some(subsystem)))
            .map(|m| m.tag.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> Mapper {
        Mapper::new(
            &[
                ColumnMapping::new("In Progress", "In Progress"),
                ColumnMapping::new("Done", "Fixed"),
                ColumnMapping::new("Ideas", "Open").display_only(),
                ColumnMapping::new("Backlog", "Open"),
            ],
            &[
                TagMapping::new("Security", "security"),
                TagMapping::new("Backend", "backend"),
                TagMapping::new("Design", "ui").display_only(),
            ],
            &["Findings".to_string()],
        )
    }

    #[test]
    fn test_map_column_case_insensitive() {
        let m = mapper();
        assert_eq!(m.map_column(Some("done")), Some("Fixed"));
        assert_eq!(m.map_column(Some(" In progress ")), Some("In Progress"));
        assert_eq!(m.map_column(Some("Unknown")), None);
        assert_eq!(m.map_column(None), None);
    }

    #[test]
    fn test_display_only_column() {
        let m = mapper();
        assert!(m.is_display_only_column(Some("ideas")));
        assert!(!m.is_display_only_column(Some("Done")));
        assert!(!m.is_display_only_column(None));
    }

    #[test]
    fn test_map_tags_skips_display_only_and_unmapped() {
        let m = mapper();
        let tags = vec![
            "frontend".to_string(),
            "Design".to_string(),
            "backend".to_string(),
            "Security".to_string(),
        ];
        assert_eq!(m.map_tags(&tags), Some("backend"));
        assert_eq!(m.map_tags(&["Design".to_string()]), None);
    }

    #[test]
    fn test_reverse_lookups_skip_display_only() {
        let m = mapper();
        assert_eq!(m.column_for_state(Some("open")), Some("Backlog"));
        assert_eq!(m.column_for_state(Some("Wontfix")), None);
        assert_eq!(m.tag_for_subsystem(Some("SECURITY")), Some("Security"));
        assert_eq!(m.tag_for_subsystem(Some("ui")), None);
    }

    #[test]
    fn test_findings_state() {
        let m = mapper();
        assert!(m.is_findings_state(Some("findings")));
        assert!(!m.is_findings_state(Some("Open")));
        assert!(!m.is_findings_state(None));
    }

    #[test]
    fn test_same_value() {
        assert!(same_value(Some("Backend"), Some(" backend")));
        assert!(same_value(None, None));
        assert!(!same_value(Some("a"), None));
    }
}
