use std::collections::BTreeMap;
use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Field names shared by snapshots, audit entries and change plans.
pub mod field {
    /// Remote id of a created or deleted ticket
    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const NOTES: &str = "notes";
    pub const COLUMN: &str = "column";
    pub const STATE: &str = "state";
    pub const SUBSYSTEM: &str = "subsystem";
    pub const TAGS: &str = "tags";
    pub const MAPPING: &str = "mapping";
}

/// The two remote systems being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// The task board (source side in forward mode).
    Board,
    /// The issue tracker (target side in forward mode).
    Tracker,
}

enum_display_fromstr!(Platform, BridgeError::invalid_platform, {
    Board => "board" | "asana" | "task",
    Tracker => "tracker" | "youtrack" | "issue",
});

impl Platform {
    pub fn other(self) -> Platform {
        match self {
            Platform::Board => Platform::Tracker,
            Platform::Tracker => Platform::Board,
        }
    }
}

/// A (user, project pair) partition. Every mapping, ignore entry, operation and
/// audit row belongs to exactly one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub user: String,
    pub project: String,
}

impl Scope {
    pub fn new(user: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            project: project.into(),
        }
    }
}

impl Scope {
    /// Tracker project key, the part of `project` after the last `:`.
    pub fn tracker_key(&self) -> Option<&str> {
        self.project
            .rsplit_once(':')
            .map(|(_, key)| key)
            .filter(|key| !key.is_empty())
    }

    /// Which side an id belongs to: tracker ids carry the project key
    /// prefix (`SEC-42`), anything else is a board task.
    pub fn platform_of(&self, ticket_id: &str) -> Platform {
        match self.tracker_key() {
            Some(key)
                if ticket_id.len() > key.len() + 1
                    && ticket_id
                        .get(..key.len())
                        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(key))
                    && ticket_id.as_bytes().get(key.len()) == Some(&b'-') =>
            {
                Platform::Tracker
            }
            _ => Platform::Board,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.project)
    }
}

/// A custom-field value as reported by either remote system.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Flatten a list of strings; scalars become a one-element list.
    pub fn as_string_list(&self) -> Vec<String> {
        match self {
            FieldValue::Null => Vec::new(),
            FieldValue::List(items) => items.iter().map(FieldValue::to_text).collect(),
            other => vec![other.to_text()],
        }
    }

    /// Human-readable rendering used in audit entries and CSV export.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            FieldValue::String(s) => s.clone(),
            FieldValue::List(items) => items
                .iter()
                .map(FieldValue::to_text)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Convert an arbitrary JSON value. Objects are reduced to their `name`,
    /// `text` or `presentation` member, which is how both remote APIs encode
    /// enum-like custom field values.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => n.as_f64().map_or(FieldValue::Null, FieldValue::Number),
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => ["name", "text", "presentation", "login"]
                .iter()
                .find_map(|key| map.get(*key))
                .map_or(FieldValue::Null, Self::from_json),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<Option<String>> for FieldValue {
    fn from(s: Option<String>) -> Self {
        s.map_or(FieldValue::Null, FieldValue::String)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items.into_iter().map(FieldValue::String).collect())
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

/// Captured field values of one ticket, keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A task on the board.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    /// Board column (section) the task sits in
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub custom_fields: FieldMap,
}

impl TaskItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// The syncable fields, as stored in rollback snapshots.
    pub fn field_values(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(field::TITLE.to_string(), self.title.clone().into());
        map.insert(field::NOTES.to_string(), self.notes.clone().into());
        map.insert(field::COLUMN.to_string(), self.column.clone().into());
        map.insert(field::TAGS.to_string(), self.tags.clone().into());
        map
    }
}

/// An issue in the tracker.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IssueItem {
    /// Readable issue id (e.g. `SEC-42`)
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Workflow state
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default)]
    pub custom_fields: FieldMap,
}

impl IssueItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn field_values(&self) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert(field::TITLE.to_string(), self.title.clone().into());
        map.insert(
            field::DESCRIPTION.to_string(),
            self.description.clone().into(),
        );
        map.insert(field::STATE.to_string(), self.state.clone().into());
        map.insert(field::SUBSYSTEM.to_string(), self.subsystem.clone().into());
        map.insert(field::TAGS.to_string(), self.tags.clone().into());
        map
    }
}

/// A ticket fetched from either side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "lowercase")]
pub enum ExternalTicket {
    #[serde(rename = "board")]
    Task(TaskItem),
    #[serde(rename = "tracker")]
    Issue(IssueItem),
}

impl ExternalTicket {
    pub fn id(&self) -> &str {
        match self {
            ExternalTicket::Task(t) => &t.id,
            ExternalTicket::Issue(i) => &i.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ExternalTicket::Task(t) => &t.title,
            ExternalTicket::Issue(i) => &i.title,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            ExternalTicket::Task(_) => Platform::Board,
            ExternalTicket::Issue(_) => Platform::Tracker,
        }
    }

    pub fn field_values(&self) -> FieldMap {
        match self {
            ExternalTicket::Task(t) => t.field_values(),
            ExternalTicket::Issue(i) => i.field_values(),
        }
    }
}

/// How a mapping came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingOrigin {
    /// Linked by a user
    Manual,
    /// Written after the executor created the counterpart
    Created,
}

enum_display_fromstr!(MappingOrigin, BridgeError::Other, {
    Manual => "manual",
    Created => "created",
});

/// Durable link between a board task and a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMapping {
    pub user: String,
    pub project: String,
    pub task_id: String,
    pub issue_id: String,
    pub origin: MappingOrigin,
    pub created_at: Timestamp,
}

impl TicketMapping {
    pub fn new(
        scope: &Scope,
        task_id: impl Into<String>,
        issue_id: impl Into<String>,
        origin: MappingOrigin,
    ) -> Self {
        Self {
            user: scope.user.clone(),
            project: scope.project.clone(),
            task_id: task_id.into(),
            issue_id: issue_id.into(),
            origin,
            created_at: Timestamp::now(),
        }
    }

    /// Id on `platform`.
    pub fn id_on(&self, platform: Platform) -> &str {
        match platform {
            Platform::Board => &self.task_id,
            Platform::Tracker => &self.issue_id,
        }
    }
}

impl fmt::Display for TicketMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.task_id, self.issue_id)
    }
}

/// Whether an ignore entry survives "clear temporary ignores".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreType {
    Temporary,
    Permanent,
}

enum_display_fromstr!(IgnoreType, BridgeError::invalid_ignore_type, {
    Temporary => "temporary" | "temp",
    Permanent => "permanent" | "forever",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredTicket {
    pub user: String,
    pub project: String,
    pub ticket_id: String,
    pub ignore_type: IgnoreType,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_aliases() {
        assert_eq!("asana".parse::<Platform>().unwrap(), Platform::Board);
        assert_eq!("YouTrack".parse::<Platform>().unwrap(), Platform::Tracker);
        assert!("jira".parse::<Platform>().is_err());
        assert_eq!(Platform::Board.other(), Platform::Tracker);
    }

    #[test]
    fn test_scope_platform_of() {
        let scope = Scope::new("alice", "1200:SEC");
        assert_eq!(scope.tracker_key(), Some("SEC"));
        assert_eq!(scope.platform_of("SEC-42"), Platform::Tracker);
        assert_eq!(scope.platform_of("sec-7"), Platform::Tracker);
        assert_eq!(scope.platform_of("1209876"), Platform::Board);
        assert_eq!(scope.platform_of("SEC-"), Platform::Board);
        // Multi-byte ids never split inside a character
        assert_eq!(scope.platform_of("éé-1"), Platform::Board);
        assert_eq!(scope.platform_of("Sé-12"), Platform::Board);
        assert_eq!(Scope::new("alice", "p").platform_of("SEC-1"), Platform::Board);
    }

    #[test]
    fn test_ignore_type_accepts_api_spellings() {
        assert_eq!("temp".parse::<IgnoreType>().unwrap(), IgnoreType::Temporary);
        assert_eq!(
            "forever".parse::<IgnoreType>().unwrap(),
            IgnoreType::Permanent
        );
        assert_eq!(IgnoreType::Permanent.to_string(), "permanent");
    }

    #[test]
    fn test_field_value_from_json_objects() {
        let value = FieldValue::from_json(&json!({"name": "In Progress", "id": "152-3"}));
        assert_eq!(value, FieldValue::String("In Progress".to_string()));

        let list = FieldValue::from_json(&json!([{"name": "ui"}, {"name": "api"}]));
        assert_eq!(list.as_string_list(), vec!["ui", "api"]);

        assert!(FieldValue::from_json(&json!({"color": "red"})).is_null());
    }

    #[test]
    fn test_field_value_text() {
        assert_eq!(FieldValue::Number(3.0).to_text(), "3");
        assert_eq!(FieldValue::Number(2.5).to_text(), "2.5");
        assert_eq!(FieldValue::Null.to_text(), "");
        assert_eq!(
            FieldValue::from(vec!["a".to_string(), "b".to_string()]).to_text(),
            "a, b"
        );
    }

    #[test]
    fn test_field_value_untagged_serde() {
        let values: Vec<FieldValue> =
            serde_json::from_str(r#"[null, true, 4, "x", ["y"]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Null,
                FieldValue::Bool(true),
                FieldValue::Number(4.0),
                FieldValue::String("x".to_string()),
                FieldValue::List(vec![FieldValue::String("y".to_string())]),
            ]
        );
    }

    #[test]
    fn test_external_ticket_accessors() {
        let task = ExternalTicket::Task(TaskItem::new("T-1", "Fix login bug"));
        assert_eq!(task.id(), "T-1");
        assert_eq!(task.platform(), Platform::Board);

        let issue = ExternalTicket::Issue(IssueItem::new("SEC-1", "Fix login bug"));
        assert_eq!(issue.platform(), Platform::Tracker);
        assert_eq!(issue.title(), "Fix login bug");
    }
}
