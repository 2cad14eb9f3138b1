//! Remote adapters.
//!
//! This module defines the typed interface the reconciliation core uses to
//! talk to the task board and the issue tracker, plus the concrete REST
//! clients and an in-process implementation for offline runs and tests.

pub mod asana;
pub mod error;
pub mod memory;
pub mod youtrack;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::types::{FieldMap, FieldValue, IssueItem, Platform, TaskItem, field};

pub use error::ApiError;

/// Fields for a new board task
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub notes: String,
    pub column: Option<String>,
    pub tags: Vec<String>,
}

impl NewTask {
    /// Rebuild a task from captured field values.
    pub fn from_fields(fields: &FieldMap) -> Self {
        let text = |name: &str| fields.get(name).map(FieldValue::to_text).unwrap_or_default();
        NewTask {
            title: text(field::TITLE),
            notes: text(field::NOTES),
            column: fields
                .get(field::COLUMN)
                .and_then(FieldValue::as_str)
                .map(str::to_string),
            tags: fields
                .get(field::TAGS)
                .map(FieldValue::as_string_list)
                .unwrap_or_default(),
        }
    }
}

/// Updates to apply to a board task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub column: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.notes.is_none() && self.column.is_none() && self.tags.is_none()
    }

    /// Build the update that restores captured field values.
    pub fn restoring(fields: &FieldMap) -> Self {
        let mut update = TaskUpdate::default();
        for (name, value) in fields {
            match name.as_str() {
                field::TITLE => update.title = Some(value.to_text()),
                field::NOTES => update.notes = Some(value.to_text()),
                field::COLUMN => update.column = value.as_str().map(str::to_string),
                field::TAGS => update.tags = Some(value.as_string_list()),
                _ => {}
            }
        }
        update
    }
}

/// Fields for a new tracker issue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub state: Option<String>,
    pub subsystem: Option<String>,
    pub tags: Vec<String>,
}

impl NewIssue {
    /// Rebuild an issue from captured field values.
    pub fn from_fields(fields: &FieldMap) -> Self {
        let text = |name: &str| fields.get(name).map(FieldValue::to_text).unwrap_or_default();
        let optional = |name: &str| {
            fields
                .get(name)
                .and_then(FieldValue::as_str)
                .map(str::to_string)
        };
        NewIssue {
            title: text(field::TITLE),
            description: text(field::DESCRIPTION),
            state: optional(field::STATE),
            subsystem: optional(field::SUBSYSTEM),
            tags: fields
                .get(field::TAGS)
                .map(FieldValue::as_string_list)
                .unwrap_or_default(),
        }
    }
}

/// Updates to apply to a tracker issue.
///
/// For `state` and `subsystem`, `Some(None)` clears the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub state: Option<Option<String>>,
    pub subsystem: Option<Option<String>>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.state.is_none()
            && self.subsystem.is_none()
    }

    /// Build the update that restores captured field values.
    pub fn restoring(fields: &FieldMap) -> Self {
        let optional = |value: &FieldValue| value.as_str().map(str::to_string);
        let mut update = IssueUpdate::default();
        for (name, value) in fields {
            match name.as_str() {
                field::TITLE => update.title = Some(value.to_text()),
                field::DESCRIPTION => update.description = Some(value.to_text()),
                field::STATE => update.state = Some(optional(value)),
                field::SUBSYSTEM => update.subsystem = Some(optional(value)),
                _ => {}
            }
        }
        update
    }
}

/// Client for the task board.
#[async_trait]
pub trait TaskBoard: Send + Sync {
    /// Cheap authenticated call; distinguishes 401 from 403.
    async fn test_credentials(&self) -> Result<()>;

    /// Every task in the configured project.
    async fn fetch_tasks(&self) -> Result<Vec<TaskItem>>;

    /// Column (section) names, in board order.
    async fn columns(&self) -> Result<Vec<String>>;

    async fn create_task(&self, task: NewTask) -> Result<TaskItem>;

    async fn update_task(&self, id: &str, update: TaskUpdate) -> Result<()>;

    async fn delete_task(&self, id: &str) -> Result<()>;
}

/// Client for the issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn test_credentials(&self) -> Result<()>;

    /// Every issue in the configured project.
    async fn fetch_issues(&self) -> Result<Vec<IssueItem>>;

    /// Workflow state names.
    async fn states(&self) -> Result<Vec<String>>;

    async fn create_issue(&self, issue: NewIssue) -> Result<IssueItem>;

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()>;

    async fn delete_issue(&self, id: &str) -> Result<()>;
}

/// Build both REST clients from configuration.
pub fn connect(config: &Config) -> Result<(Arc<dyn TaskBoard>, Arc<dyn IssueTracker>)> {
    let timeout = Duration::from_secs(config.sync.request_timeout);
    let board = asana::AsanaClient::from_config(config, timeout)?;
    let tracker = youtrack::YouTrackClient::from_config(config, timeout)?;
    Ok((Arc::new(board), Arc::new(tracker)))
}

/// Wrapper for the bearer token that redacts the value when formatted.
///
/// Keeps tokens out of logs even if reqwest debug logging is enabled.
pub(crate) struct RedactedHeader<'a> {
    token: &'a SecretString,
}

impl<'a> RedactedHeader<'a> {
    pub(crate) fn bearer(token: &'a SecretString) -> Self {
        Self { token }
    }

    pub(crate) fn to_header_value(&self, platform: Platform) -> Result<header::HeaderValue> {
        let mut value =
            header::HeaderValue::from_str(&format!("Bearer {}", self.token.expose_secret()))
                .map_err(|_| BridgeError::Unauthorized {
                    platform,
                    message: "token contains characters not allowed in a header".to_string(),
                })?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Display for RedactedHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bearer [REDACTED]")
    }
}

impl fmt::Debug for RedactedHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedactedHeader")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_update_restoring_clears_null_fields() {
        let mut fields = FieldMap::new();
        fields.insert(field::STATE.to_string(), FieldValue::from("Open"));
        fields.insert(field::SUBSYSTEM.to_string(), FieldValue::Null);

        let update = IssueUpdate::restoring(&fields);
        assert_eq!(update.state, Some(Some("Open".to_string())));
        assert_eq!(update.subsystem, Some(None));
        assert!(update.title.is_none());
        assert!(!update.is_empty());
    }

    #[test]
    fn test_task_update_restoring() {
        let task = TaskItem::new("T-1", "Title")
            .with_column("Done")
            .with_tags(["a", "b"]);
        let update = TaskUpdate::restoring(&task.field_values());
        assert_eq!(update.title.as_deref(), Some("Title"));
        assert_eq!(update.column.as_deref(), Some("Done"));
        assert_eq!(update.tags, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_new_issue_from_captured_fields() {
        let issue = IssueItem::new("SEC-1", "Rotate keys")
            .with_state("Open")
            .with_description("quarterly");
        let new = NewIssue::from_fields(&issue.field_values());
        assert_eq!(new.title, "Rotate keys");
        assert_eq!(new.description, "quarterly");
        assert_eq!(new.state.as_deref(), Some("Open"));
        assert_eq!(new.subsystem, None);
    }

    #[test]
    fn test_redacted_header_formatting() {
        let token = SecretString::from("s3cret".to_string());
        let header = RedactedHeader::bearer(&token);
        assert_eq!(header.to_string(), "Bearer [REDACTED]");
        assert!(!format!("{header:?}").contains("s3cret"));
        let value = header.to_header_value(Platform::Board).unwrap();
        assert!(value.is_sensitive());
    }
}
