//! Task board client for the Asana REST API.
//!
//! Columns are project sections; tags are workspace tags resolved by name.
//! Every request carries the bearer token through [`RedactedHeader`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::types::{FieldMap, FieldValue, Platform, TaskItem};

use super::{ApiError, NewTask, RedactedHeader, TaskBoard, TaskUpdate};

const PAGE_SIZE: u32 = 100;
const TASK_FIELDS: &str = "name,notes,tags.name,memberships.project.gid,memberships.section.name,\
created_by.name,created_at,modified_at,custom_fields.name,custom_fields.display_value";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    next_page: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    offset: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Named {
    #[serde(default)]
    gid: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Membership {
    #[serde(default)]
    project: Option<Named>,
    #[serde(default)]
    section: Option<Named>,
}

#[derive(Debug, Deserialize)]
struct CustomField {
    name: String,
    #[serde(default)]
    display_value: Value,
}

#[derive(Debug, Deserialize)]
struct AsanaTask {
    gid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    tags: Vec<Named>,
    #[serde(default)]
    memberships: Vec<Membership>,
    #[serde(default)]
    created_by: Option<Named>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    modified_at: Option<String>,
    #[serde(default)]
    custom_fields: Vec<CustomField>,
}

/// Asana task board
pub struct AsanaClient {
    client: Client,
    base_url: Url,
    token: SecretString,
    project: String,
    workspace: Option<String>,
    /// Section name → gid, loaded on first use
    sections: RwLock<Option<HashMap<String, String>>>,
}

impl AsanaClient {
    pub fn from_config(config: &Config, timeout: Duration) -> Result<Self> {
        let token = config.board_token().ok_or_else(|| {
            BridgeError::Config(
                "board token not configured. Set TRACKBRIDGE_BOARD_TOKEN or board.token in config.yaml"
                    .to_string(),
            )
        })?;
        if config.board.project.is_empty() {
            return Err(BridgeError::Config(
                "board.project is not configured".to_string(),
            ));
        }

        let mut client = Self::new(&config.board.base_url, &token, &config.board.project, timeout)?;
        client.workspace = config.board.workspace.clone();
        Ok(client)
    }

    pub fn new(base_url: &str, token: &str, project: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to create board client: {e}")))?;

        Ok(Self {
            client,
            base_url: parse_base_url(base_url)?,
            token: SecretString::from(token.to_string()),
            project: project.to_string(),
            workspace: None,
            sections: RwLock::new(None),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| BridgeError::Config(format!("invalid board URL path '{path}': {e}")))?;
        let auth = RedactedHeader::bearer(&self.token).to_header_value(Platform::Board)?;
        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, auth)
            .header(header::ACCEPT, "application/json"))
    }

    async fn send(&self, builder: RequestBuilder, id: Option<&str>) -> Result<Value> {
        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(Platform::Board, &e).into_bridge_error(id))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_response(Platform::Board, response)
                .await
                .into_bridge_error(id));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::from_reqwest(Platform::Board, &e).into_bridge_error(id))
    }

    fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| BridgeError::Api {
            platform: Platform::Board,
            message: format!("unexpected response shape: {e}"),
        })
    }

    fn convert(&self, task: AsanaTask) -> TaskItem {
        let column = task
            .memberships
            .iter()
            .find(|m| {
                m.project
                    .as_ref()
                    .and_then(|p| p.gid.as_deref())
                    .is_none_or(|gid| gid == self.project)
            })
            .and_then(|m| m.section.as_ref())
            .and_then(|s| s.name.clone());

        let custom_fields: FieldMap = task
            .custom_fields
            .iter()
            .map(|f| (f.name.clone(), FieldValue::from_json(&f.display_value)))
            .collect();

        TaskItem {
            id: task.gid,
            title: task.name,
            notes: task.notes.unwrap_or_default(),
            column,
            tags: task.tags.into_iter().filter_map(|t| t.name).collect(),
            creator: task.created_by.and_then(|c| c.name),
            created_at: task.created_at.and_then(|s| s.parse().ok()),
            updated_at: task.modified_at.and_then(|s| s.parse().ok()),
            custom_fields,
        }
    }

    async fn section_gid(&self, name: &str) -> Result<Option<String>> {
        if self.sections.read().is_none() {
            let path = format!("projects/{}/sections", self.project);
            let value = self
                .send(self.request(Method::GET, &path)?.query(&[("opt_fields", "name")]), None)
                .await?;
            let sections: Envelope<Vec<Named>> = Self::decode(value)?;
            let map = sections
                .data
                .into_iter()
                .filter_map(|s| Some((s.name?.to_lowercase(), s.gid?)))
                .collect();
            *self.sections.write() = Some(map);
        }
        Ok(self
            .sections
            .read()
            .as_ref()
            .and_then(|m| m.get(&name.to_lowercase()).cloned()))
    }

    async fn move_to_column(&self, task_id: &str, column: &str) -> Result<()> {
        let Some(section) = self.section_gid(column).await? else {
            return Err(BridgeError::Api {
                platform: Platform::Board,
                message: format!("no section named '{column}' in project {}", self.project),
            });
        };
        let path = format!("sections/{section}/addTask");
        self.send(
            self.request(Method::POST, &path)?
                .json(&json!({ "data": { "task": task_id } })),
            Some(task_id),
        )
        .await?;
        Ok(())
    }

    async fn workspace_tags(&self) -> Result<HashMap<String, String>> {
        let Some(workspace) = &self.workspace else {
            return Ok(HashMap::new());
        };
        let path = format!("workspaces/{workspace}/tags");
        let value = self
            .send(self.request(Method::GET, &path)?.query(&[("opt_fields", "name")]), None)
            .await?;
        let tags: Envelope<Vec<Named>> = Self::decode(value)?;
        Ok(tags
            .data
            .into_iter()
            .filter_map(|t| Some((t.name?.to_lowercase(), t.gid?)))
            .collect())
    }

    async fn set_tags(&self, task_id: &str, desired: &[String]) -> Result<()> {
        let known = self.workspace_tags().await?;
        if known.is_empty() {
            tracing::debug!(task_id, "no workspace configured, skipping tag update");
            return Ok(());
        }

        let path = format!("tasks/{task_id}");
        let value = self
            .send(
                self.request(Method::GET, &path)?
                    .query(&[("opt_fields", "tags.name")]),
                Some(task_id),
            )
            .await?;
        let current: Envelope<AsanaTask> = Self::decode(value)?;
        let current: Vec<Named> = current.data.tags;

        let wanted: Vec<String> = desired.iter().map(|t| t.to_lowercase()).collect();
        for tag in &current {
            let name = tag.name.clone().unwrap_or_default().to_lowercase();
            if let Some(gid) = &tag.gid
                && !wanted.contains(&name)
            {
                let path = format!("tasks/{task_id}/removeTag");
                self.send(
                    self.request(Method::POST, &path)?
                        .json(&json!({ "data": { "tag": gid } })),
                    Some(task_id),
                )
                .await?;
            }
        }
        for name in &wanted {
            let present = current
                .iter()
                .any(|t| t.name.as_deref().map(str::to_lowercase).as_deref() == Some(name));
            if present {
                continue;
            }
            match known.get(name) {
                Some(gid) => {
                    let path = format!("tasks/{task_id}/addTag");
                    self.send(
                        self.request(Method::POST, &path)?
                            .json(&json!({ "data": { "tag": gid } })),
                        Some(task_id),
                    )
                    .await?;
                }
                None => tracing::warn!(task_id, tag = %name, "tag does not exist in workspace"),
            }
        }
        Ok(())
    }
}

fn parse_base_url(base_url: &str) -> Result<Url> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized)
        .map_err(|e| BridgeError::Config(format!("invalid base URL '{base_url}': {e}")))
}

#[async_trait]
impl TaskBoard for AsanaClient {
    async fn test_credentials(&self) -> Result<()> {
        self.send(self.request(Method::GET, "users/me")?, None)
            .await
            .map(|_| ())
    }

    async fn fetch_tasks(&self) -> Result<Vec<TaskItem>> {
        let path = format!("projects/{}/tasks", self.project);
        let mut tasks = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let limit = PAGE_SIZE.to_string();
            let mut query = vec![("opt_fields", TASK_FIELDS.to_string()), ("limit", limit)];
            if let Some(offset) = &offset {
                query.push(("offset", offset.clone()));
            }
            let value = self
                .send(self.request(Method::GET, &path)?.query(&query), None)
                .await?;
            let page: Envelope<Vec<AsanaTask>> = Self::decode(value)?;
            tasks.extend(page.data.into_iter().map(|t| self.convert(t)));

            match page.next_page {
                Some(next) => offset = Some(next.offset),
                None => break,
            }
        }

        tracing::debug!(count = tasks.len(), project = %self.project, "fetched board tasks");
        Ok(tasks)
    }

    async fn columns(&self) -> Result<Vec<String>> {
        let path = format!("projects/{}/sections", self.project);
        let value = self
            .send(self.request(Method::GET, &path)?.query(&[("opt_fields", "name")]), None)
            .await?;
        let sections: Envelope<Vec<Named>> = Self::decode(value)?;
        Ok(sections.data.into_iter().filter_map(|s| s.name).collect())
    }

    async fn create_task(&self, task: NewTask) -> Result<TaskItem> {
        let body = json!({
            "data": {
                "name": task.title,
                "notes": task.notes,
                "projects": [self.project],
            }
        });
        let value = self
            .send(self.request(Method::POST, "tasks")?.json(&body), None)
            .await?;
        let created: Envelope<Named> = Self::decode(value)?;
        let gid = created.data.gid.ok_or_else(|| BridgeError::Api {
            platform: Platform::Board,
            message: "create response did not include a task gid".to_string(),
        })?;

        if let Some(column) = &task.column {
            self.move_to_column(&gid, column).await?;
        }
        if !task.tags.is_empty() {
            self.set_tags(&gid, &task.tags).await?;
        }

        Ok(TaskItem {
            id: gid,
            title: task.title,
            notes: task.notes,
            column: task.column,
            tags: task.tags,
            created_at: Some(jiff::Timestamp::now()),
            ..Default::default()
        })
    }

    async fn update_task(&self, id: &str, update: TaskUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut data = serde_json::Map::new();
        if let Some(title) = &update.title {
            data.insert("name".to_string(), json!(title));
        }
        if let Some(notes) = &update.notes {
            data.insert("notes".to_string(), json!(notes));
        }
        if !data.is_empty() {
            let path = format!("tasks/{id}");
            self.send(
                self.request(Method::PUT, &path)?
                    .json(&json!({ "data": data })),
                Some(id),
            )
            .await?;
        }
        if let Some(column) = &update.column {
            self.move_to_column(id, column).await?;
        }
        if let Some(tags) = &update.tags {
            self.set_tags(id, tags).await?;
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let path = format!("tasks/{id}");
        self.send(self.request(Method::DELETE, &path)?, Some(id))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AsanaClient {
        AsanaClient::new(
            "https://app.asana.com/api/1.0",
            "token",
            "1200",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_base_url_keeps_api_prefix() {
        let url = parse_base_url("https://app.asana.com/api/1.0").unwrap();
        assert_eq!(
            url.join("tasks/1").unwrap().as_str(),
            "https://app.asana.com/api/1.0/tasks/1"
        );
    }

    #[test]
    fn test_convert_picks_section_of_configured_project() {
        let raw = json!({
            "gid": "42",
            "name": "Fix login bug",
            "notes": "details",
            "tags": [{"gid": "7", "name": "Backend"}],
            "memberships": [
                {"project": {"gid": "999"}, "section": {"name": "Elsewhere"}},
                {"project": {"gid": "1200"}, "section": {"name": "In Progress"}}
            ],
            "created_by": {"name": "Alice"},
            "created_at": "2025-03-01T10:00:00.000Z",
            "custom_fields": [{"name": "Points", "display_value": "3"}]
        });
        let task: AsanaTask = serde_json::from_value(raw).unwrap();
        let item = client().convert(task);

        assert_eq!(item.id, "42");
        assert_eq!(item.column.as_deref(), Some("In Progress"));
        assert_eq!(item.tags, vec!["Backend"]);
        assert_eq!(item.creator.as_deref(), Some("Alice"));
        assert!(item.created_at.is_some());
        assert_eq!(
            item.custom_fields.get("Points"),
            Some(&FieldValue::String("3".to_string()))
        );
    }

    #[test]
    fn test_from_config_requires_token() {
        let config = Config::default();
        // Only meaningful when the env override is unset
        if std::env::var(crate::config::BOARD_TOKEN_ENV).is_err() {
            assert!(AsanaClient::from_config(&config, Duration::from_secs(1)).is_err());
        }
    }
}
