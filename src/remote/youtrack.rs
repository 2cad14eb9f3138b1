//! Issue tracker client for the YouTrack REST API.
//!
//! Issues are addressed by their readable id (`SEC-42`). Workflow state and
//! subsystem are custom fields whose names come from [`TrackerConfig`].
//!
//! [`TrackerConfig`]: crate::config::TrackerConfig

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use reqwest::{Client, Method, RequestBuilder, StatusCode, header};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Value, json};
use url::Url;

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::types::{FieldMap, FieldValue, IssueItem, Platform};

use super::{ApiError, IssueTracker, IssueUpdate, NewIssue, RedactedHeader};

const PAGE_SIZE: usize = 100;
const ISSUE_FIELDS: &str = "id,idReadable,summary,description,created,updated,reporter(login),\
tags(name),customFields(name,value(name,login,text,presentation))";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YtIssue {
    id_readable: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    updated: Option<i64>,
    #[serde(default)]
    reporter: Option<YtUser>,
    #[serde(default)]
    tags: Vec<YtNamed>,
    #[serde(default)]
    custom_fields: Vec<YtCustomField>,
}

#[derive(Debug, Deserialize)]
struct YtUser {
    #[serde(default)]
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtNamed {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtCustomField {
    name: String,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Deserialize)]
struct YtProjectField {
    #[serde(default)]
    field: Option<YtNamed>,
    #[serde(default)]
    bundle: Option<YtBundle>,
}

#[derive(Debug, Deserialize)]
struct YtBundle {
    #[serde(default)]
    values: Vec<YtNamed>,
}

pub struct YouTrackClient {
    client: Client,
    base_url: Url,
    token: SecretString,
    project_id: String,
    project_key: String,
    state_field: String,
    subsystem_field: String,
}

impl YouTrackClient {
    pub fn from_config(config: &Config, timeout: Duration) -> Result<Self> {
        let token = config.tracker_token().ok_or_else(|| {
            BridgeError::Config(
                "tracker token not configured. Set TRACKBRIDGE_TRACKER_TOKEN or tracker.token in config.yaml"
                    .to_string(),
            )
        })?;
        let tracker = &config.tracker;
        if tracker.base_url.is_empty() {
            return Err(BridgeError::Config(
                "tracker.base_url is not configured".to_string(),
            ));
        }
        if tracker.project_key.is_empty() {
            return Err(BridgeError::Config(
                "tracker.project_key is not configured".to_string(),
            ));
        }

        let mut client = Self::new(&tracker.base_url, &token, &tracker.project_key, timeout)?;
        client.project_id = tracker.project_id.clone();
        client.state_field = tracker.state_field.clone();
        client.subsystem_field = tracker.subsystem_field.clone();
        Ok(client)
    }

    pub fn new(base_url: &str, token: &str, project_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Config(format!("failed to create tracker client: {e}")))?;

        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| BridgeError::Config(format!("invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: SecretString::from(token.to_string()),
            project_id: project_key.to_string(),
            project_key: project_key.to_string(),
            state_field: "State".to_string(),
            subsystem_field: "Subsystem".to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| BridgeError::Config(format!("invalid tracker URL path '{path}': {e}")))?;
        let auth = RedactedHeader::bearer(&self.token).to_header_value(Platform::Tracker)?;
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
            .map_err(|e| ApiError::from_reqwest(Platform::Tracker, &e).into_bridge_error(id))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_response(Platform::Tracker, response)
                .await
                .into_bridge_error(id));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(Platform::Tracker, &e).into_bridge_error(id))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| BridgeError::Api {
            platform: Platform::Tracker,
            message: format!("malformed response: {e}"),
        })
    }

    fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| BridgeError::Api {
            platform: Platform::Tracker,
            message: format!("unexpected response shape: {e}"),
        })
    }

    fn convert(&self, issue: YtIssue) -> IssueItem {
        let custom_fields: FieldMap = issue
            .custom_fields
            .iter()
            .map(|f| (f.name.clone(), FieldValue::from_json(&f.value)))
            .collect();

        let text_field = |name: &str| {
            custom_fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| match v {
                    FieldValue::List(items) => items.first().and_then(|i| i.as_str()),
                    other => other.as_str(),
                })
                .map(str::to_string)
        };
        let state = text_field(&self.state_field);
        let subsystem = text_field(&self.subsystem_field);

        IssueItem {
            id: issue.id_readable,
            title: issue.summary.unwrap_or_default(),
            description: issue.description.unwrap_or_default(),
            state,
            subsystem,
            tags: issue.tags.into_iter().filter_map(|t| t.name).collect(),
            creator: issue.reporter.and_then(|r| r.login),
            created_at: issue
                .created
                .and_then(|ms| Timestamp::from_millisecond(ms).ok()),
            updated_at: issue
                .updated
                .and_then(|ms| Timestamp::from_millisecond(ms).ok()),
            custom_fields,
        }
    }

    fn state_value(&self, state: Option<&str>) -> Value {
        json!({
            "name": self.state_field,
            "$type": "StateIssueCustomField",
            "value": state.map(|s| json!({ "name": s })),
        })
    }

    fn subsystem_value(&self, subsystem: Option<&str>) -> Value {
        json!({
            "name": self.subsystem_field,
            "$type": "OwnedIssueCustomField",
            "value": subsystem.map(|s| json!({ "name": s })),
        })
    }

    async fn tag_ids(&self) -> Result<HashMap<String, String>> {
        let value = self
            .send(
                self.request(Method::GET, "api/tags")?
                    .query(&[("fields", "id,name"), ("$top", "500")]),
                None,
            )
            .await?;
        let tags: Vec<YtNamed> = Self::decode(value)?;
        Ok(tags
            .into_iter()
            .filter_map(|t| Some((t.name?.to_lowercase(), t.id?)))
            .collect())
    }
}

#[async_trait]
impl IssueTracker for YouTrackClient {
    async fn test_credentials(&self) -> Result<()> {
        self.send(
            self.request(Method::GET, "api/users/me")?
                .query(&[("fields", "login")]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn fetch_issues(&self) -> Result<Vec<IssueItem>> {
        let query = format!("project: {}", self.project_key);
        let mut issues = Vec::new();
        let mut skip = 0usize;

        loop {
            let top = PAGE_SIZE.to_string();
            let skip_param = skip.to_string();
            let value = self
                .send(
                    self.request(Method::GET, "api/issues")?.query(&[
                        ("query", query.as_str()),
                        ("fields", ISSUE_FIELDS),
                        ("$top", top.as_str()),
                        ("$skip", skip_param.as_str()),
                    ]),
                    None,
                )
                .await?;
            let page: Vec<YtIssue> = Self::decode(value)?;
            let len = page.len();
            issues.extend(page.into_iter().map(|i| self.convert(i)));

            if len < PAGE_SIZE {
                break;
            }
            skip += len;
        }

        tracing::debug!(count = issues.len(), project = %self.project_key, "fetched tracker issues");
        Ok(issues)
    }

    async fn states(&self) -> Result<Vec<String>> {
        let path = format!("api/admin/projects/{}/customFields", self.project_id);
        let value = self
            .send(
                self.request(Method::GET, &path)?
                    .query(&[("fields", "field(name),bundle(values(name))")]),
                None,
            )
            .await?;
        let fields: Vec<YtProjectField> = Self::decode(value)?;
        let states = fields
            .into_iter()
            .find(|f| {
                f.field
                    .as_ref()
                    .and_then(|n| n.name.as_deref())
                    .is_some_and(|n| n.eq_ignore_ascii_case(&self.state_field))
            })
            .and_then(|f| f.bundle)
            .map(|b| b.values.into_iter().filter_map(|v| v.name).collect())
            .unwrap_or_default();
        Ok(states)
    }

    async fn create_issue(&self, issue: NewIssue) -> Result<IssueItem> {
        let mut custom_fields = Vec::new();
        if issue.state.is_some() {
            custom_fields.push(self.state_value(issue.state.as_deref()));
        }
        if issue.subsystem.is_some() {
            custom_fields.push(self.subsystem_value(issue.subsystem.as_deref()));
        }

        let mut body = json!({
            "project": { "id": self.project_id },
            "summary": issue.title,
            "description": issue.description,
            "customFields": custom_fields,
        });
        if !issue.tags.is_empty() {
            let known = self.tag_ids().await?;
            let tags: Vec<Value> = issue
                .tags
                .iter()
                .filter_map(|t| known.get(&t.to_lowercase()))
                .map(|id| json!({ "id": id }))
                .collect();
            body["tags"] = Value::Array(tags);
        }

        let value = self
            .send(
                self.request(Method::POST, "api/issues")?
                    .query(&[("fields", ISSUE_FIELDS)])
                    .json(&body),
                None,
            )
            .await?;
        let created: YtIssue = Self::decode(value)?;
        let mut item = self.convert(created);
        if item.title.is_empty() {
            item.title = issue.title;
        }
        Ok(item)
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut body = serde_json::Map::new();
        if let Some(title) = &update.title {
            body.insert("summary".to_string(), json!(title));
        }
        if let Some(description) = &update.description {
            body.insert("description".to_string(), json!(description));
        }
        let mut custom_fields = Vec::new();
        if let Some(state) = &update.state {
            custom_fields.push(self.state_value(state.as_deref()));
        }
        if let Some(subsystem) = &update.subsystem {
            custom_fields.push(self.subsystem_value(subsystem.as_deref()));
        }
        if !custom_fields.is_empty() {
            body.insert("customFields".to_string(), Value::Array(custom_fields));
        }

        let path = format!("api/issues/{id}");
        self.send(
            self.request(Method::POST, &path)?
                .query(&[("fields", "idReadable")])
                .json(&body),
            Some(id),
        )
        .await
        .map(|_| ())
    }

    async fn delete_issue(&self, id: &str) -> Result<()> {
        let path = format!("api/issues/{id}");
        self.send(self.request(Method::DELETE, &path)?, Some(id))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> YouTrackClient {
        YouTrackClient::new(
            "https://acme.youtrack.cloud",
            "token",
            "SEC",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_convert_extracts_state_and_subsystem() {
        let raw = json!({
            "id": "2-17",
            "idReadable": "SEC-17",
            "summary": "Rotate keys",
            "description": null,
            "created": 1735689600000i64,
            "reporter": {"login": "bob"},
            "tags": [{"name": "infra"}],
            "customFields": [
                {"name": "State", "value": {"name": "In Progress", "$type": "StateBundleElement"}},
                {"name": "Subsystem", "value": {"name": "security"}},
                {"name": "Estimation", "value": {"presentation": "2d"}},
                {"name": "Assignee", "value": null}
            ]
        });
        let issue: YtIssue = serde_json::from_value(raw).unwrap();
        let item = client().convert(issue);

        assert_eq!(item.id, "SEC-17");
        assert_eq!(item.state.as_deref(), Some("In Progress"));
        assert_eq!(item.subsystem.as_deref(), Some("security"));
        assert_eq!(item.description, "");
        assert_eq!(item.creator.as_deref(), Some("bob"));
        assert_eq!(item.tags, vec!["infra"]);
        assert!(item.created_at.is_some());
        assert!(item.custom_fields["Assignee"].is_null());
        assert_eq!(
            item.custom_fields["Estimation"],
            FieldValue::String("2d".to_string())
        );
    }

    #[test]
    fn test_clearing_custom_field_sends_null() {
        let value = client().subsystem_value(None);
        assert_eq!(value["value"], Value::Null);
        assert_eq!(value["$type"], "OwnedIssueCustomField");

        let value = client().state_value(Some("Fixed"));
        assert_eq!(value["value"]["name"], "Fixed");
    }
}
