//! In-process board and tracker.
//!
//! Backs offline runs and the test suite. Both sides support failure
//! injection keyed by ticket id (or by title for creates), a global
//! credential failure, artificial latency, and call counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jiff::Timestamp;
use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::types::{IssueItem, Platform, TaskItem};

use super::{IssueTracker, IssueUpdate, NewIssue, NewTask, TaskBoard, TaskUpdate};

/// Kind of failure to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unauthorized,
    Forbidden,
    NotFound,
    Transient,
    Api,
}

impl Failure {
    fn to_error(self, platform: Platform, id: &str) -> BridgeError {
        match self {
            Failure::Unauthorized => BridgeError::Unauthorized {
                platform,
                message: "HTTP 401 Unauthorized".to_string(),
            },
            Failure::Forbidden => BridgeError::Forbidden {
                platform,
                message: "HTTP 403 Forbidden".to_string(),
            },
            Failure::NotFound => BridgeError::NotFound {
                platform,
                id: id.to_string(),
            },
            Failure::Transient => BridgeError::Transient {
                platform,
                message: "HTTP 503 Service Unavailable".to_string(),
            },
            Failure::Api => BridgeError::Api {
                platform,
                message: "HTTP 400 Bad Request".to_string(),
            },
        }
    }
}

/// Number of calls made against an in-memory remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetches: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> CallCounts {
        CallCounts {
            fetches: self.fetches.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }
}

/// Shared failure-injection state.
#[derive(Debug, Default)]
struct Faults {
    platform_auth: Mutex<Option<Failure>>,
    by_key: Mutex<HashMap<String, Failure>>,
    latency: Mutex<Option<Duration>>,
}

impl Faults {
    async fn check(&self, platform: Platform, key: &str) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(failure) = *self.platform_auth.lock() {
            return Err(failure.to_error(platform, key));
        }
        if let Some(failure) = self.by_key.lock().get(key).copied() {
            return Err(failure.to_error(platform, key));
        }
        Ok(())
    }

    async fn check_credentials(&self, platform: Platform) -> Result<()> {
        match *self.platform_auth.lock() {
            Some(failure) => Err(failure.to_error(platform, "me")),
            None => Ok(()),
        }
    }
}

/// In-memory task board.
#[derive(Debug)]
pub struct MemoryBoard {
    tasks: Mutex<BTreeMap<String, TaskItem>>,
    columns: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    faults: Faults,
    counters: Counters,
    fail_fetch: AtomicBool,
}

impl Default for MemoryBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBoard {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            columns: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1001),
            faults: Faults::default(),
            counters: Counters::default(),
            fail_fetch: AtomicBool::new(false),
        }
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = TaskItem>) -> Self {
        let board = Self::new();
        for task in tasks {
            board.insert(task);
        }
        board
    }

    pub fn insert(&self, task: TaskItem) {
        if let Some(column) = &task.column {
            let mut columns = self.columns.lock();
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        self.tasks.lock().insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<TaskItem> {
        self.tasks.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<TaskItem> {
        self.tasks.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail every call touching `key` (a task id, or a title for creates).
    pub fn fail_on(&self, key: impl Into<String>, failure: Failure) {
        self.faults.by_key.lock().insert(key.into(), failure);
    }

    pub fn clear_failures(&self) {
        self.faults.by_key.lock().clear();
        *self.faults.platform_auth.lock() = None;
        self.fail_fetch.store(false, Ordering::SeqCst);
    }

    /// Fail every call, including the credential test.
    pub fn fail_auth(&self, failure: Failure) {
        *self.faults.platform_auth.lock() = Some(failure);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> CallCounts {
        self.counters.snapshot()
    }
}

#[async_trait]
impl TaskBoard for MemoryBoard {
    async fn test_credentials(&self) -> Result<()> {
        self.faults.check_credentials(Platform::Board).await
    }

    async fn fetch_tasks(&self) -> Result<Vec<TaskItem>> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        self.faults.check_credentials(Platform::Board).await?;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Failure::Transient.to_error(Platform::Board, "tasks"));
        }
        Ok(self.tasks.lock().values().cloned().collect())
    }

    async fn columns(&self) -> Result<Vec<String>> {
        Ok(self.columns.lock().clone())
    }

    async fn create_task(&self, task: NewTask) -> Result<TaskItem> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        self.faults.check(Platform::Board, &task.title).await?;

        let id = format!("T-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let item = TaskItem {
            id: id.clone(),
            title: task.title,
            notes: task.notes,
            column: task.column,
            tags: task.tags,
            created_at: Some(Timestamp::now()),
            ..Default::default()
        };
        self.insert(item.clone());
        Ok(item)
    }

    async fn update_task(&self, id: &str, update: TaskUpdate) -> Result<()> {
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.faults.check(Platform::Board, id).await?;

        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id).ok_or_else(|| BridgeError::NotFound {
            platform: Platform::Board,
            id: id.to_string(),
        })?;
        if let Some(title) = update.title {
            task.title = title;
        }
        if let Some(notes) = update.notes {
            task.notes = notes;
        }
        if let Some(column) = update.column {
            task.column = Some(column);
        }
        if let Some(tags) = update.tags {
            task.tags = tags;
        }
        task.updated_at = Some(Timestamp::now());
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.faults.check(Platform::Board, id).await?;

        self.tasks
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound {
                platform: Platform::Board,
                id: id.to_string(),
            })
    }
}

/// In-memory issue tracker.
#[derive(Debug)]
pub struct MemoryTracker {
    project_key: String,
    issues: Mutex<BTreeMap<String, IssueItem>>,
    states: Mutex<Vec<String>>,
    next_number: AtomicUsize,
    faults: Faults,
    counters: Counters,
    fail_fetch: AtomicBool,
}

impl Default for MemoryTracker {
    fn default() -> Self {
        Self::new("SEC")
    }
}

impl MemoryTracker {
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            issues: Mutex::new(BTreeMap::new()),
            states: Mutex::new(Vec::new()),
            next_number: AtomicUsize::new(1),
            faults: Faults::default(),
            counters: Counters::default(),
            fail_fetch: AtomicBool::new(false),
        }
    }

    pub fn with_issues(
        project_key: impl Into<String>,
        issues: impl IntoIterator<Item = IssueItem>,
    ) -> Self {
        let tracker = Self::new(project_key);
        for issue in issues {
            tracker.insert(issue);
        }
        tracker
    }

    pub fn insert(&self, issue: IssueItem) {
        if let Some(state) = &issue.state {
            let mut states = self.states.lock();
            if !states.contains(state) {
                states.push(state.clone());
            }
        }
        self.issues.lock().insert(issue.id.clone(), issue);
    }

    pub fn get(&self, id: &str) -> Option<IssueItem> {
        self.issues.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<IssueItem> {
        self.issues.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.issues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail every call touching `key` (an issue id, or a title for creates).
    pub fn fail_on(&self, key: impl Into<String>, failure: Failure) {
        self.faults.by_key.lock().insert(key.into(), failure);
    }

    pub fn clear_failures(&self) {
        self.faults.by_key.lock().clear();
        *self.faults.platform_auth.lock() = None;
        self.fail_fetch.store(false, Ordering::SeqCst);
    }

    pub fn fail_auth(&self, failure: Failure) {
        *self.faults.platform_auth.lock() = Some(failure);
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.faults.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> CallCounts {
        self.counters.snapshot()
    }

    fn next_id(&self, issues: &BTreeMap<String, IssueItem>) -> String {
        loop {
            let n = self.next_number.fetch_add(1, Ordering::SeqCst);
            let id = format!("{}-{n}", self.project_key);
            if !issues.contains_key(&id) {
                return id;
            }
        }
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn test_credentials(&self) -> Result<()> {
        self.faults.check_credentials(Platform::Tracker).await
    }

    async fn fetch_issues(&self) -> Result<Vec<IssueItem>> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        self.faults.check_credentials(Platform::Tracker).await?;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Failure::Transient.to_error(Platform::Tracker, "issues"));
        }
        Ok(self.issues.lock().values().cloned().collect())
    }

    async fn states(&self) -> Result<Vec<String>> {
        Ok(self.states.lock().clone())
    }

    async fn create_issue(&self, issue: NewIssue) -> Result<IssueItem> {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        self.faults.check(Platform::Tracker, &issue.title).await?;

        let item = {
            let issues = self.issues.lock();
            IssueItem {
                id: self.next_id(&issues),
                title: issue.title,
                description: issue.description,
                state: issue.state,
                subsystem: issue.subsystem,
                tags: issue.tags,
                created_at: Some(Timestamp::now()),
                ..Default::default()
            }
        };
        self.insert(item.clone());
        Ok(item)
    }

    async fn update_issue(&self, id: &str, update: IssueUpdate) -> Result<()> {
        self.counters.updates.fetch_add(1, Ordering::SeqCst);
        self.faults.check(Platform::Tracker, id).await?;

        let mut issues = self.issues.lock();
        let issue = issues.get_mut(id).ok_or_else(|| BridgeError::NotFound {
            platform: Platform::Tracker,
            id: id.to_string(),
        })?;
        if let Some(title) = update.title {
            issue.title = title;
        }
        if let Some(description) = update.description {
            issue.description = description;
        }
        if let Some(state) = update.state {
            issue.state = state;
        }
        if let Some(subsystem) = update.subsystem {
            issue.subsystem = subsystem;
        }
        issue.updated_at = Some(Timestamp::now());
        Ok(())
    }

    async fn delete_issue(&self, id: &str) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.faults.check(Platform::Tracker, id).await?;

        self.issues
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| BridgeError::NotFound {
                platform: Platform::Tracker,
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracker_assigns_unused_ids() {
        let tracker = MemoryTracker::with_issues("SEC", [IssueItem::new("SEC-1", "Existing")]);
        let created = tracker
            .create_issue(NewIssue {
                title: "New".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.id, "SEC-2");
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.calls().creates, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let board = MemoryBoard::with_tasks([TaskItem::new("T-1", "a")]);
        board.fail_on("T-1", Failure::Transient);
        let err = board.delete_task("T-1").await.unwrap_err();
        assert!(err.is_transient());
        assert!(board.get("T-1").is_some());

        board.fail_auth(Failure::Unauthorized);
        assert!(board.test_credentials().await.unwrap_err().is_auth());

        board.clear_failures();
        board.delete_task("T-1").await.unwrap();
        assert!(board.delete_task("T-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_clears_subsystem() {
        let tracker = MemoryTracker::with_issues(
            "SEC",
            [IssueItem::new("SEC-1", "x").with_subsystem("backend")],
        );
        tracker
            .update_issue(
                "SEC-1",
                IssueUpdate {
                    subsystem: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(tracker.get("SEC-1").unwrap().subsystem, None);
    }
}
