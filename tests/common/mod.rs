#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use trackbridge::config::StorageBackend;
use trackbridge::remote::memory::{MemoryBoard, MemoryTracker};
use trackbridge::{
    Bridge, ColumnMapping, Config, FileStorage, IssueItem, SqliteStorage, Storage, TagMapping,
    TaskItem,
};

pub const BACKENDS: [StorageBackend; 2] = [StorageBackend::File, StorageBackend::Sqlite];

/// Configuration shared by the integration tests: user `alice`, tracker
/// project key `SEC`.
pub fn config() -> Config {
    let mut config = Config::default();
    config.user = Some("alice".to_string());
    config.board.project = "1200".to_string();
    config.tracker.project_key = "SEC".to_string();
    config.mapping.columns = vec![
        ColumnMapping::new("Backlog", "Open"),
        ColumnMapping::new("In Progress", "In Progress"),
        ColumnMapping::new("Done", "Fixed"),
        ColumnMapping::new("Ideas", "Idea").display_only(),
    ];
    config.mapping.tags = vec![
        TagMapping::new("Security", "security"),
        TagMapping::new("Backend", "backend"),
    ];
    config.mapping.findings_states = vec!["Findings".to_string()];
    config
}

/// `T-1` has no counterpart; `T-2` is meant to be linked to `SEC-7`, whose
/// subsystem disagrees with the task's tag.
pub fn scenario_tasks() -> Vec<TaskItem> {
    vec![
        TaskItem::new("T-1", "Fix login bug")
            .with_column("Backlog")
            .with_tags(["Backend"]),
        TaskItem::new("T-2", "Harden session cookies")
            .with_column("In Progress")
            .with_tags(["Security"]),
    ]
}

pub fn scenario_issues() -> Vec<IssueItem> {
    vec![
        IssueItem::new("SEC-7", "Harden session cookies")
            .with_state("In Progress")
            .with_subsystem("backend"),
    ]
}

pub fn open_storage(backend: StorageBackend, dir: &TempDir) -> Arc<dyn Storage> {
    match backend {
        StorageBackend::File => Arc::new(FileStorage::open(&dir.path().join("data")).unwrap()),
        StorageBackend::Sqlite => {
            Arc::new(SqliteStorage::open(&dir.path().join("trackbridge.db")).unwrap())
        }
    }
}

/// A bridge over in-memory remotes and a real storage backend in a temp dir
pub struct Harness {
    pub bridge: Bridge,
    pub board: Arc<MemoryBoard>,
    pub tracker: Arc<MemoryTracker>,
    pub storage: Arc<dyn Storage>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(backend: StorageBackend, tasks: Vec<TaskItem>, issues: Vec<IssueItem>) -> Self {
        Self::with_config(config(), backend, tasks, issues)
    }

    pub fn with_config(
        config: Config,
        backend: StorageBackend,
        tasks: Vec<TaskItem>,
        issues: Vec<IssueItem>,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let board = Arc::new(MemoryBoard::with_tasks(tasks));
        let tracker = Arc::new(MemoryTracker::with_issues("SEC", issues));
        let storage = open_storage(backend, &dir);
        let bridge = Bridge::new(&config, board.clone(), tracker.clone(), storage.clone());
        Self {
            bridge,
            board,
            tracker,
            storage,
            dir,
        }
    }

    /// The example scenario with `T-2 <-> SEC-7` already linked.
    pub async fn scenario(backend: StorageBackend) -> Self {
        let harness = Self::new(backend, scenario_tasks(), scenario_issues());
        harness.bridge.link("T-2", "SEC-7").await.unwrap();
        harness
    }
}
