use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use trackbridge::config::{
    BOARD_TOKEN_ENV, ROOT_ENV, StorageBackend, TRACKER_TOKEN_ENV, USER_ENV,
};
use trackbridge::{BridgeError, Config};

const CONFIG: &str = r#"
user: carol
storage:
  backend: file
board:
  token: from-file
  project: "1200"
tracker:
  project_key: SEC
mapping:
  columns:
    - column: Backlog
      state: Open
  tags:
    - tag: Security
      subsystem: security
scheduler:
  auto_sync_interval: 60
"#;

fn clear_env() {
    for var in [ROOT_ENV, USER_ENV, BOARD_TOKEN_ENV, TRACKER_TOKEN_ENV] {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
#[serial]
fn test_load_from_yaml() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, CONFIG).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.user(), "carol");
    assert_eq!(config.scope().project, "1200:SEC");
    assert_eq!(config.board_token().as_deref(), Some("from-file"));
    assert_eq!(config.tracker_token(), None);
    assert_eq!(config.scheduler.auto_sync_interval, 60);
    assert_eq!(config.scheduler.auto_create_interval, 900);
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let config = Config::load_from(&dir.path().join("absent.yaml")).unwrap();
    assert_eq!(config.user(), "default");
    assert_eq!(config.storage.backend, StorageBackend::File);
}

#[test]
#[serial]
fn test_invalid_file_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, "sync:\n  max_concurrency: 0\n").unwrap();
    assert!(matches!(
        Config::load_from(&path),
        Err(BridgeError::Config(_))
    ));
}

#[test]
#[serial]
fn test_environment_overrides() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, CONFIG).unwrap();

    unsafe {
        std::env::set_var(USER_ENV, "dave");
        std::env::set_var(BOARD_TOKEN_ENV, "from-env");
        std::env::set_var(TRACKER_TOKEN_ENV, "tracker-env");
    }
    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.user(), "dave");
    assert_eq!(config.scope().user, "dave");
    assert_eq!(config.board_token().as_deref(), Some("from-env"));
    assert_eq!(config.tracker_token().as_deref(), Some("tracker-env"));

    // Empty values fall through to the file
    unsafe { std::env::set_var(USER_ENV, "") };
    assert_eq!(config.user(), "carol");
    clear_env();
}

#[test]
#[serial]
fn test_root_controls_config_and_storage_paths() {
    clear_env();
    let dir = TempDir::new().unwrap();
    unsafe { std::env::set_var(ROOT_ENV, dir.path()) };

    assert_eq!(Config::config_path(), dir.path().join("config.yaml"));
    let mut config = Config::default();
    config.user = Some("erin".to_string());
    config.save().unwrap();
    assert_eq!(Config::load().unwrap().user(), "erin");

    config.storage.backend = StorageBackend::Sqlite;
    assert_eq!(config.storage_path(), dir.path().join("trackbridge.db"));
    clear_env();
}
