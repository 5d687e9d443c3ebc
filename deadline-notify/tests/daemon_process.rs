// End-to-end tests against the compiled deadline-daemon and deadline-watch binaries

mod helpers;

use deadline_notify_lib::notifier::client::DaemonClient;
use deadline_notify_lib::notifier::config::Config;
use deadline_notify_lib::notifier::protocol::{DaemonRequest, DaemonResponse, ScanMode};
use deadline_notify_lib::notifier::store::JsonFileTaskStore;
use deadline_notify_lib::notifier::task::{TaskId, TaskStatus};
use deadline_notify_lib::test_utils::{task_due_in, write_tasks_file};
use helpers::daemon_guard::{watch_binary, DaemonGuard};
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> Config {
    Config::in_dirs(dir.path().to_path_buf(), dir.path().to_path_buf())
}

#[test]
fn test_daemon_pushes_near_deadline_tasks() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&temp_dir);
    write_tasks_file(
        &config.tasks_file,
        &[
            task_due_in("rent", 3, TaskStatus::Upcoming),
            task_due_in("vacation", 200, TaskStatus::Upcoming),
            task_due_in("taxes", 1, TaskStatus::Completed),
        ],
    )
    .unwrap();

    let _daemon = DaemonGuard::start(temp_dir.path(), 1).expect("daemon should start");

    let mut client = DaemonClient::connect(&config).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let response = client.request(DaemonRequest::Status).unwrap();
    match response {
        DaemonResponse::Status {
            scan_mode,
            scan_interval_secs,
            connected_sessions,
            ..
        } => {
            assert_eq!(scan_mode, ScanMode::PerSession);
            assert_eq!(scan_interval_secs, 1);
            assert!(connected_sessions >= 1);
        }
        other => panic!("Expected Status, got {:?}", other),
    }

    let batch = client
        .next_notification()
        .unwrap()
        .expect("daemon should push a batch");
    let ids: Vec<_> = batch.tasks.iter().map(|c| c.task.id.as_str()).collect();
    assert_eq!(ids, vec!["rent"]);
}

#[test]
fn test_shutdown_request_cleans_up() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_for(&temp_dir);
    let mut daemon = DaemonGuard::start(temp_dir.path(), 60).expect("daemon should start");
    assert!(config.is_daemon_running());

    let mut client = DaemonClient::connect(&config).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let response = client.request(DaemonRequest::Shutdown).unwrap();
    assert!(matches!(response, DaemonResponse::ShuttingDown));
    drop(client);

    daemon
        .wait_for_exit(Duration::from_secs(10))
        .expect("daemon should exit after shutdown");
    assert!(!config.socket_exists(), "socket should be removed");
    assert!(config.read_pid().is_none(), "pid file should be removed");
}

#[test]
fn test_second_daemon_refuses_to_start() {
    let temp_dir = TempDir::new().unwrap();
    let daemon = DaemonGuard::start(temp_dir.path(), 60).expect("daemon should start");

    let status = Command::new(helpers::daemon_guard::daemon_binary())
        .env("DEADLINE_NOTIFY_DIR", temp_dir.path())
        .output()
        .unwrap()
        .status;
    assert!(!status.success());

    // The first daemon still owns the socket
    let config = config_for(&temp_dir);
    assert_eq!(config.read_pid(), Some(daemon.pid()));
    DaemonClient::connect(&config).expect("original daemon still serving");
}

#[test]
fn test_watch_cli_ping_and_status() {
    let temp_dir = TempDir::new().unwrap();
    let _daemon = DaemonGuard::start(temp_dir.path(), 60).expect("daemon should start");

    let ping = Command::new(watch_binary())
        .arg("ping")
        .env("DEADLINE_NOTIFY_DIR", temp_dir.path())
        .output()
        .unwrap();
    assert!(ping.status.success());
    assert_eq!(String::from_utf8_lossy(&ping.stdout).trim(), "pong");

    let status = Command::new(watch_binary())
        .args(["status", "--json"])
        .env("DEADLINE_NOTIFY_DIR", temp_dir.path())
        .output()
        .unwrap();
    assert!(status.status.success());
    let json: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(json["type"], "status");
    assert_eq!(json["scan_interval_secs"], 60);
}

#[test]
fn test_watch_cli_complete_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let tasks_file = temp_dir.path().join("tasks.json");
    write_tasks_file(
        &tasks_file,
        &[
            task_due_in("future", 5, TaskStatus::Upcoming),
            task_due_in("past", -5, TaskStatus::Upcoming),
        ],
    )
    .unwrap();
    let store = JsonFileTaskStore::new(&tasks_file);

    for id in ["future", "past"] {
        let output = Command::new(watch_binary())
            .args(["complete", id])
            .env("DEADLINE_NOTIFY_DIR", temp_dir.path())
            .env_remove("DEADLINE_NOTIFY_TASKS")
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(
            store.get(&TaskId::from(id)).unwrap().status,
            TaskStatus::Completed
        );
    }

    for (id, expected) in [("future", TaskStatus::Upcoming), ("past", TaskStatus::Overdue)] {
        let output = Command::new(watch_binary())
            .args(["reopen", id])
            .env("DEADLINE_NOTIFY_DIR", temp_dir.path())
            .env_remove("DEADLINE_NOTIFY_TASKS")
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(store.get(&TaskId::from(id)).unwrap().status, expected);
    }

    let missing = Command::new(watch_binary())
        .args(["complete", "nope"])
        .env("DEADLINE_NOTIFY_DIR", temp_dir.path())
        .env_remove("DEADLINE_NOTIFY_TASKS")
        .output()
        .unwrap();
    assert!(!missing.status.success());
}
