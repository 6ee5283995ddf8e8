//! CLI integration tests for vocab-sync.
//!
//! These tests verify command-line argument parsing, help output, exit
//! codes, and full runs through the worker process against SQLite files.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio_util::sync::CancellationToken;
use vocab_sync::{Direction, ProgressEvent, SyncConfig, SyncJob, WorkerHandle, WorkerRequest};

/// Get a command for the vocab-sync binary.
fn cmd() -> Command {
    Command::cargo_bin("vocab-sync").unwrap()
}

/// Two SQLite files with a couple of tables and a config pointing at them.
struct Databases {
    _dir: TempDir,
    primary: PathBuf,
    local: PathBuf,
    config: PathBuf,
}

async fn exec(path: &Path, statements: &[&str]) {
    if !path.exists() {
        std::fs::File::create(path).unwrap();
    }
    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    for stmt in statements {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

async fn count(path: &Path, table: &str) -> i64 {
    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", path.display()))
        .await
        .unwrap();
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(&pool)
        .await
        .unwrap();
    pool.close().await;
    n
}

fn databases() -> Databases {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async_databases())
}

async fn async_databases() -> Databases {
    let dir = tempfile::tempdir().unwrap();
    let primary = dir.path().join("primary.sqlite3");
    let local = dir.path().join("local.sqlite3");
    let ddl = [
        "CREATE TABLE auth_user (id integer PRIMARY KEY, username text, is_staff bool)",
        "CREATE TABLE flashcards_deck (id integer PRIMARY KEY, user_id integer, name text)",
    ];
    exec(&primary, &ddl).await;
    exec(&local, &ddl).await;
    exec(
        &primary,
        &[
            "INSERT INTO auth_user VALUES (1, 'ana', 1), (2, 'ben', 0)",
            "INSERT INTO flashcards_deck VALUES (1, 1, 'verbs'), (2, 1, 'nouns'), (3, 2, 'food')",
        ],
    )
    .await;

    let config = dir.path().join("config.yaml");
    std::fs::write(&config, config_yaml(&primary, &local)).unwrap();
    Databases {
        _dir: dir,
        primary,
        local,
        config,
    }
}

fn config_yaml(primary: &Path, local: &Path) -> String {
    format!(
        "primary:\n  type: sqlite\n  path: {}\nlocal:\n  type: sqlite\n  path: {}\nsync:\n  chunk_pause_ms: 0\n",
        primary.display(),
        local.display()
    )
}

fn local_count(db: &Databases, table: &str) -> i64 {
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(count(&db.local, table))
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("compare"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_worker_command_is_hidden() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("worker").not());
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--direction"))
        .stdout(predicate::str::contains("--tables"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vocab-sync"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--shutdown-timeout"))
        .stdout(predicate::str::contains("[default: 10]"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_config_default() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_missing_config_file() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "health-check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_config() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "primary: [not, a, backend").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_invalid_config_values() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "primary:\n  type: postgres\n  host: \"\"\n  database: vocab\n  user: app\nlocal:\n  type: sqlite\n  path: db.sqlite3"
    )
    .unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("primary.host"));
}

#[test]
fn test_unknown_direction() {
    cmd()
        .args(["run", "--direction", "sideways"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unknown direction"));
}

#[test]
fn test_direction_required() {
    cmd().arg("run").assert().failure().code(2);
}

// =============================================================================
// Commands Against SQLite
// =============================================================================

#[test]
fn test_health_check_ok() {
    let db = databases();
    cmd()
        .args(["--config", db.config.to_str().unwrap(), "health-check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("primary: OK"))
        .stdout(predicate::str::contains("local: OK"));
}

#[test]
fn test_health_check_reports_missing_database() {
    let db = databases();
    let missing = db.primary.with_file_name("missing.sqlite3");
    std::fs::write(&db.config, config_yaml(&missing, &db.local)).unwrap();

    cmd()
        .args(["--config", db.config.to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::contains("primary: FAILED"));
}

#[test]
fn test_compare_lists_differences() {
    let db = databases();
    cmd()
        .args([
            "--config",
            db.config.to_str().unwrap(),
            "compare",
            "--direction",
            "server-to-local",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("auth_user"))
        .stdout(predicate::str::contains("flashcards_deck"))
        .stdout(predicate::str::contains("differs"));
}

#[test]
fn test_run_syncs_through_worker() {
    let db = databases();
    cmd()
        .args([
            "--config",
            db.config.to_str().unwrap(),
            "run",
            "--direction",
            "server-to-local",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("DONE"));

    assert_eq!(local_count(&db, "auth_user"), 2);
    assert_eq!(local_count(&db, "flashcards_deck"), 3);
}

#[test]
fn test_run_output_json_is_event_stream() {
    let db = databases();
    let output = cmd()
        .args([
            "--config",
            db.config.to_str().unwrap(),
            "--output-json",
            "run",
            "--direction",
            "server-to-local",
            "--tables",
            "auth_user",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let events: Vec<ProgressEvent> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| ProgressEvent::from_json_line(line).unwrap())
        .collect();
    assert!(matches!(events.last(), Some(ProgressEvent::Success { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::ProgressPercent { progress: 100 })));

    assert_eq!(local_count(&db, "auth_user"), 2);
    assert_eq!(local_count(&db, "flashcards_deck"), 0);
}

#[test]
fn test_worker_rejects_bad_request() {
    cmd()
        .arg("worker")
        .write_stdin("{}\n")
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("\"type\":\"fatal_error\""));
}

// =============================================================================
// Worker Bridge Tests
// =============================================================================

fn worker_command() -> tokio::process::Command {
    let mut command = tokio::process::Command::new(env!("CARGO_BIN_EXE_vocab-sync"));
    command.args(["--verbosity", "warn", "worker"]);
    command
}

#[tokio::test]
async fn test_bridge_drives_worker_to_success() {
    let db = async_databases().await;
    let request = WorkerRequest {
        config: SyncConfig::load(&db.config).unwrap(),
        job: SyncJob::new(Direction::ServerToLocal, Vec::new()),
    };

    let mut worker = WorkerHandle::spawn(worker_command(), &request).await.unwrap();
    let mut events = Vec::new();
    let status = worker
        .drive(&CancellationToken::new(), Duration::from_secs(5), |e| {
            events.push(e.clone())
        })
        .await
        .unwrap();

    assert!(status.success());
    assert!(worker.is_finished());
    assert!(matches!(events.last(), Some(ProgressEvent::Success { .. })));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    // Nothing more arrives after the terminal event.
    assert!(worker.poll().is_empty());

    assert_eq!(count(&db.local, "auth_user").await, 2);
    assert_eq!(count(&db.local, "flashcards_deck").await, 3);
}

#[tokio::test]
async fn test_bridge_cancel_ends_with_terminal_event() {
    let db = async_databases().await;
    let request = WorkerRequest {
        config: SyncConfig::load(&db.config).unwrap(),
        job: SyncJob::new(Direction::ServerToLocal, Vec::new()),
    };

    let mut worker = WorkerHandle::spawn(worker_command(), &request).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut last = None;
    let status = tokio::time::timeout(
        Duration::from_secs(30),
        worker.drive(&cancel, Duration::from_secs(5), |e| last = Some(e.clone())),
    )
    .await
    .expect("worker did not stop")
    .unwrap();

    match last {
        Some(ProgressEvent::FatalError { message }) => {
            assert!(!status.success());
            assert!(!message.is_empty());
        }
        Some(ProgressEvent::Success { .. }) => assert!(status.success()),
        other => panic!("expected a terminal event, got {:?}", other),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_bridge_synthesizes_fatal_when_worker_dies() {
    // Reads the request line and exits without writing any event.
    let mut command = tokio::process::Command::new("sh");
    command.args(["-c", "head -n 1 > /dev/null"]);
    let db = async_databases().await;
    let request = WorkerRequest {
        config: SyncConfig::load(&db.config).unwrap(),
        job: SyncJob::new(Direction::ServerToLocal, Vec::new()),
    };

    let mut worker = WorkerHandle::spawn(command, &request).await.unwrap();
    let mut events = Vec::new();
    worker
        .drive(&CancellationToken::new(), Duration::from_secs(5), |e| {
            events.push(e.clone())
        })
        .await
        .unwrap();

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ProgressEvent::FatalError { message } if message.contains("without")));
}
