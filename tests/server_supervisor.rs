#![cfg(unix)]

mod common;

use replay_engine::config::schema::ServerConfig;
use replay_engine::server::port::port_in_use;
use replay_engine::server::{
    AlwaysReady, ProcessSupervisor, ServerApi, ServerState, SupervisorEvent, SupervisorSettings,
    SupervisorStatus,
};
use replay_engine::ReplayError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::broadcast;

/// Supervisor running `script` with /bin/sh in dev mode
fn supervisor(dir: &Path, script: &str, tweak: impl FnOnce(&mut ServerConfig)) -> ProcessSupervisor {
    let script_path = dir.join("server.sh");
    std::fs::write(&script_path, script).unwrap();

    let mut server = ServerConfig {
        port: common::free_port(),
        dev_script: Some(script_path),
        interpreter: Some(PathBuf::from("/bin/sh")),
        ..ServerConfig::default()
    };
    tweak(&mut server);

    let api = ServerApi::new(common::http(), server.port);
    ProcessSupervisor::spawn(
        SupervisorSettings {
            server,
            server_dir: dir.to_path_buf(),
            log_dir: dir.join("logs"),
        },
        api,
        Arc::new(AlwaysReady),
    )
}

async fn wait_for_state(supervisor: &ProcessSupervisor, state: ServerState) -> SupervisorStatus {
    tokio::time::timeout(
        Duration::from_secs(15),
        supervisor.wait_for(|s| s.state == state),
    )
    .await
    .unwrap_or_else(|_| panic!("never reached {state:?}: {:?}", supervisor.status()))
}

fn drain(events: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn test_crash_budget_is_spent_then_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let count = temp_dir.path().join("spawns.txt");
    let script = format!(
        "echo spawn >> '{}'\necho 'worker died' >&2\nsleep 0.4\nexit 1\n",
        count.display()
    );
    let supervisor = supervisor(temp_dir.path(), &script, |server| {
        server.retry_budget = 2;
        server.min_uptime_ms = 200;
    });
    let mut events = supervisor.subscribe();

    supervisor.start().await.unwrap();
    let status = wait_for_state(&supervisor, ServerState::Fatal).await;

    assert_eq!(status.spawns, 3);
    assert_eq!(status.restarts, 2);
    assert_eq!(status.retries_left, 0);
    assert!(status.pid.is_none());
    assert_eq!(std::fs::read_to_string(&count).unwrap().lines().count(), 3);

    let seen = drain(&mut events);
    let restarting = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Crashed { restarting: true, .. }))
        .count();
    let reloads = seen
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::ReloadRequested))
        .count();
    assert_eq!(restarting, 2);
    assert_eq!(reloads, 2);
    assert!(matches!(seen.last(), Some(SupervisorEvent::Fatal { .. })));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_immediate_failure_is_not_retried() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = supervisor(temp_dir.path(), "exit 3\n", |_| {});

    supervisor.start().await.unwrap();
    let status = wait_for_state(&supervisor, ServerState::Fatal).await;

    assert_eq!(status.spawns, 1);
    assert_eq!(status.restarts, 0);
    assert!(status.last_error.unwrap().contains('3'));

    // a fresh start gets a fresh budget
    supervisor.start().await.unwrap();
    let status = wait_for_state(&supervisor, ServerState::Fatal).await;
    assert_eq!(status.spawns, 2);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stubborn_server_is_killed_at_deadline() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = supervisor(
        temp_dir.path(),
        "trap '' TERM\nwhile true; do sleep 1; done\n",
        |_| {},
    );
    let mut events = supervisor.subscribe();

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.status().state, ServerState::Running);
    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    supervisor.stop().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2900), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "stopped after {elapsed:?}");

    let status = supervisor.status();
    assert_eq!(status.state, ServerState::Stopped);
    assert!(status.killed);
    assert!(status.pid.is_none());

    let seen = drain(&mut events);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SupervisorEvent::Crashed { .. })));
    assert!(seen.contains(&SupervisorEvent::Stopped));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = supervisor(temp_dir.path(), "exec sleep 30\n", |_| {});

    supervisor.start().await.unwrap();
    let first = supervisor.status().pid.unwrap();
    // starting twice is a no-op
    supervisor.start().await.unwrap();
    assert_eq!(supervisor.status().spawns, 1);

    supervisor.restart().await.unwrap();
    let status = supervisor.status();
    assert_eq!(status.state, ServerState::Running);
    assert_eq!(status.spawns, 2);
    assert_ne!(status.pid.unwrap(), first);

    let started = Instant::now();
    supervisor.shutdown().await.unwrap();
    // SIGTERM is enough for a cooperative process
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.status().state, ServerState::Stopped);
}

#[tokio::test]
async fn test_foreign_port_owner_is_stopped_before_launch() {
    let Ok(python) = which::which("python3") else {
        eprintln!("python3 not found, skipping");
        return;
    };
    if which::which("lsof").is_err() {
        eprintln!("lsof not found, skipping");
        return;
    }

    let port = common::free_port();
    let mut foreign = Command::new(python)
        .args(["-m", "http.server", &port.to_string(), "--bind", "127.0.0.1"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while !port_in_use(port).await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("foreign listener never bound");

    let temp_dir = TempDir::new().unwrap();
    let supervisor = supervisor(temp_dir.path(), "exec sleep 30\n", |server| {
        server.port = port;
    });

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.status().state, ServerState::Running);

    let exit = tokio::time::timeout(Duration::from_secs(5), foreign.wait())
        .await
        .expect("foreign listener still running")
        .unwrap();
    assert!(!exit.success());

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreclaimable_port_fails_start() {
    // held by this test process, which is never a reclaim target
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let temp_dir = TempDir::new().unwrap();
    let spawns = temp_dir.path().join("spawns.txt");
    let script = format!("echo spawn >> '{}'\nexec sleep 30\n", spawns.display());
    let supervisor = supervisor(temp_dir.path(), &script, |server| {
        server.port = port;
        server.port_free_timeout_ms = 300;
    });

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, ReplayError::PortContention(_)), "{err}");

    let status = supervisor.status();
    assert_eq!(status.state, ServerState::Stopped);
    assert_eq!(status.spawns, 0);
    assert!(status.pid.is_none());
    assert!(!spawns.exists());

    drop(holder);
    supervisor.shutdown().await.unwrap();
}
