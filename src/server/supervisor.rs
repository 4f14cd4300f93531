//! Inference server lifecycle.
//!
//! A single task owns the child process. Callers talk to it through [`ProcessSupervisor`],
//! a cloneable handle that sends requests over a channel and reads the latest
//! [`SupervisorStatus`] from a watch channel. Crashes restart the server while the retry
//! budget lasts; a crash that happens too soon after launch, or one past the budget, is
//! fatal.

use super::api::ServerApi;
use super::launch::{self, LaunchTarget};
use super::port::{self, Reclaim};
use super::shutdown::{stop_process, StopTarget};
use crate::config::schema::ServerConfig;
use crate::error::{ReplayError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

const PORT_FREE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Crashed and being relaunched
    Retrying,
    /// Crashed with no retries left, or too soon after launch
    Fatal,
}

/// Snapshot of the supervisor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub state: ServerState,
    pub pid: Option<u32>,
    pub port: u16,
    /// Set when we stopped the server ourselves
    pub killed: bool,
    pub message: String,
    pub last_error: Option<String>,
    pub retries_left: u32,
    pub restarts: u32,
    /// Processes launched since the supervisor was created
    pub spawns: u32,
}

impl SupervisorStatus {
    fn new(port: u16, retries_left: u32) -> Self {
        Self {
            state: ServerState::Stopped,
            pid: None,
            port,
            killed: false,
            message: String::new(),
            last_error: None,
            retries_left,
            restarts: 0,
            spawns: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Started { pid: u32 },
    Crashed { message: String, restarting: bool },
    /// Anything holding server state should refresh before the relaunch
    ReloadRequested,
    Fatal { message: String },
    Stopped,
}

/// Decides whether the server may be launched
#[async_trait]
pub trait ReadinessGate: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// Gate that never blocks a launch
pub struct AlwaysReady;

#[async_trait]
impl ReadinessGate for AlwaysReady {
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Where and how to run the server
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub server: ServerConfig,
    pub server_dir: PathBuf,
    pub log_dir: PathBuf,
}

type Reply = oneshot::Sender<Result<()>>;

enum Request {
    Start(Reply),
    Stop(Reply),
    Restart(Reply),
    Shutdown(Reply),
}

/// Handle to the supervisor task
#[derive(Clone)]
pub struct ProcessSupervisor {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<SupervisorStatus>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl ProcessSupervisor {
    /// Spawn the supervisor task. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(
        settings: SupervisorSettings,
        api: ServerApi,
        gate: Arc<dyn ReadinessGate>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(SupervisorStatus::new(
            settings.server.port,
            settings.server.retry_budget,
        ));
        let (events, _) = broadcast::channel(32);

        let supervisor = Supervisor {
            settings,
            api,
            gate,
            child: None,
            started_at: None,
            last_error: Arc::new(Mutex::new(None)),
            status: status_tx,
            events: events.clone(),
        };
        tokio::spawn(supervisor.run(request_rx));

        Self {
            requests: request_tx,
            status: status_rx,
            events,
        }
    }

    /// Launch the server with a fresh retry budget. No-op if it's already running.
    pub async fn start(&self) -> Result<()> {
        self.call(Request::Start).await
    }

    /// Stop the server, waiting until it and its children are gone
    pub async fn stop(&self) -> Result<()> {
        self.call(Request::Stop).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.call(Request::Restart).await
    }

    /// Stop the server and end the supervisor task. Repeated calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Request::Shutdown).await.unwrap_or(Ok(()))
    }

    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<F>(&self, mut predicate: F) -> SupervisorStatus
    where
        F: FnMut(&SupervisorStatus) -> bool,
    {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|s| predicate(s))
            .await
            .map(|s| SupervisorStatus::clone(&s));
        result.unwrap_or_else(|_| self.status())
    }

    async fn call(&self, request: fn(Reply) -> Request) -> Result<()> {
        self.send(request).await.unwrap_or_else(|| {
            Err(ReplayError::Other(
                "Server supervisor has shut down".to_string(),
            ))
        })
    }

    /// `None` once the supervisor task has ended
    async fn send(&self, request: fn(Reply) -> Request) -> Option<Result<()>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests.send(request(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }
}

enum Wake {
    Request(Option<Request>),
    Exited(std::io::Result<ExitStatus>),
}

struct Supervisor {
    settings: SupervisorSettings,
    api: ServerApi,
    gate: Arc<dyn ReadinessGate>,
    child: Option<Child>,
    started_at: Option<Instant>,
    last_error: Arc<Mutex<Option<String>>>,
    status: watch::Sender<SupervisorStatus>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl Supervisor {
    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            let wake = tokio::select! {
                request = requests.recv() => Wake::Request(request),
                exit = wait_child(&mut self.child) => Wake::Exited(exit),
            };

            match wake {
                Wake::Request(Some(Request::Start(reply))) => {
                    reply.send(self.start().await).ok();
                }
                Wake::Request(Some(Request::Stop(reply))) => {
                    reply.send(self.stop().await).ok();
                }
                Wake::Request(Some(Request::Restart(reply))) => {
                    let result = match self.stop().await {
                        Ok(()) => self.start().await,
                        Err(e) => Err(e),
                    };
                    reply.send(result).ok();
                }
                Wake::Request(Some(Request::Shutdown(reply))) => {
                    reply.send(self.stop().await).ok();
                    break;
                }
                Wake::Request(None) => {
                    // every handle is gone
                    if let Err(e) = self.stop().await {
                        tracing::error!("Failed to stop server: {e}");
                    }
                    break;
                }
                Wake::Exited(exit) => self.on_exit(exit).await,
            }
        }
        tracing::debug!("Server supervisor exiting");
    }

    async fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let budget = self.settings.server.retry_budget;
        self.update(|s| {
            s.retries_left = budget;
            s.restarts = 0;
        });
        self.launch().await
    }

    async fn launch(&mut self) -> Result<()> {
        self.set_state(ServerState::Starting, "Starting server...");

        if !self.gate.is_ready().await {
            self.set_state(ServerState::Stopped, "Server assets are not downloaded");
            return Err(ReplayError::AssetsNotReady(
                "server install or required weights are missing".to_string(),
            ));
        }

        if let Err(e) = self.clear_port().await {
            self.set_state(ServerState::Stopped, e.to_string());
            return Err(e);
        }

        let server = &self.settings.server;
        let spawned = LaunchTarget::resolve(server, &self.settings.server_dir)
            .and_then(|target| launch::spawn(&target, server, &self.settings.log_dir));

        match spawned {
            Ok(mut child) => {
                *self.last_error_slot() = None;
                launch::forward_output(&mut child, Arc::clone(&self.last_error));
                let pid = child.id();
                self.child = Some(child);
                self.started_at = Some(Instant::now());
                self.update(|s| {
                    s.pid = pid;
                    s.killed = false;
                    s.last_error = None;
                    s.spawns += 1;
                });
                self.set_state(ServerState::Running, "Server started");
                if let Some(pid) = pid {
                    self.emit(SupervisorEvent::Started { pid });
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("Failed to launch server: {message}");
                self.update(|s| s.last_error = Some(message.clone()));
                self.set_state(ServerState::Fatal, "Server failed to launch");
                self.emit(SupervisorEvent::Fatal { message });
                Err(e)
            }
        }
    }

    async fn clear_port(&self) -> Result<()> {
        let server = &self.settings.server;
        if !port::port_in_use(server.port).await {
            return Ok(());
        }
        self.set_state(
            ServerState::Starting,
            "Server port not available, stopping the process using it",
        );
        port::free_port(
            server.port,
            &self.api,
            Reclaim {
                shutdown_deadline: server.shutdown_deadline(),
                poll_interval: server.poll_interval(),
                free_interval: PORT_FREE_INTERVAL.min(server.port_free_timeout()),
                free_timeout: server.port_free_timeout(),
            },
        )
        .await
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            if self.status.borrow().state != ServerState::Fatal {
                self.set_state(ServerState::Stopped, "Server not running");
            }
            return Ok(());
        };

        self.update(|s| s.killed = true);
        self.set_state(ServerState::Stopping, "Stopping server...");
        let server = &self.settings.server;
        let result = stop_process(
            StopTarget::Child(&mut child),
            Some(&self.api),
            server.shutdown_deadline(),
            server.poll_interval(),
        )
        .await;

        self.started_at = None;
        self.update(|s| s.pid = None);
        self.set_state(ServerState::Stopped, "Server has been killed");
        self.emit(SupervisorEvent::Stopped);
        result
    }

    async fn on_exit(&mut self, exit: std::io::Result<ExitStatus>) {
        self.child = None;
        let uptime = self
            .started_at
            .take()
            .map_or(Duration::ZERO, |started| started.elapsed());
        self.update(|s| s.pid = None);

        let code = match &exit {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        let last_line = self.last_error_slot().clone();
        let message = match last_line {
            Some(line) => format!("Server shutdown unexpectedly ({code}): {line}"),
            None => format!("Server shutdown unexpectedly ({code})"),
        };
        tracing::error!("{message}");
        self.update(|s| s.last_error = Some(message.clone()));

        let retries_left = self.status.borrow().retries_left;
        let restarting = retries_left > 0 && uptime >= self.settings.server.min_uptime();
        self.emit(SupervisorEvent::Crashed {
            message: message.clone(),
            restarting,
        });

        if restarting {
            self.update(|s| {
                s.retries_left -= 1;
                s.restarts += 1;
            });
            self.set_state(
                ServerState::Retrying,
                format!("Restarting server, {} retries left", retries_left - 1),
            );
            self.emit(SupervisorEvent::ReloadRequested);
            if let Err(e) = self.launch().await {
                tracing::error!("Server restart failed: {e}");
            }
        } else {
            let reason = if retries_left == 0 {
                format!(
                    "Server errored {} times, no longer retrying",
                    self.settings.server.retry_budget + 1
                )
            } else {
                "Server exited right after launch, not retrying".to_string()
            };
            self.set_state(ServerState::Fatal, reason);
            self.emit(SupervisorEvent::Fatal { message });
        }
    }

    fn last_error_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut SupervisorStatus)) {
        self.status.send_modify(f);
    }

    fn set_state(&self, state: ServerState, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.status.send_modify(|s| {
            s.state = state;
            s.message = message;
        });
    }

    fn emit(&self, event: SupervisorEvent) {
        // no subscribers is fine
        self.events.send(event).ok();
    }
}

async fn wait_child(child: &mut Option<Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClient;
    use tempfile::TempDir;

    struct NeverReady;

    #[async_trait]
    impl ReadinessGate for NeverReady {
        async fn is_ready(&self) -> bool {
            false
        }
    }

    fn supervisor(temp_dir: &TempDir, gate: Arc<dyn ReadinessGate>) -> ProcessSupervisor {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let server = ServerConfig {
            port,
            ..ServerConfig::default()
        };
        let http = HttpClient::new(0, Duration::from_millis(1), Duration::from_secs(1)).unwrap();
        let api = ServerApi::new(http, server.port);
        ProcessSupervisor::spawn(
            SupervisorSettings {
                server,
                server_dir: temp_dir.path().to_path_buf(),
                log_dir: temp_dir.path().to_path_buf(),
            },
            api,
            gate,
        )
    }

    #[tokio::test]
    async fn test_gate_blocks_launch() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = supervisor(&temp_dir, Arc::new(NeverReady));

        let result = supervisor.start().await;
        assert!(matches!(result, Err(ReplayError::AssetsNotReady(_))));

        let status = supervisor.status();
        assert_eq!(status.state, ServerState::Stopped);
        assert_eq!(status.spawns, 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = supervisor(&temp_dir, Arc::new(AlwaysReady));
        let mut events = supervisor.subscribe();

        let result = supervisor.start().await;
        assert!(matches!(result, Err(ReplayError::ServerBinaryNotFound(_))));
        assert_eq!(supervisor.status().state, ServerState::Fatal);
        assert!(matches!(
            events.recv().await.unwrap(),
            SupervisorEvent::Fatal { .. }
        ));
    }

    #[tokio::test]
    async fn test_stop_when_not_running() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = supervisor(&temp_dir, Arc::new(AlwaysReady));

        supervisor.stop().await.unwrap();
        assert_eq!(supervisor.status().state, ServerState::Stopped);

        supervisor.shutdown().await.unwrap();
        supervisor.shutdown().await.unwrap();
        assert!(supervisor.start().await.is_err());
    }
}
