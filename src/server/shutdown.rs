//! Stopping the server: graceful request, signal, then a forced kill at the deadline.

use super::api::ServerApi;
use crate::error::Result;
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System};
use tokio::process::Child;
use tokio::time::Instant;

/// What to stop
pub enum StopTarget<'a> {
    /// A child we spawned and must reap
    Child(&'a mut Child),
    /// Any process by id (e.g. a stale server still holding the port)
    Pid(u32),
}

impl StopTarget<'_> {
    fn pid(&self) -> Option<u32> {
        match self {
            Self::Child(child) => child.id(),
            Self::Pid(pid) => Some(*pid),
        }
    }
}

/// Every descendant of `pid`, children before grandchildren
#[must_use]
pub fn descendants(pid: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (child_pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(child_pid.as_u32());
        }
    }

    let mut found = Vec::new();
    let mut queue = vec![pid];
    while let Some(next) = queue.pop() {
        if let Some(kids) = children.get(&next) {
            for kid in kids {
                if *kid != pid && !found.contains(kid) {
                    found.push(*kid);
                    queue.push(*kid);
                }
            }
        }
    }
    found
}

/// Whether a process id is still alive
#[cfg(unix)]
#[must_use]
pub fn is_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid as NixPid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(NixPid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
#[must_use]
pub fn is_running(pid: u32) -> bool {
    let mut system = System::new();
    let pid = sysinfo::Pid::from_u32(pid);
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Ask politely with SIGTERM
#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    if let Ok(raw) = i32::try_from(pid) {
        if let Err(e) = kill(NixPid::from_raw(raw), Signal::SIGTERM) {
            tracing::debug!("SIGTERM to {pid} failed: {e}");
        }
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

/// Force-kill a process (and on Windows its whole tree)
#[cfg(unix)]
pub async fn hard_kill(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    let Ok(raw) = i32::try_from(pid) else {
        return Ok(());
    };
    tracing::warn!("Force killing {pid}");
    match kill(NixPid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(crate::error::ReplayError::Other(format!(
            "Failed to kill {pid}: {e}"
        ))),
    }
}

#[cfg(not(unix))]
pub async fn hard_kill(pid: u32) -> Result<()> {
    tracing::warn!("Force killing {pid}");
    let output = tokio::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .output()
        .await?;
    if !output.stdout.is_empty() {
        tracing::info!("{}", String::from_utf8_lossy(&output.stdout).trim());
    }
    if !output.stderr.is_empty() {
        tracing::error!("{}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}

/// Stop a server process and everything it spawned.
///
/// Sends the graceful shutdown request (falling back to SIGTERM for the whole tree when it
/// fails), then polls the process and each descendant every `poll_interval`. Anything still
/// alive at `deadline` after the call is force-killed, including descendants spawned while
/// waiting.
pub async fn stop_process(
    mut target: StopTarget<'_>,
    api: Option<&ServerApi>,
    deadline: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let Some(pid) = target.pid() else {
        // already reaped
        return Ok(());
    };
    let mut tree = descendants(pid);
    let deadline = Instant::now() + deadline;

    let graceful = match api {
        Some(api) => match api.shutdown().await {
            Ok(()) => true,
            Err(e) => {
                tracing::info!("Shutdown request failed, signalling instead: {e}");
                false
            }
        },
        None => false,
    };
    if !graceful {
        terminate(pid);
        for child_pid in &tree {
            terminate(*child_pid);
        }
    }

    wait_or_kill(&mut target, pid, deadline, poll_interval, &mut tree).await?;
    for child_pid in tree {
        let mut late = Vec::new();
        wait_or_kill(
            &mut StopTarget::Pid(child_pid),
            child_pid,
            deadline,
            poll_interval,
            &mut late,
        )
        .await?;
    }

    if let StopTarget::Child(child) = target {
        child.wait().await?;
    }
    Ok(())
}

async fn wait_or_kill(
    target: &mut StopTarget<'_>,
    pid: u32,
    deadline: Instant,
    poll_interval: Duration,
    tree: &mut Vec<u32>,
) -> Result<()> {
    while alive(target) {
        if Instant::now() >= deadline {
            // children spawned since the first snapshot, found before they are orphaned
            for late in descendants(pid) {
                if !tree.contains(&late) {
                    tree.push(late);
                }
            }
            if let Err(e) = hard_kill(pid).await {
                tracing::warn!("{e}");
            }
            break;
        }
        tokio::time::sleep(poll_interval).await;
    }
    Ok(())
}

fn alive(target: &mut StopTarget<'_>) -> bool {
    match target {
        // try_wait reaps, so an exited child never lingers as a zombie
        StopTarget::Child(child) => matches!(child.try_wait(), Ok(None)),
        StopTarget::Pid(pid) => is_running(*pid),
    }
}
