//! Port contention: detect a busy server port and reclaim it.

use super::api::ServerApi;
use super::shutdown::{stop_process, StopTarget};
use crate::error::{ReplayError, Result};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;

/// True if something is already listening on `port` on the loopback interface
pub async fn port_in_use(port: u16) -> bool {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(_) => false,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => true,
        Err(e) => {
            tracing::warn!("Could not probe port {port}: {e}");
            false
        }
    }
}

/// Process ids listening on `port`, never including this process
pub async fn find_pids_on_port(port: u16) -> Vec<u32> {
    let own = std::process::id();
    let mut pids = match list_listeners(port).await {
        Ok(pids) => pids,
        Err(e) => {
            tracing::warn!("Could not list processes on port {port}: {e}");
            Vec::new()
        }
    };
    pids.retain(|pid| *pid != own);
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(unix)]
async fn list_listeners(port: u16) -> Result<Vec<u32>> {
    let lsof = which::which("lsof")
        .map_err(|_| ReplayError::NotFound("lsof is not installed".to_string()))?;
    let output = tokio::process::Command::new(lsof)
        .args(["-t", "-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
        .output()
        .await?;
    // lsof exits 1 when nothing matches
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect())
}

#[cfg(windows)]
async fn list_listeners(port: u16) -> Result<Vec<u32>> {
    let output = tokio::process::Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .output()
        .await?;
    Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout), port))
}

#[cfg(not(any(unix, windows)))]
async fn list_listeners(_port: u16) -> Result<Vec<u32>> {
    Ok(Vec::new())
}

/// Pull listening pids for `port` out of `netstat -ano` output
#[cfg_attr(not(windows), allow(dead_code))]
fn parse_netstat(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    output
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            // Proto  Local  Foreign  State  PID
            if cols.len() < 5 || !cols[3].eq_ignore_ascii_case("LISTENING") {
                return None;
            }
            if !cols[1].ends_with(&suffix) {
                return None;
            }
            cols[4].parse().ok()
        })
        .collect()
}

/// Poll until `port` is free or `timeout` passes
pub async fn wait_until_free(port: u16, interval: Duration, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if !port_in_use(port).await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ReplayError::PortContention(format!(
                "port {port} still in use after {}s",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Timings for reclaiming a port
#[derive(Debug, Clone, Copy)]
pub struct Reclaim {
    pub shutdown_deadline: Duration,
    pub poll_interval: Duration,
    pub free_interval: Duration,
    pub free_timeout: Duration,
}

/// Stop whatever holds `port` and wait for it to be released.
///
/// A no-op when the port is already free.
pub async fn free_port(port: u16, api: &ServerApi, timings: Reclaim) -> Result<()> {
    if !port_in_use(port).await {
        return Ok(());
    }

    let pids = find_pids_on_port(port).await;
    tracing::info!("Port {port} in use by {pids:?}, stopping");
    for pid in pids {
        stop_process(
            StopTarget::Pid(pid),
            Some(api),
            timings.shutdown_deadline,
            timings.poll_interval,
        )
        .await?;
    }

    wait_until_free(port, timings.free_interval, timings.free_timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_port_in_use_while_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port).await);

        drop(listener);
        assert!(!port_in_use(port).await);
    }

    #[tokio::test]
    async fn test_wait_until_free_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result =
            wait_until_free(port, Duration::from_millis(20), Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ReplayError::PortContention(_))));
    }

    #[tokio::test]
    async fn test_wait_until_free_returns_once_released() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(listener);
        });
        wait_until_free(port, Duration::from_millis(20), Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_own_pid_is_never_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let pids = find_pids_on_port(port).await;
        assert!(!pids.contains(&std::process::id()));
    }

    #[test]
    fn test_parse_netstat() {
        let output = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1044
  TCP    127.0.0.1:62362        0.0.0.0:0              LISTENING       4120
  TCP    127.0.0.1:62362        127.0.0.1:50001        ESTABLISHED     4120
  TCP    127.0.0.1:623620       0.0.0.0:0              LISTENING       77
";
        assert_eq!(parse_netstat(output, 62362), vec![4120]);
        assert!(parse_netstat(output, 8080).is_empty());
    }
}
