//! Locating and spawning the inference server process.

use crate::config::schema::ServerConfig;
use crate::error::{ReplayError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// Log target for lines forwarded from the server's stdout/stderr
pub const SERVER_LOG_TARGET: &str = "replay::server";

/// Uvicorn writes its normal startup chatter to stderr
const BENIGN_STDERR: &[&str] = &[
    "Started server process",
    "Waiting for application startup",
    "Application startup complete",
    "Uvicorn running on",
];

/// File name of the packaged server binary for this platform
#[must_use]
pub const fn packaged_binary_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "packager-mac"
    } else if cfg!(windows) {
        "packager-win.exe"
    } else {
        "packager-linux"
    }
}

/// How the server gets launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Prebuilt binary from the server install
    Packaged { binary: PathBuf },
    /// A script from a source checkout run by an interpreter
    Dev { interpreter: PathBuf, script: PathBuf },
}

impl LaunchTarget {
    /// Pick the target for this configuration.
    ///
    /// Fails with [`ReplayError::ServerBinaryNotFound`] when the binary, script or
    /// interpreter is missing.
    pub fn resolve(config: &ServerConfig, server_dir: &Path) -> Result<Self> {
        if let Some(script) = &config.dev_script {
            if !script.exists() {
                return Err(ReplayError::ServerBinaryNotFound(script.clone()));
            }
            let interpreter = match &config.interpreter {
                Some(path) => path.clone(),
                None => which::which("python3")
                    .or_else(|_| which::which("python"))
                    .map_err(|_| ReplayError::ServerBinaryNotFound(PathBuf::from("python3")))?,
            };
            return Ok(Self::Dev {
                interpreter,
                script: script.clone(),
            });
        }

        let binary = server_dir.join(packaged_binary_name());
        if !binary.exists() {
            return Err(ReplayError::ServerBinaryNotFound(binary));
        }
        Ok(Self::Packaged { binary })
    }

    /// Full command line for the server
    #[must_use]
    pub fn command(&self, log_dir: &Path) -> (PathBuf, Vec<String>) {
        let mut args = Vec::new();
        let program = match self {
            Self::Packaged { binary } => binary.clone(),
            Self::Dev {
                interpreter,
                script,
            } => {
                args.push(script.display().to_string());
                interpreter.clone()
            }
        };
        args.extend([
            "--parent-pid".to_string(),
            std::process::id().to_string(),
            "--log-dir".to_string(),
            log_dir.display().to_string(),
        ]);
        (program, args)
    }
}

/// Environment additions for the server process
#[must_use]
pub fn server_env(port: u16, resources_bin_dir: Option<&Path>) -> Vec<(String, String)> {
    let mut env = vec![("REPLAY_PORT".to_string(), port.to_string())];

    if cfg!(target_os = "macos") {
        env.push(("PYTORCH_ENABLE_MPS_FALLBACK".to_string(), "1".to_string()));
    }

    if let Some(bin) = resources_bin_dir {
        let mut entries = vec![bin.to_path_buf()];
        if let Some(existing) = std::env::var_os("PATH") {
            entries.extend(std::env::split_paths(&existing));
        }
        match std::env::join_paths(entries) {
            Ok(path) => env.push(("PATH".to_string(), path.to_string_lossy().into_owned())),
            Err(e) => tracing::warn!("Could not extend PATH with {}: {e}", bin.display()),
        }
    }

    env
}

/// Spawn the server with piped output.
///
/// The child is killed if its handle is dropped.
pub fn spawn(target: &LaunchTarget, config: &ServerConfig, log_dir: &Path) -> Result<Child> {
    let (program, args) = target.command(log_dir);
    tracing::info!("Launching server: {} {}", program.display(), args.join(" "));

    let mut command = Command::new(&program);
    command
        .args(&args)
        .envs(server_env(config.port, config.resources_bin_dir.as_deref()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let LaunchTarget::Packaged { binary } = target {
        if let Some(dir) = binary.parent() {
            command.current_dir(dir);
        }
    }

    Ok(command.spawn()?)
}

/// Whether a stderr line is normal server startup output
#[must_use]
pub fn is_benign(line: &str) -> bool {
    BENIGN_STDERR.iter().any(|msg| line.contains(msg))
}

/// Forward the child's output into our log.
///
/// The most recent stderr line that isn't startup chatter is kept in `last_error`.
pub fn forward_output(child: &mut Child, last_error: Arc<Mutex<Option<String>>>) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump(stdout, None));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump(stderr, Some(last_error)));
    }
}

async fn pump<R>(stream: R, last_error: Option<Arc<Mutex<Option<String>>>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(last_error) = &last_error else {
            tracing::info!(target: SERVER_LOG_TARGET, "{line}");
            continue;
        };

        tracing::error!(target: SERVER_LOG_TARGET, "{line}");
        if !is_benign(&line) {
            let mut slot = last_error
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *slot = Some(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dev_config(script: PathBuf, interpreter: Option<PathBuf>) -> ServerConfig {
        ServerConfig {
            dev_script: Some(script),
            interpreter,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_resolve_missing_packaged_binary() {
        let temp_dir = TempDir::new().unwrap();
        let err = LaunchTarget::resolve(&ServerConfig::default(), temp_dir.path()).unwrap_err();
        match err {
            ReplayError::ServerBinaryNotFound(path) => {
                assert_eq!(path, temp_dir.path().join(packaged_binary_name()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_packaged_binary() {
        let temp_dir = TempDir::new().unwrap();
        let binary = temp_dir.path().join(packaged_binary_name());
        std::fs::write(&binary, b"").unwrap();

        let target = LaunchTarget::resolve(&ServerConfig::default(), temp_dir.path()).unwrap();
        assert_eq!(target, LaunchTarget::Packaged { binary });
    }

    #[test]
    fn test_resolve_dev_with_interpreter() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("main.py");
        std::fs::write(&script, b"").unwrap();

        let config = dev_config(script.clone(), Some(PathBuf::from("/bin/sh")));
        let target = LaunchTarget::resolve(&config, temp_dir.path()).unwrap();
        assert_eq!(
            target,
            LaunchTarget::Dev {
                interpreter: PathBuf::from("/bin/sh"),
                script,
            }
        );
    }

    #[test]
    fn test_resolve_dev_missing_script() {
        let temp_dir = TempDir::new().unwrap();
        let config = dev_config(temp_dir.path().join("main.py"), None);
        assert!(matches!(
            LaunchTarget::resolve(&config, temp_dir.path()),
            Err(ReplayError::ServerBinaryNotFound(_))
        ));
    }

    #[test]
    fn test_command_line() {
        let target = LaunchTarget::Dev {
            interpreter: PathBuf::from("python3"),
            script: PathBuf::from("main.py"),
        };
        let (program, args) = target.command(Path::new("/tmp/logs"));
        assert_eq!(program, PathBuf::from("python3"));
        assert_eq!(args[0], "main.py");
        assert_eq!(args[1], "--parent-pid");
        assert_eq!(args[2], std::process::id().to_string());
        assert_eq!(&args[3..], ["--log-dir", "/tmp/logs"]);
    }

    #[test]
    fn test_env_prefixes_path() {
        let env = server_env(7000, Some(Path::new("/opt/replay/bin")));
        assert!(env.contains(&("REPLAY_PORT".to_string(), "7000".to_string())));

        let path = env.iter().find(|(k, _)| k == "PATH").unwrap();
        assert!(path.1.starts_with("/opt/replay/bin"));
    }

    #[test]
    fn test_benign_lines() {
        assert!(is_benign("INFO:     Uvicorn running on http://127.0.0.1:62362"));
        assert!(is_benign("INFO:     Application startup complete."));
        assert!(!is_benign("Traceback (most recent call last):"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_sets_last_error() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("server.sh");
        std::fs::write(
            &script,
            "echo hello\necho 'INFO: Application startup complete.' >&2\necho 'boom' >&2\necho 'INFO: Uvicorn running on x' >&2\n",
        )
        .unwrap();

        let config = dev_config(script, Some(PathBuf::from("/bin/sh")));
        let target = LaunchTarget::resolve(&config, temp_dir.path()).unwrap();
        let mut child = spawn(&target, &config, temp_dir.path()).unwrap();

        let last_error = Arc::new(Mutex::new(None));
        forward_output(&mut child, Arc::clone(&last_error));
        child.wait().await.unwrap();
        // let the pump drain the pipe
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert_eq!(last_error.lock().unwrap().as_deref(), Some("boom"));
    }
}
