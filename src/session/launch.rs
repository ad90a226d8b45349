//! Launching and terminating the browser process.
//!
//! Process management proper lives with the caller's configuration; this
//! module spawns the configured executable, waits for its debugger socket,
//! and tears it down politely at session end.

use crate::error::{Error, Result};
use crate::session::config::LaunchConfig;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(200);
const TERMINATE_WAIT: Duration = Duration::from_secs(1);
const PROFILE_CLEANUP_GRACE: Duration = Duration::from_millis(500);

pub struct LaunchedBrowser {
    child: Child,
    temp_dirs: Vec<PathBuf>,
}

/// Spawn the configured browser with its debugger server listening on the
/// configured port.
pub fn launch(config: &LaunchConfig) -> Result<LaunchedBrowser> {
    let executable = config
        .firefox_executable
        .as_deref()
        .ok_or_else(|| Error::Launch("no browser executable configured".to_string()))?;

    let mut command = Command::new(executable);
    command
        .arg("--start-debugger-server")
        .arg(config.port.to_string())
        .arg("--no-remote")
        .args(&config.firefox_args)
        .kill_on_drop(false)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Some(profile) = &config.profile_dir {
        command.arg("--profile").arg(profile);
    }

    let child = command
        .spawn()
        .map_err(|e| Error::Launch(format!("cannot start `{executable}`: {e}")))?;
    log::info!(target: "session", "launched `{executable}` (pid {:?})", child.id());

    Ok(LaunchedBrowser {
        child,
        temp_dirs: config.temp_dirs.clone(),
    })
}

/// Poll until the debugger socket accepts connections.
pub async fn wait_for_socket(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match TcpStream::connect((host, port)).await {
            Ok(_probe) => return Ok(()),
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
            }
            Err(_) => return Err(Error::Timeout("launch wait")),
        }
    }
}

impl LaunchedBrowser {
    /// Ask the process to exit and give it a moment. Returns whether it is
    /// gone.
    pub async fn terminate(&mut self) -> bool {
        if let Some(pid) = self.child.id() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::warn!(target: "session", "terminate signal failed: {e}");
            }
        }
        match tokio::time::timeout(TERMINATE_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => {
                log::info!(target: "session", "browser exited: {status}");
                true
            }
            Ok(Err(e)) => {
                log::warn!(target: "session", "browser wait failed: {e}");
                false
            }
            Err(_) => {
                log::warn!(target: "session", "{:#}", Error::Timeout("terminate wait"));
                false
            }
        }
    }

    /// Remove temporary profile directories after a short grace period, so
    /// the exiting process is no longer touching them.
    pub async fn cleanup_profiles(self) {
        if self.temp_dirs.is_empty() {
            return;
        }
        tokio::time::sleep(PROFILE_CLEANUP_GRACE).await;
        for dir in &self.temp_dirs {
            if let Err(e) = tokio::fs::remove_dir_all(dir).await {
                log::warn!(
                    target: "session",
                    "cannot remove temp profile {}: {e}", dir.display()
                );
            } else {
                log::debug!(target: "session", "removed temp profile {}", dir.display());
            }
        }
    }
}
