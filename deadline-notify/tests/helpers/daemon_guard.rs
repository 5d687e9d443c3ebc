use super::polling::{wait_for_file_content, wait_until, WaitError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// RAII wrapper that ensures the daemon process is cleaned up.
pub struct DaemonGuard {
    child: Child,
    data_dir: PathBuf,
}

impl DaemonGuard {
    /// Start the compiled daemon rooted at `data_dir`, scanning every `scan_secs`
    pub fn start(data_dir: &Path, scan_secs: u64) -> Result<Self, DaemonError> {
        let child = Command::new(daemon_binary())
            .env("DEADLINE_NOTIFY_DIR", data_dir)
            .env("DEADLINE_NOTIFY_SCAN_SECS", scan_secs.to_string())
            .env_remove("DEADLINE_NOTIFY_TASKS")
            .env_remove("DEADLINE_NOTIFY_SCAN_MODE")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(DaemonError::SpawnFailed)?;

        let guard = Self {
            child,
            data_dir: data_dir.to_path_buf(),
        };
        guard.wait_for_ready().map_err(DaemonError::ReadyTimeout)?;
        Ok(guard)
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Ready once the PID file is written and the socket accepts connections
    fn wait_for_ready(&self) -> Result<(), WaitError> {
        wait_for_file_content(
            &self.data_dir.join("daemon.pid"),
            |content| content.trim().parse::<u32>().is_ok(),
            READY_TIMEOUT,
        )?;

        let socket = self.data_dir.join("daemon.sock");
        wait_until("daemon socket", READY_TIMEOUT, || {
            std::os::unix::net::UnixStream::connect(&socket)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
    }

    /// Wait for the daemon to exit on its own
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Result<(), WaitError> {
        let child = &mut self.child;
        wait_until("daemon to exit", timeout, || match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err("still running".to_string()),
            Err(e) => Err(e.to_string()),
        })
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        if let Err(err) = self.child.kill() {
            eprintln!(
                "Failed to terminate deadline-daemon pid {}: {}",
                self.child.id(),
                err
            );
            return;
        }

        let _ = self.child.wait();
    }
}

pub fn daemon_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_deadline-daemon"))
}

pub fn watch_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_deadline-watch"))
}

/// Errors that can occur when starting the daemon for tests.
#[derive(Debug)]
pub enum DaemonError {
    SpawnFailed(std::io::Error),
    ReadyTimeout(WaitError),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(err) => write!(f, "failed to spawn deadline-daemon: {}", err),
            Self::ReadyTimeout(err) => write!(f, "deadline-daemon never became ready: {}", err),
        }
    }
}

impl std::error::Error for DaemonError {}
