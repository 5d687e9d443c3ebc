// Environment configuration helpers for the daemon
// Handles platform-specific paths for sockets, PID files, and the task file,
// plus the deadline scan settings

use crate::notifier::protocol::ScanMode;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default period between deadline scans
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default lookahead for "near deadline"
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

/// Largest accepted lookahead: one year
pub const MAX_WINDOW_HOURS: i64 = 24 * 366;

const DIR_ENV: &str = "DEADLINE_NOTIFY_DIR";
const TASKS_ENV: &str = "DEADLINE_NOTIFY_TASKS";
const SCAN_SECS_ENV: &str = "DEADLINE_NOTIFY_SCAN_SECS";
const WINDOW_HOURS_ENV: &str = "DEADLINE_NOTIFY_WINDOW_HOURS";
const SCAN_MODE_ENV: &str = "DEADLINE_NOTIFY_SCAN_MODE";

/// Deadline scanner timing and selection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    /// Period between scans of one session (or of the shared scanner)
    pub interval: Duration,
    /// A task qualifies when `deadline - now <= window`
    pub window: chrono::Duration,
    pub mode: ScanMode,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SCAN_INTERVAL,
            window: chrono::Duration::hours(DEFAULT_WINDOW_HOURS),
            mode: ScanMode::default(),
        }
    }
}

impl ScanSettings {
    /// Read overrides from the environment, keeping defaults for anything
    /// missing or unparseable
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(secs) = env_parse::<u64>(SCAN_SECS_ENV) {
            if secs == 0 {
                warn!(var = SCAN_SECS_ENV, "scan interval must be positive, using default");
            } else {
                settings.interval = Duration::from_secs(secs);
            }
        }

        if let Some(hours) = env_parse::<i64>(WINDOW_HOURS_ENV) {
            match window_from_hours(hours) {
                Some(window) => settings.window = window,
                None => warn!(
                    var = WINDOW_HOURS_ENV,
                    hours,
                    max = MAX_WINDOW_HOURS,
                    "window out of range, using default"
                ),
            }
        }

        if let Some(mode) = env_parse::<ScanMode>(SCAN_MODE_ENV) {
            settings.mode = mode;
        }

        settings
    }
}

/// Lookahead window for a number of hours, `None` outside `0..=MAX_WINDOW_HOURS`
pub fn window_from_hours(hours: i64) -> Option<chrono::Duration> {
    if !(0..=MAX_WINDOW_HOURS).contains(&hours) {
        return None;
    }
    chrono::Duration::try_hours(hours)
}

/// Parse an environment variable, warning (not failing) on bad values
fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var, value = %raw, "ignoring invalid environment override");
            None
        }
    }
}

/// Configuration for daemon paths and settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing runtime files (socket, PID)
    pub runtime_dir: PathBuf,
    /// Directory for storing persistent state (tasks.json)
    pub state_dir: PathBuf,
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
    /// Path to the JSON task file
    pub tasks_file: PathBuf,
    pub scan: ScanSettings,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        Self::in_dirs(Self::default_runtime_dir(), Self::default_state_dir())
    }

    /// Configuration rooted at explicit runtime/state directories
    pub fn in_dirs(runtime_dir: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            socket_path: runtime_dir.join("daemon.sock"),
            pid_file: runtime_dir.join("daemon.pid"),
            tasks_file: state_dir.join("tasks.json"),
            runtime_dir,
            state_dir,
            scan: ScanSettings::default(),
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        // DEADLINE_NOTIFY_DIR overrides BOTH runtime_dir and state_dir
        let mut config = match std::env::var(DIR_ENV) {
            Ok(override_dir) => {
                let base = PathBuf::from(override_dir);
                Self::in_dirs(base.clone(), base)
            }
            Err(_) => Self::default_paths(),
        };

        if let Ok(tasks_file) = std::env::var(TASKS_ENV) {
            config.tasks_file = PathBuf::from(tasks_file);
        }

        config.scan = ScanSettings::from_env();
        config
    }

    /// Get the default runtime directory (socket + pid)
    fn default_runtime_dir() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            // Linux: prefer XDG_RUNTIME_DIR if set, else fall back to state_dir
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                PathBuf::from(runtime_dir).join("deadline-notify")
            } else {
                Self::default_state_dir()
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self::default_state_dir()
        }
    }

    /// Get the default state directory (tasks.json)
    fn default_state_dir() -> PathBuf {
        // All platforms: ~/.deadline-notify/ (or /tmp/deadline-notify if home unavailable)
        dirs::home_dir()
            .map(|h| h.join(".deadline-notify"))
            .unwrap_or_else(|| PathBuf::from("/tmp/deadline-notify"))
    }

    /// Get the runtime directory (socket + pid)
    pub fn runtime_dir(&self) -> &PathBuf {
        &self.runtime_dir
    }

    /// Get the state directory
    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Ensure both runtime and state directories exist with appropriate permissions
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;

        // Create runtime directory with 0700 permissions on Unix
        std::fs::create_dir_all(&self.runtime_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the daemon PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    /// Read the daemon PID from the PID file
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Remove the PID file
    pub fn remove_pid(&self) -> std::io::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)
        } else {
            Ok(())
        }
    }

    /// Remove the socket file
    pub fn remove_socket(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
        } else {
            Ok(())
        }
    }

    /// Check if the daemon socket exists (indicating daemon may be running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if a process with the stored PID is still running
    #[cfg(unix)]
    pub fn is_daemon_running(&self) -> bool {
        if let Some(pid) = self.read_pid() {
            // Signal 0 only checks that the process exists
            unsafe { libc::kill(pid as i32, 0) == 0 }
        } else {
            false
        }
    }

    #[cfg(not(unix))]
    pub fn is_daemon_running(&self) -> bool {
        // Conservative fallback: assume running if socket exists
        self.socket_exists()
    }
}
