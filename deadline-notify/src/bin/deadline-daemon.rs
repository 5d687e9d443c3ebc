// Deadline notification daemon
// Owns the Unix socket and pushes near-deadline tasks to connected clients

use anyhow::{bail, Context, Result};
use clap::Parser;
use deadline_notify_lib::notifier::config::{window_from_hours, Config, MAX_WINDOW_HOURS};
use deadline_notify_lib::notifier::logging::init_tracing;
use deadline_notify_lib::notifier::protocol::ScanMode;
use deadline_notify_lib::notifier::server::{serve, DaemonState};
use deadline_notify_lib::notifier::store::{JsonFileTaskStore, TaskStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "deadline-daemon",
    version,
    about = "Push notifications for tasks approaching their deadline"
)]
struct Args {
    /// Directory for the socket, PID file and default task file
    #[arg(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// JSON task file to scan
    #[arg(long, value_name = "FILE")]
    tasks: Option<PathBuf>,

    /// Seconds between scans
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: Option<u64>,

    /// How far ahead a deadline counts as near
    #[arg(
        long,
        value_name = "HOURS",
        value_parser = clap::value_parser!(i64).range(0..=MAX_WINDOW_HOURS)
    )]
    window_hours: Option<i64>,

    /// One scanner per client, or one shared by all clients
    #[arg(long, value_name = "MODE")]
    scan_mode: Option<ScanMode>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Flags override whatever the environment configured
    fn into_config(self) -> Config {
        let mut config = Config::from_env();

        // --dir re-roots every path, including the default task file
        if let Some(dir) = self.dir {
            let scan = config.scan.clone();
            config = Config::in_dirs(dir.clone(), dir);
            config.scan = scan;
        }
        if let Some(tasks) = self.tasks {
            config.tasks_file = tasks;
        }
        if let Some(secs) = self.interval_secs {
            config.scan.interval = Duration::from_secs(secs);
        }
        if let Some(window) = self.window_hours.and_then(window_from_hours) {
            config.scan.window = window;
        }
        if let Some(mode) = self.scan_mode {
            config.scan.mode = mode;
        }

        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config = args.into_config();

    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    // Clean up stale socket if exists
    if config.socket_exists() {
        if config.is_daemon_running() {
            bail!("Daemon already running (PID: {:?})", config.read_pid());
        }
        warn!(socket = %config.socket_path.display(), "removing stale socket");
        config
            .remove_socket()
            .context("Failed to remove stale socket")?;
    }

    config.write_pid().context("Failed to write PID file")?;

    let store: Arc<dyn TaskStore> = Arc::new(JsonFileTaskStore::new(&config.tasks_file));
    let state = Arc::new(DaemonState::new(config.clone(), store));

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    // Secure socket permissions (owner-only access)
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    info!(
        socket = %config.socket_path.display(),
        tasks = %config.tasks_file.display(),
        mode = %config.scan.mode,
        interval_secs = config.scan.interval.as_secs(),
        window_hours = config.scan.window.num_hours(),
        "daemon listening"
    );

    // SIGINT cancels the same token a `shutdown` request does
    let shutdown = state.shutdown_token();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    });

    let result = serve(state, listener).await;

    // Cleanup
    config.remove_pid().ok();
    config.remove_socket().ok();

    info!("daemon stopped");
    result
}
