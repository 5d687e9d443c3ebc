// deadline-watch: CLI for deadline-daemon
//
// Commands:
//   deadline-watch [watch] [--no-start] [--quiet]
//   deadline-watch ping | status [--json] | shutdown
//   deadline-watch complete <id> | reopen <id>

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use deadline_notify_lib::notifier::{
    client::{response_to_result, DaemonClient},
    config::Config,
    logging::init_tracing,
    notifications::ClientNotificationSet,
    notify::{format_entry, notify_deadline},
    protocol::{DaemonRequest, DaemonResponse, NotificationBatch},
    store::{JsonFileTaskStore, TaskStore},
    task::{TaskId, TaskStatus},
};
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause before trying to reach a daemon that went away
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// How long one-shot commands wait for the daemon to answer
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(
    name = "deadline-watch",
    version,
    about = "Watch for tasks approaching their deadline"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Subscribe to the daemon and show near-deadline tasks (default)
    Watch {
        /// Do not start the daemon if it is not running
        #[arg(long)]
        no_start: bool,

        /// Do not emit terminal notifications for new entries
        #[arg(long)]
        quiet: bool,
    },
    /// Check that the daemon answers
    Ping,
    /// Show daemon status
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Ask the daemon to stop
    Shutdown,
    /// Mark a task as completed in the task file
    Complete { id: String },
    /// Reopen a completed task in the task file
    Reopen { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::from_env();

    match cli.command.unwrap_or(Cmd::Watch {
        no_start: false,
        quiet: false,
    }) {
        Cmd::Watch { no_start, quiet } => watch(config, !no_start, !quiet),
        Cmd::Ping => ping(&config),
        Cmd::Status { json } => status(&config, json),
        Cmd::Shutdown => shutdown(&config),
        Cmd::Complete { id } => complete(&config, TaskId::new(id)),
        Cmd::Reopen { id } => reopen(&config, TaskId::new(id)),
    }
}

fn connect_for_request(config: &Config) -> Result<DaemonClient> {
    let client = DaemonClient::connect(config).context("Is deadline-daemon running?")?;
    client.set_read_timeout(Some(REQUEST_TIMEOUT))?;
    Ok(client)
}

fn ping(config: &Config) -> Result<()> {
    let mut client = connect_for_request(config)?;
    let response = client.request(DaemonRequest::Ping)?;
    response_to_result(response, |r| match r {
        DaemonResponse::Pong => Some(()),
        _ => None,
    })?;
    println!("pong");
    Ok(())
}

fn status(config: &Config, json: bool) -> Result<()> {
    let mut client = connect_for_request(config)?;
    let response = client.request(DaemonRequest::Status)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let (version, sessions, mode, interval, window) = response_to_result(response, |r| match r {
        DaemonResponse::Status {
            protocol_version,
            connected_sessions,
            scan_mode,
            scan_interval_secs,
            window_secs,
            ..
        } => Some((
            protocol_version,
            connected_sessions,
            scan_mode,
            scan_interval_secs,
            window_secs,
        )),
        _ => None,
    })?;

    println!("Socket:            {}", config.socket_path.display());
    println!("Protocol version:  {}", version);
    // This connection is one of them
    println!("Connected clients: {}", sessions.saturating_sub(1));
    println!("Scan mode:         {}", mode);
    println!("Scan interval:     {}s", interval);
    println!("Window:            {}h", window / 3600);
    Ok(())
}

fn shutdown(config: &Config) -> Result<()> {
    let mut client = connect_for_request(config)?;
    let response = client.request(DaemonRequest::Shutdown)?;
    response_to_result(response, |r| match r {
        DaemonResponse::ShuttingDown => Some(()),
        _ => None,
    })?;
    println!("Daemon shutting down");
    Ok(())
}

fn complete(config: &Config, id: TaskId) -> Result<()> {
    let store = JsonFileTaskStore::new(&config.tasks_file);
    store
        .set_status(&id, TaskStatus::Completed)
        .with_context(|| format!("Failed to complete task {}", id))?;
    println!("Completed {}", id);
    Ok(())
}

fn reopen(config: &Config, id: TaskId) -> Result<()> {
    let store = JsonFileTaskStore::new(&config.tasks_file);
    // Deadline read and status write happen under one exclusive lock
    let status = store
        .update(&id, |task| {
            let status = TaskStatus::reopened(task.deadline()?, Utc::now());
            task.status = status;
            Ok(status)
        })
        .with_context(|| format!("Failed to reopen task {}", id))?;
    println!("Reopened {} as {}", id, status);
    Ok(())
}

/// Notification state shared between the socket reader and the stdin loop
type SharedSet = Arc<Mutex<ClientNotificationSet>>;

fn lock(set: &SharedSet) -> MutexGuard<'_, ClientNotificationSet> {
    // The set is plain data; a panicked holder cannot leave it half-written
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn watch(config: Config, auto_start: bool, alerts: bool) -> Result<()> {
    let set: SharedSet = Arc::new(Mutex::new(ClientNotificationSet::new()));

    let reader_set = Arc::clone(&set);
    let reader = thread::Builder::new()
        .name("deadline-watch-reader".to_string())
        .spawn(move || follow_daemon(&config, auto_start, alerts, &reader_set))
        .context("Failed to spawn reader thread")?;

    println!("Watching for deadlines. Commands: list, read <id>, snooze <id>, quit");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let mut words = line.split_whitespace();

        match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("list" | "ls"), _) => render(&lock(&set)),
            (Some("read"), Some(id)) => {
                let id = TaskId::from(id);
                if lock(&set).mark_as_read(&id) {
                    println!("Dismissed {}", id);
                } else {
                    println!("No notification for {}", id);
                }
            }
            (Some("snooze"), Some(id)) => {
                let id = TaskId::from(id);
                if lock(&set).snooze(&id) {
                    println!("Snoozed {}", id);
                } else {
                    println!("No notification for {}", id);
                }
            }
            (Some("quit" | "exit" | "q"), _) => return Ok(()),
            (Some(other), _) => {
                println!(
                    "Unknown command: {} (try: list, read <id>, snooze <id>, quit)",
                    other
                );
            }
        }
    }

    // stdin closed (e.g. running in the background): keep following
    debug!("stdin closed, continuing to watch");
    reader
        .join()
        .map_err(|_| anyhow::anyhow!("reader thread panicked"))?;
    Ok(())
}

/// Stay subscribed to the daemon, reconnecting whenever it goes away
fn follow_daemon(config: &Config, auto_start: bool, alerts: bool, set: &SharedSet) {
    loop {
        let connected = if auto_start {
            DaemonClient::connect_or_start(config)
        } else {
            DaemonClient::connect(config)
        };

        match connected {
            Ok(mut client) => {
                info!(socket = %config.socket_path.display(), "connected to daemon");
                loop {
                    match client.next_notification() {
                        Ok(Some(batch)) => on_batch(set, &batch, alerts),
                        Ok(None) => {
                            warn!("daemon closed the connection");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "lost connection to daemon");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "daemon unavailable");
            }
        }

        thread::sleep(RECONNECT_DELAY);
    }
}

fn on_batch(set: &SharedSet, batch: &NotificationBatch, alerts: bool) {
    let mut set = lock(set);
    let diff = set.apply_batch(batch);
    debug!(
        total = set.len(),
        added = diff.added.len(),
        removed = diff.removed.len(),
        "applied batch"
    );

    if diff.is_empty() {
        return;
    }

    if alerts {
        let now = Utc::now();
        for id in &diff.added {
            if let Some(candidate) = set.get(id) {
                notify_deadline(candidate, now);
            }
        }
    }
    render(&set);
}

fn render(set: &ClientNotificationSet) {
    let now = Utc::now();
    let mut out = io::stdout().lock();

    if set.is_empty() {
        let _ = writeln!(out, "No tasks near their deadline");
    } else {
        let _ = writeln!(out, "{} task(s) near their deadline:", set.len());
        for candidate in set.entries() {
            let _ = writeln!(out, "  {}", format_entry(candidate, now));
        }
    }
    let _ = out.flush();
}
