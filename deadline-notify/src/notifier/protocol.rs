// Notifier protocol - shared structs for daemon <-> client communication
// Uses framed JSON messages over Unix sockets

use crate::notifier::task::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire protocol version, checked by the handshake
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest request line the daemon accepts (1 MiB)
pub const MAX_REQUEST_FRAME_SIZE: usize = 1024 * 1024;

/// Largest response/notification line a client accepts (10 MiB)
pub const MAX_RESPONSE_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Unique client session identifier, allocated per connection
pub type SessionId = u64;

/// How deadline scans are scheduled across sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// Each session owns its own timer and runs its own query
    #[default]
    PerSession,
    /// One daemon-wide scan fanned out to every session
    Shared,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::PerSession => write!(f, "per-session"),
            ScanMode::Shared => write!(f, "shared"),
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-session" => Ok(ScanMode::PerSession),
            "shared" => Ok(ScanMode::Shared),
            _ => Err(format!("Unknown scan mode: {}", s)),
        }
    }
}

/// A task whose deadline falls inside the notification window at scan time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationCandidate {
    #[serde(flatten)]
    pub task: Task,
    /// Parsed deadline, normalized to UTC
    pub deadline: DateTime<Utc>,
}

/// The complete set of qualifying tasks produced by one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationBatch {
    pub scanned_at: DateTime<Utc>,
    /// Ordered by deadline ascending, ties broken by task id
    pub tasks: Vec<NotificationCandidate>,
}

impl NotificationBatch {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ============================================================================
// Client -> Daemon requests
// ============================================================================

/// Request message from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Version check; clients send this first
    Handshake { client_version: u32 },
    /// Ping to check if daemon is alive
    Ping,
    /// Report daemon scan settings and connected sessions
    Status,
    /// Request daemon to shut down gracefully
    Shutdown,
}

// ============================================================================
// Daemon -> Client responses
// ============================================================================

/// Machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonErrorCode {
    VersionMismatch,
    InvalidRequest,
    Internal,
    DaemonUnavailable,
    Timeout,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// Handshake accepted
    Handshake { protocol_version: u32 },
    /// Pong response
    Pong,
    /// Daemon status snapshot
    Status {
        protocol_version: u32,
        connected_sessions: usize,
        scan_mode: ScanMode,
        scan_interval_secs: u64,
        window_secs: i64,
        /// This connection's session id
        session_id: SessionId,
    },
    /// Shutdown acknowledged
    ShuttingDown,
    /// Error response
    Error {
        code: DaemonErrorCode,
        message: String,
    },
}

// ============================================================================
// Daemon -> Client push notifications
// ============================================================================

/// Push message from daemon to a connected client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonNotification {
    /// Tasks currently near their deadline
    Notify {
        scanned_at: DateTime<Utc>,
        tasks: Vec<NotificationCandidate>,
    },
}

impl From<NotificationBatch> for DaemonNotification {
    fn from(batch: NotificationBatch) -> Self {
        DaemonNotification::Notify {
            scanned_at: batch.scanned_at,
            tasks: batch.tasks,
        }
    }
}

impl From<DaemonNotification> for NotificationBatch {
    fn from(notification: DaemonNotification) -> Self {
        match notification {
            DaemonNotification::Notify { scanned_at, tasks } => {
                NotificationBatch { scanned_at, tasks }
            }
        }
    }
}

/// Any frame a client can receive on its connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Notification(DaemonNotification),
    Response(DaemonResponse),
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    serde_json::from_slice(trimmed)
}
