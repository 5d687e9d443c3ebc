// Daemon server: accepts client connections on the Unix socket, binds a
// ClientSession to each one and forwards its deadline batches as `notify`
// frames while answering requests on the same connection

use crate::notifier::config::Config;
use crate::notifier::protocol::{
    deserialize_message, serialize_message, DaemonErrorCode, DaemonNotification, DaemonRequest,
    DaemonResponse, NotificationBatch, ScanMode, SessionId, MAX_REQUEST_FRAME_SIZE,
    PROTOCOL_VERSION,
};
use crate::notifier::scanner::{ScannerHandle, SharedScanner};
use crate::notifier::session::{ClientSession, DeliveryError};
use crate::notifier::store::TaskStore;
use anyhow::Result;
use bytes::BytesMut;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Shared-mode broadcast depth; slower sessions skip older batches
const BROADCAST_CAPACITY: usize = 16;

/// How long shutdown waits for connections to wind down
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Daemon state shared across all client connections
pub struct DaemonState {
    config: Config,
    store: Arc<dyn TaskStore>,
    /// Broadcast channel for the shared scanner (shared mode only)
    updates_tx: Option<broadcast::Sender<Arc<NotificationBatch>>>,
    next_session_id: AtomicU64,
    connected: AtomicUsize,
    shutdown: CancellationToken,
}

impl DaemonState {
    pub fn new(config: Config, store: Arc<dyn TaskStore>) -> Self {
        let updates_tx = match config.scan.mode {
            ScanMode::Shared => Some(broadcast::channel(BROADCAST_CAPACITY).0),
            ScanMode::PerSession => None,
        };

        Self {
            config,
            store,
            updates_tx,
            next_session_id: AtomicU64::new(1),
            connected: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token cancelled when the daemon is asked to stop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn connected_sessions(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    /// Start the daemon-wide scanner when running in shared mode
    fn start_shared_scanner(&self) -> Option<ScannerHandle> {
        let updates_tx = self.updates_tx.as_ref()?;
        Some(
            SharedScanner::new(
                Arc::clone(&self.store),
                self.config.scan.interval,
                self.config.scan.window,
                updates_tx.clone(),
            )
            .spawn(),
        )
    }

    /// Create the session for a newly accepted connection
    fn open_session(&self) -> ClientSession {
        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        match &self.updates_tx {
            Some(updates_tx) => ClientSession::subscribed(id, updates_tx.subscribe()),
            None => ClientSession::with_own_scanner(id, Arc::clone(&self.store), &self.config.scan),
        }
    }
}

/// One line read from a client
#[derive(Debug, PartialEq, Eq)]
enum RequestFrame {
    Line(String),
    /// The line passed `MAX_REQUEST_FRAME_SIZE`; its bytes are discarded
    /// up to the next newline
    TooLarge,
}

/// Line decoder that reports oversized lines as a frame instead of an error,
/// so the stream keeps going after one.
///
/// Buffered bytes live in the `FramedRead`, which makes reading a request
/// safe to race against batch delivery in `select!`.
struct RequestCodec {
    lines: LinesCodec,
}

impl RequestCodec {
    fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_REQUEST_FRAME_SIZE),
        }
    }

    fn map(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<RequestFrame>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(RequestFrame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(RequestFrame::TooLarge)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for RequestCodec {
    type Item = RequestFrame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestFrame>, LinesCodecError> {
        Self::map(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<RequestFrame>, LinesCodecError> {
        Self::map(self.lines.decode_eof(buf))
    }
}

/// Keeps the connected-session count accurate on every exit path
struct ConnectedGuard<'a>(&'a AtomicUsize);

impl<'a> ConnectedGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ConnectedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accept connections until the shutdown token fires, then wait for the
/// connection tasks to finish.
pub async fn serve(state: Arc<DaemonState>, listener: UnixListener) -> Result<()> {
    let shared_scanner = state.start_shared_scanner();
    let tracker = TaskTracker::new();
    let shutdown = state.shutdown_token();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        tracker.spawn(async move {
                            if let Err(e) = handle_client(state, stream).await {
                                warn!(error = %e, "client connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }

            _ = shutdown.cancelled() => {
                info!("shutting down daemon");
                break;
            }
        }
    }

    if let Some(scanner) = shared_scanner {
        scanner.shutdown().await;
    }

    tracker.close();
    if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait())
        .await
        .is_err()
    {
        warn!(
            remaining = tracker.len(),
            "connections still open after drain timeout"
        );
    }

    Ok(())
}

/// Handle a single client connection
pub async fn handle_client(state: Arc<DaemonState>, stream: UnixStream) -> Result<()> {
    let _connected = ConnectedGuard::new(&state.connected);
    let mut session = state.open_session();
    let session_id = session.id();
    info!(session_id, "client connected");

    let (reader, mut writer) = stream.into_split();
    let mut requests = FramedRead::new(reader, RequestCodec::new());
    let mut batches_open = true;
    let shutdown = state.shutdown_token();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            // Handle incoming requests
            frame = requests.next() => {
                let response = match frame {
                    // Client disconnected
                    None => break,
                    Some(Ok(RequestFrame::TooLarge)) => DaemonResponse::Error {
                        code: DaemonErrorCode::InvalidRequest,
                        message: format!(
                            "Request frame too large (max {} bytes)",
                            MAX_REQUEST_FRAME_SIZE
                        ),
                    },
                    Some(Ok(RequestFrame::Line(line))) => {
                        match deserialize_message::<DaemonRequest>(line.as_bytes()) {
                            Ok(request) => handle_request(&state, session_id, request),
                            Err(e) => DaemonResponse::Error {
                                code: DaemonErrorCode::InvalidRequest,
                                message: format!("Failed to parse request: {}", e),
                            },
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "error reading from client");
                        break;
                    }
                };

                let bytes = serialize_message(&response)?;
                writer.write_all(&bytes).await?;
                writer.flush().await?;
            }

            // Forward deadline batches to the client
            batch = session.next_batch(), if batches_open => {
                let Some(batch) = batch else {
                    debug!(session_id, "notification source closed");
                    batches_open = false;
                    continue;
                };

                let count = batch.len();
                let notification = DaemonNotification::from((*batch).clone());
                let bytes = serialize_message(&notification)?;
                let delivered = match writer.write_all(&bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(source) = delivered {
                    let err = DeliveryError::Write { session_id, source };
                    warn!(error = %err, "dropping batch and closing session");
                    break;
                }
                debug!(session_id, tasks = count, "delivered deadline batch");
            }
        }
    }

    session.disconnect();
    info!(session_id, "client disconnected");
    Ok(())
}

/// Handle a single request from a client
pub fn handle_request(
    state: &DaemonState,
    session_id: SessionId,
    request: DaemonRequest,
) -> DaemonResponse {
    match request {
        DaemonRequest::Handshake { client_version } => {
            if client_version != PROTOCOL_VERSION {
                let message = if client_version < PROTOCOL_VERSION {
                    "Daemon is newer than client, please update the client.".to_string()
                } else {
                    "Daemon is outdated, please restart the daemon.".to_string()
                };
                return DaemonResponse::Error {
                    code: DaemonErrorCode::VersionMismatch,
                    message,
                };
            }
            DaemonResponse::Handshake {
                protocol_version: PROTOCOL_VERSION,
            }
        }

        DaemonRequest::Ping => DaemonResponse::Pong,

        DaemonRequest::Status => DaemonResponse::Status {
            protocol_version: PROTOCOL_VERSION,
            connected_sessions: state.connected_sessions(),
            scan_mode: state.config.scan.mode,
            scan_interval_secs: state.config.scan.interval.as_secs(),
            window_secs: state.config.scan.window.num_seconds(),
            session_id,
        },

        DaemonRequest::Shutdown => {
            info!(session_id, "shutdown requested by client");
            state.shutdown.cancel();
            DaemonResponse::ShuttingDown
        }
    }
}
