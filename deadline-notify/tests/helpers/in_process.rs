// In-process daemon on a temporary socket, plus a minimal async client

use anyhow::{bail, Context, Result};
use deadline_notify_lib::notifier::config::{Config, ScanSettings};
use deadline_notify_lib::notifier::protocol::{
    deserialize_message, serialize_message, DaemonRequest, DaemonResponse, NotificationBatch,
    ScanMode, ServerFrame, PROTOCOL_VERSION,
};
use deadline_notify_lib::notifier::server::{serve, DaemonState};
use deadline_notify_lib::notifier::store::{StoreError, TaskStore};
use deadline_notify_lib::notifier::task::{Task, TaskId, TaskStatus};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

const FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// Store wrapper that counts how it is used
pub struct RecordingStore {
    inner: Vec<Task>,
    queries: AtomicUsize,
    writes: AtomicUsize,
}

impl RecordingStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            inner: tasks,
            queries: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl TaskStore for RecordingStore {
    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .inner
            .iter()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    fn set_status(&self, id: &TaskId, _status: TaskStatus) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::TaskNotFound(id.clone()))
    }
}

/// A daemon serving on a socket inside its own temp dir
pub struct TestDaemon {
    pub state: Arc<DaemonState>,
    pub server: JoinHandle<Result<()>>,
    temp_dir: TempDir,
}

impl TestDaemon {
    pub async fn start(store: Arc<dyn TaskStore>, mode: ScanMode, interval: Duration) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config =
            Config::in_dirs(temp_dir.path().to_path_buf(), temp_dir.path().to_path_buf());
        config.scan = ScanSettings {
            interval,
            mode,
            ..ScanSettings::default()
        };

        let listener = UnixListener::bind(&config.socket_path).unwrap();
        let state = Arc::new(DaemonState::new(config, store));
        let server = tokio::spawn(serve(Arc::clone(&state), listener));

        Self {
            state,
            server,
            temp_dir,
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state.config().socket_path.clone()
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Connect and complete the handshake
    pub async fn client(&self) -> TestClient {
        let mut client = TestClient::connect(&self.socket_path()).await.unwrap();
        let response = client
            .request(&DaemonRequest::Handshake {
                client_version: PROTOCOL_VERSION,
            })
            .await
            .unwrap();
        assert!(
            matches!(response, DaemonResponse::Handshake { .. }),
            "unexpected handshake response: {:?}",
            response
        );
        client
    }
}

/// Async line-oriented client speaking the daemon protocol
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("connect {}", path.display()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn send(&mut self, request: &DaemonRequest) -> Result<()> {
        self.send_raw(&serialize_message(request)?).await
    }

    /// Next frame of any kind; `None` once the daemon hangs up
    pub async fn next_frame(&mut self) -> Result<Option<ServerFrame>> {
        let mut line = String::new();
        let read = tokio::time::timeout(FRAME_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .context("timed out waiting for a frame")??;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(deserialize_message(line.as_bytes())?))
    }

    /// Send a request and return its response, skipping pushed batches
    pub async fn request(&mut self, request: &DaemonRequest) -> Result<DaemonResponse> {
        self.send(request).await?;
        self.next_response().await
    }

    pub async fn next_response(&mut self) -> Result<DaemonResponse> {
        loop {
            match self.next_frame().await? {
                Some(ServerFrame::Response(response)) => return Ok(response),
                Some(ServerFrame::Notification(_)) => continue,
                None => bail!("daemon closed the connection"),
            }
        }
    }

    pub async fn next_batch(&mut self) -> Result<NotificationBatch> {
        loop {
            match self.next_frame().await? {
                Some(ServerFrame::Notification(notification)) => return Ok(notification.into()),
                Some(ServerFrame::Response(_)) => continue,
                None => bail!("daemon closed the connection"),
            }
        }
    }
}
