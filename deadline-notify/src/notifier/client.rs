// Blocking daemon client used by the watch CLI and the process-level tests
// Talks to deadline-daemon over its Unix socket

use super::config::Config;
use super::protocol::{
    deserialize_message, serialize_message, DaemonErrorCode, DaemonRequest, DaemonResponse,
    NotificationBatch, ServerFrame, MAX_RESPONSE_FRAME_SIZE, PROTOCOL_VERSION,
};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info};

/// Name of the daemon binary looked up next to the current executable
pub const DAEMON_BIN_NAME: &str = "deadline-daemon";

/// How long to wait for a freshly spawned daemon to open its socket
const DAEMON_START_TIMEOUT: Duration = Duration::from_secs(5);
const DAEMON_START_POLL: Duration = Duration::from_millis(100);

/// One handshaken connection to the daemon
pub struct DaemonClient {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    /// Batches that arrived while a request was waiting for its response
    pending: VecDeque<NotificationBatch>,
}

impl DaemonClient {
    /// Connect to a running daemon and perform the handshake
    pub fn connect(config: &Config) -> Result<Self> {
        let stream = UnixStream::connect(&config.socket_path).with_context(|| {
            format!(
                "Failed to connect to daemon at {}",
                config.socket_path.display()
            )
        })?;
        Self::from_stream(stream)
    }

    /// Connect to the daemon, starting it if necessary
    pub fn connect_or_start(config: &Config) -> Result<Self> {
        if let Ok(client) = Self::connect(config) {
            return Ok(client);
        }

        let daemon_path = resolve_daemon_path().ok_or_else(|| {
            anyhow!(
                "Could not find {} next to the current executable",
                DAEMON_BIN_NAME
            )
        })?;
        info!(path = %daemon_path.display(), "daemon not running, starting it");

        // Detached; the daemon reads the same environment we were given
        Command::new(&daemon_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start daemon at {}", daemon_path.display()))?;

        let attempts = DAEMON_START_TIMEOUT.as_millis() / DAEMON_START_POLL.as_millis();
        for _ in 0..attempts {
            std::thread::sleep(DAEMON_START_POLL);
            if config.socket_exists() {
                if let Ok(client) = Self::connect(config) {
                    debug!("daemon started");
                    return Ok(client);
                }
            }
        }

        bail!(
            "Daemon did not start within {:?} (socket not found at: {})",
            DAEMON_START_TIMEOUT,
            config.socket_path.display()
        )
    }

    /// Wrap an already connected stream and perform the handshake
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        let writer = stream
            .try_clone()
            .context("Failed to clone daemon stream")?;
        let mut client = Self {
            reader: BufReader::new(stream),
            writer,
            pending: VecDeque::new(),
        };
        client.handshake()?;
        Ok(client)
    }

    /// Bound how long a single read may block; `None` blocks forever
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.writer
            .set_read_timeout(timeout)
            .context("Failed to set read timeout")
    }

    fn handshake(&mut self) -> Result<u32> {
        let response = self.request(DaemonRequest::Handshake {
            client_version: PROTOCOL_VERSION,
        })?;
        match response {
            DaemonResponse::Handshake { protocol_version } => Ok(protocol_version),
            DaemonResponse::Error { code, message } if code == DaemonErrorCode::VersionMismatch => {
                Err(anyhow!("Protocol version mismatch: {}", message))
            }
            other => Err(anyhow!("Expected handshake response, got: {:?}", other)),
        }
    }

    /// Send a request and wait for its response.
    ///
    /// Notify frames that arrive first are queued for `next_notification`.
    pub fn request(&mut self, request: DaemonRequest) -> Result<DaemonResponse> {
        let bytes = serialize_message(&request).context("Failed to serialize request")?;
        self.writer
            .write_all(&bytes)
            .context("Failed to send request to daemon")?;
        self.writer.flush().context("Failed to flush stream")?;

        loop {
            match self.read_frame()? {
                Some(ServerFrame::Response(response)) => return Ok(response),
                Some(ServerFrame::Notification(notification)) => {
                    self.pending.push_back(notification.into());
                }
                None => bail!("Daemon closed connection unexpectedly"),
            }
        }
    }

    /// Block until the next pushed batch. `Ok(None)` means the daemon hung up.
    pub fn next_notification(&mut self) -> Result<Option<NotificationBatch>> {
        if let Some(batch) = self.pending.pop_front() {
            return Ok(Some(batch));
        }

        loop {
            match self.read_frame()? {
                Some(ServerFrame::Notification(notification)) => {
                    return Ok(Some(notification.into()))
                }
                Some(ServerFrame::Response(response)) => {
                    debug!(?response, "ignoring unsolicited response");
                }
                None => return Ok(None),
            }
        }
    }

    /// Read one frame, enforcing the response frame size limit
    fn read_frame(&mut self) -> Result<Option<ServerFrame>> {
        let mut line = String::new();
        let limit = (MAX_RESPONSE_FRAME_SIZE + 1) as u64;

        let read = match (&mut self.reader).take(limit).read_line(&mut line) {
            Ok(read) => read,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                return Err(anyhow!(e).context("Daemon read timeout"));
            }
            Err(e) => return Err(anyhow!(e).context("Failed to read from daemon")),
        };

        if read == 0 {
            return Ok(None);
        }
        if line.len() > MAX_RESPONSE_FRAME_SIZE {
            bail!(
                "Response frame too large: more than {} bytes",
                MAX_RESPONSE_FRAME_SIZE
            );
        }

        let frame = deserialize_message::<ServerFrame>(line.as_bytes())
            .with_context(|| format!("Failed to parse daemon frame: {}", line.trim()))?;
        Ok(Some(frame))
    }
}

/// Turn an error response into an `Err`, otherwise extract what the caller wants
pub fn response_to_result<T, F>(response: DaemonResponse, extract: F) -> Result<T>
where
    F: FnOnce(DaemonResponse) -> Option<T>,
{
    if let DaemonResponse::Error { code, message } = response {
        bail!("Daemon error ({:?}): {}", code, message);
    }

    extract(response).ok_or_else(|| anyhow!("Unexpected response from daemon"))
}

/// The daemon binary installed next to the running executable
pub fn resolve_daemon_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join(DAEMON_BIN_NAME);
    candidate.is_file().then_some(candidate)
}
