//! Unix domain socket adapter to a provider host.

use super::{Channel, StartOptions};
use crate::error::ChannelError;
use crate::router::Responder;
use crate::status::ChannelStatus;
use crate::transport::{ProviderConnection, DEFAULT_IO_TIMEOUT};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Requests waiting for the connection task.
const REQUEST_QUEUE_DEPTH: usize = 32;

struct Request {
    message: Vec<u8>,
    responder: Responder,
}

struct ConnectionHandle {
    requests: mpsc::Sender<Request>,
    cancel: CancellationToken,
}

/// Channel to a provider host over a Unix domain socket.
///
/// `start` returns as soon as the connection task is spawned; the status
/// moves to `connected` once the socket is open. Responses are delivered
/// from the connection task, one request at a time.
pub struct SocketChannel {
    path: PathBuf,
    io_timeout: Duration,
    status: Arc<watch::Sender<ChannelStatus>>,
    connection: Mutex<Option<ConnectionHandle>>,
}

impl SocketChannel {
    /// Create a channel for the provider socket at `path`. Nothing is
    /// connected until [`start`](Channel::start).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            path: path.as_ref().to_path_buf(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            status: Arc::new(status),
            connection: Mutex::new(None),
        }
    }

    /// Override the per-frame I/O timeout.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Path of the provider socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }
}

impl Channel for SocketChannel {
    fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    fn start(&self, _options: Option<&StartOptions>) -> Result<(), ChannelError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(io::Error::other)?;

        let mut connection = self.connection.lock().unwrap();
        if connection
            .as_ref()
            .is_some_and(|handle| !handle.requests.is_closed())
        {
            debug!(path = %self.path.display(), "Socket channel already started");
            return Ok(());
        }

        let (requests, queue) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        self.status.send_replace(ChannelStatus::Connecting);
        runtime.spawn(run_connection(
            self.path.clone(),
            self.io_timeout,
            queue,
            self.status.clone(),
            cancel.clone(),
        ));
        *connection = Some(ConnectionHandle { requests, cancel });
        Ok(())
    }

    fn stop(&self) {
        match self.connection.lock().unwrap().take() {
            Some(handle) => {
                self.status.send_replace(ChannelStatus::Disconnecting);
                handle.cancel.cancel();
                // The task closes its queue before settling, so a closed
                // queue means nothing is left to move the status on.
                if handle.requests.is_closed() {
                    self.status.send_replace(ChannelStatus::Disconnected);
                }
            }
            None => {
                self.status.send_replace(ChannelStatus::Disconnected);
            }
        }
    }

    fn send_message(&self, message: Vec<u8>, responder: Responder) -> Result<(), ChannelError> {
        let status = self.status();
        if !status.is_connected() {
            return Err(ChannelError::InvalidState(status));
        }

        let connection = self.connection.lock().unwrap();
        let handle = connection
            .as_ref()
            .ok_or_else(|| ChannelError::Closed("channel was stopped".to_string()))?;
        handle
            .requests
            .try_send(Request { message, responder })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    ChannelError::Closed("request queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ChannelError::Closed("connection task has exited".to_string())
                }
            })
    }
}

async fn run_connection(
    path: PathBuf,
    io_timeout: Duration,
    mut queue: mpsc::Receiver<Request>,
    status: Arc<watch::Sender<ChannelStatus>>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => None,
        result = ProviderConnection::connect(&path, io_timeout) => match result {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to connect to provider");
                None
            }
        },
    };
    let Some(mut connection) = connected else {
        drop(queue);
        finish(&status, &cancel);
        return;
    };

    status.send_replace(ChannelStatus::Connected);
    info!(path = %path.display(), "Connected to provider");

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = queue.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connection.round_trip(&request.message) => result,
        };
        match result {
            Ok(payload) => {
                request.responder.respond(payload);
            }
            Err(e) => {
                warn!(error = %e, "Lost connection to provider");
                if !cancel.is_cancelled() {
                    status.send_replace(ChannelStatus::Reasserting);
                }
                break;
            }
        }
    }

    // Close the queue first so a restart after `disconnected` spawns a new task.
    drop(queue);
    let _ = connection.close().await;
    finish(&status, &cancel);
}

/// Settle the status once the connection task is done. After `stop` the
/// status only moves from `disconnecting`, so a newer connection started in
/// the meantime keeps its own status.
fn finish(status: &watch::Sender<ChannelStatus>, cancel: &CancellationToken) {
    if cancel.is_cancelled() {
        status.send_if_modified(|current| {
            if *current == ChannelStatus::Disconnecting {
                *current = ChannelStatus::Disconnected;
                true
            } else {
                false
            }
        });
    } else {
        status.send_replace(ChannelStatus::Disconnected);
    }
    info!("Provider connection closed");
}
