//! IPC Transport Layer
//!
//! Length-prefixed framing over Unix domain sockets, and the listener a
//! provider host uses to serve its [`Router`] to controller processes.
//!
//! Every request frame carries an encoded [`Container`]; every response
//! frame carries an encoded `Option<Vec<u8>>`, absent when no handler
//! replied with a payload.

use crate::codec::{self, CodecError};
use crate::container::Container;
use crate::router::{Responder, Router};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest frame body accepted on either side.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Default timeout for a single frame read or write.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for IPC operations
pub type IpcResult<T> = Result<T, IpcError>;

/// Error type for IPC operations
#[derive(Error, Debug)]
pub enum IpcError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] CodecError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),
}

async fn with_timeout<F, T>(limit: Option<Duration>, what: &str, fut: F) -> IpcResult<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IpcError::Timeout(format!("{} operation timed out", what))),
        },
        None => Ok(fut.await?),
    }
}

/// Write one frame: a little-endian `u32` length followed by the body.
pub async fn write_frame<W>(writer: &mut W, data: &[u8], limit: Option<Duration>) -> IpcResult<()>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > MAX_FRAME_SIZE {
        return Err(IpcError::Protocol(format!(
            "Message too large: {} bytes",
            data.len()
        )));
    }

    let len = data.len() as u32;
    with_timeout(limit, "Write", writer.write_all(&len.to_le_bytes())).await?;
    with_timeout(limit, "Write", writer.write_all(data)).await?;
    with_timeout(limit, "Write", writer.flush()).await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a new
/// frame started. `limit` bounds each read, including the wait for the
/// first byte.
pub async fn read_frame<R>(reader: &mut R, limit: Option<Duration>) -> IpcResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match with_timeout(limit, "Read", reader.read_exact(&mut len_buf)).await {
        Ok(_) => {}
        Err(IpcError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    // Sanity check on message size to prevent OOM
    if len > MAX_FRAME_SIZE {
        return Err(IpcError::Protocol(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut data = vec![0u8; len];
    with_timeout(limit, "Read", reader.read_exact(&mut data)).await?;
    Ok(Some(data))
}

/// Controller side of a provider connection.
pub struct ProviderConnection {
    stream: UnixStream,
    io_timeout: Duration,
}

impl ProviderConnection {
    /// Connect to a provider host listening at `path`.
    pub async fn connect<P: AsRef<Path>>(path: P, io_timeout: Duration) -> IpcResult<Self> {
        let stream = timeout(io_timeout, UnixStream::connect(path.as_ref()))
            .await
            .map_err(|_| IpcError::Timeout("Connect operation timed out".to_string()))?
            .map_err(|e| IpcError::Connection(format!("Failed to connect to socket: {}", e)))?;

        Ok(Self { stream, io_timeout })
    }

    /// Send one encoded container and wait for the matching response.
    pub async fn round_trip(&mut self, message: &[u8]) -> IpcResult<Option<Vec<u8>>> {
        write_frame(&mut self.stream, message, Some(self.io_timeout)).await?;

        let frame = read_frame(&mut self.stream, Some(self.io_timeout))
            .await?
            .ok_or_else(|| IpcError::Connection("Provider closed the connection".to_string()))?;
        Ok(codec::decode(&frame)?)
    }

    /// Shut the connection down.
    pub async fn close(&mut self) -> IpcResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Provider side: a Unix domain socket listener serving a [`Router`].
pub struct ProviderListener {
    listener: UnixListener,
    socket_path: PathBuf,
    io_timeout: Duration,
}

impl ProviderListener {
    /// Bind to `path`, replacing a stale socket file.
    pub fn bind<P: AsRef<Path>>(path: P) -> IpcResult<Self> {
        let path = path.as_ref();

        // Remove the socket file if it already exists
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| {
                IpcError::Connection(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| IpcError::Connection(format!("Failed to bind to socket: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut permissions = std::fs::metadata(path)?.permissions();
            permissions.set_mode(0o660); // rw-rw----
            std::fs::set_permissions(path, permissions)?;
        }

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        })
    }

    /// Override the per-frame I/O timeout.
    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Path of the socket file.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` is cancelled. Each connection is
    /// served on its own task.
    pub async fn serve(&self, router: Arc<Router>, shutdown: CancellationToken) -> IpcResult<()> {
        info!("Provider listening on {}", self.socket_path.display());
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            debug!("Accepted controller connection");
            let router = router.clone();
            let shutdown = shutdown.clone();
            let io_timeout = self.io_timeout;
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, router, shutdown, io_timeout).await {
                    warn!("Controller connection ended with error: {}", e);
                }
            });
        }
        info!("Provider listener shut down");
        Ok(())
    }
}

impl Drop for ProviderListener {
    fn drop(&mut self) {
        // Clean up the socket file when the listener is dropped
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn serve_connection(
    mut stream: UnixStream,
    router: Arc<Router>,
    shutdown: CancellationToken,
    io_timeout: Duration,
) -> IpcResult<()> {
    loop {
        // Controllers may stay idle between polls; only the shutdown bounds the wait.
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut stream, None) => frame?,
        };
        let Some(frame) = frame else {
            debug!("Controller closed the connection");
            break;
        };

        let payload = match Container::decode(&frame) {
            Some(container) => dispatch(&router, &container, io_timeout).await,
            None => {
                warn!(len = frame.len(), "Received a frame that is not a container");
                None
            }
        };
        write_frame(&mut stream, &codec::encode(&payload)?, Some(io_timeout)).await?;
    }
    Ok(())
}

async fn dispatch(router: &Router, container: &Container, io_timeout: Duration) -> Option<Vec<u8>> {
    let (responder, rx) = Responder::new();
    let handled = router.handle(container, &responder);
    drop(responder);

    if handled == 0 {
        return None;
    }
    // Handlers may hold on to the responder and answer from another task.
    timeout(io_timeout, rx.recv()).await.unwrap_or_else(|_| {
        warn!(tag = container.type_tag(), "Handler did not reply in time");
        None
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Ping, Pong};

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello", None).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b, None).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut b, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_SIZE as u32 + 1).to_le_bytes())
            .await
            .unwrap();

        match read_frame(&mut b, None).await {
            Err(IpcError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (_a, mut b) = tokio::io::duplex(64);
        match read_frame(&mut b, Some(Duration::from_millis(20))).await {
            Err(IpcError::Timeout(_)) => {}
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listener_serves_router() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("provider.sock");

        let router = Arc::new(Router::new());
        router
            .add_message_handler(|_: Ping, responder| {
                responder.reply(&Pong).unwrap();
            })
            .unwrap();

        let listener = ProviderListener::bind(&socket_path).unwrap();
        let shutdown = CancellationToken::new();
        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result = listener.serve(router, shutdown).await;
                drop(listener);
                result
            })
        };

        let mut connection = ProviderConnection::connect(&socket_path, DEFAULT_IO_TIMEOUT)
            .await
            .unwrap();

        let ping = Container::make(&Ping).unwrap().encode().unwrap();
        let reply = connection.round_trip(&ping).await.unwrap();
        assert_eq!(reply, Some(codec::encode(&Pong).unwrap()));

        let unknown = Container::new("test.unknown", None).encode().unwrap();
        assert_eq!(connection.round_trip(&unknown).await.unwrap(), None);

        assert_eq!(connection.round_trip(b"garbage").await.unwrap(), None);

        connection.close().await.unwrap();
        shutdown.cancel();
        server.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }
}
