//! Primary stream listener.
//!
//! Accepts TCP connections on `(listenaddr, port)` and spawns a
//! [`ConnectionHandler`] for each one. A connection carries newline-delimited
//! JSON requests; every request line gets exactly one response line.
//!
//! The accept loop runs on the invoking task. A bind failure here is fatal to
//! the daemon, so [`PrimaryListener::bind`] is kept separate from
//! [`PrimaryListener::serve`] and nothing else starts until it succeeds.

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use emu_protocol::{decode_request, encode_response, DaemonMessage, FrameError, MAX_LINE_SIZE};

use super::{set_cloexec, ListenAddress, ListenerError, ListenerKind};
use crate::backend::SharedBackend;
use crate::dispatch::{dispatch, frame_error_response};

/// Read timeout for idle connections (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Listener
// ============================================================================

/// The bound primary listener.
pub struct PrimaryListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    backend: SharedBackend,
    connection_counter: AtomicU64,
}

impl PrimaryListener {
    /// Binds the listening socket and marks it close-on-exec.
    ///
    /// # Errors
    ///
    /// - `ListenerError::Resolve` if the host does not resolve
    /// - `ListenerError::Bind` if no resolved address can be bound
    /// - `ListenerError::Descriptor` if `FD_CLOEXEC` cannot be set
    pub async fn bind(address: &ListenAddress, backend: SharedBackend) -> Result<Self, ListenerError> {
        let kind = ListenerKind::Primary;
        let listener = address
            .bind_with(kind, |addr| TcpListener::bind(addr))
            .await?;

        set_cloexec(listener.as_raw_fd()).map_err(|source| ListenerError::Descriptor {
            kind,
            address: address.to_string(),
            source,
        })?;

        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            kind,
            address: address.to_string(),
            source,
        })?;

        info!(
            listener = %kind,
            address = %address,
            local_addr = %local_addr,
            "Primary listener bound"
        );

        Ok(Self {
            listener,
            local_addr,
            backend,
            connection_counter: AtomicU64::new(0),
        })
    }

    /// The address actually bound (port resolved if 0 was requested).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A clone of the backend handle this listener serves.
    pub fn backend(&self) -> SharedBackend {
        Arc::clone(&self.backend)
    }

    /// Runs the accept loop until `cancel` fires.
    ///
    /// Accept errors are logged and do not stop the loop. Open connections
    /// are closed when `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) {
        info!(local_addr = %self.local_addr, "Primary listener serving");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Primary listener shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, conn_num, cancel.child_token());
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        info!(
            connections = self.connection_counter.load(Ordering::Relaxed),
            "Primary listener stopped"
        );
    }

    fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        connection_number: u64,
        cancel: CancellationToken,
    ) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.backend(),
            peer,
            connection_number,
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(connection = connection_number, "Connection closed by shutdown");
                }
                _ = handler.run() => {}
            }
        });
    }
}

// ============================================================================
// Connection handler
// ============================================================================

/// Serves one TCP connection.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    backend: SharedBackend,
    peer: SocketAddr,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        backend: SharedBackend,
        peer: SocketAddr,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            backend,
            peer,
            connection_number,
        }
    }

    /// Processes requests until the client disconnects or an error occurs.
    pub async fn run(mut self) {
        debug!(
            connection = self.connection_number,
            peer = %self.peer,
            "Client connected"
        );

        match self.process_messages().await {
            Ok(()) => {}
            Err(ConnectionError::Timeout) => {
                debug!(connection = self.connection_number, "Connection timed out");
            }
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    peer = %self.peer,
                    error = %e,
                    "Connection closed with error"
                );
            }
        }

        debug!(connection = self.connection_number, "Client disconnected");
    }

    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        let mut line = Vec::new();

        loop {
            line.clear();
            let bytes_read = match timeout(READ_TIMEOUT, self.read_line(&mut line)).await {
                Ok(result) => result?,
                Err(_) => return Err(ConnectionError::Timeout),
            };

            if bytes_read == 0 {
                return Ok(());
            }

            if line.len() > MAX_LINE_SIZE {
                // The rest of the oversized line cannot be resynchronised.
                let err = FrameError::TooLarge {
                    size: line.len(),
                    max: MAX_LINE_SIZE,
                };
                self.send_message(&frame_error_response(&err)).await?;
                return Err(ConnectionError::MessageTooLarge {
                    size: line.len(),
                    max: MAX_LINE_SIZE,
                });
            }

            let response = match decode_request(&line, MAX_LINE_SIZE) {
                Ok(request) => {
                    debug!(
                        connection = self.connection_number,
                        request = ?request.message,
                        "Received request"
                    );
                    dispatch(self.backend.as_ref(), request).await
                }
                Err(FrameError::Empty) => continue,
                Err(e) => {
                    debug!(connection = self.connection_number, error = %e, "Undecodable request");
                    frame_error_response(&e)
                }
            };

            self.send_message(&response).await?;
        }
    }

    /// Reads one line, stopping one byte past the size limit.
    async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize, ConnectionError> {
        let limit = (MAX_LINE_SIZE + 1) as u64;
        let read = (&mut self.reader).take(limit).read_until(b'\n', buf).await?;
        Ok(read)
    }

    async fn send_message(&mut self, msg: &DaemonMessage) -> Result<(), ConnectionError> {
        let mut frame = encode_response(msg)?;
        frame.push(b'\n');

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(&frame).await?;
            writer.flush().await
        })
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] FrameError),

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{spawn_backend, BackendOptions};
    use emu_protocol::ClientMessage;

    async fn bind_local() -> PrimaryListener {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        PrimaryListener::bind(&ListenAddress::new("127.0.0.1", 0), backend)
            .await
            .unwrap()
    }

    async fn roundtrip(stream: &mut BufReader<TcpStream>, line: &[u8]) -> DaemonMessage {
        stream.get_mut().write_all(line).await.unwrap();
        let mut response = String::new();
        stream.read_line(&mut response).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::MessageTooLarge {
            size: 2_000_000,
            max: MAX_LINE_SIZE,
        };
        assert!(err.to_string().contains("2000000"));
    }

    #[tokio::test]
    async fn test_bind_sets_cloexec_and_reports_port() {
        let primary = bind_local().await;
        assert_ne!(primary.local_addr().port(), 0);
        assert!(crate::listener::is_cloexec(primary.listener.as_raw_fd()).unwrap());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_bind_error() {
        let primary = bind_local().await;
        let port = primary.local_addr().port();

        let err = PrimaryListener::bind(&ListenAddress::new("127.0.0.1", port), primary.backend())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ListenerError::Bind { kind: ListenerKind::Primary, .. }));
    }

    #[tokio::test]
    async fn test_serves_requests_and_survives_garbage() {
        let primary = bind_local().await;
        let addr = primary.local_addr();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(primary.serve(cancel.clone()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut stream = BufReader::new(stream);

        let mut ping = serde_json::to_vec(&ClientMessage::ping(5)).unwrap();
        ping.push(b'\n');
        assert_eq!(roundtrip(&mut stream, &ping).await, DaemonMessage::pong(5));

        let response = roundtrip(&mut stream, b"this is not json\n").await;
        assert!(matches!(
            response,
            DaemonMessage::Error { code: Some(ref c), .. } if c == "parse_error"
        ));

        let response = roundtrip(&mut stream, b"\n{\"type\":\"list_sessions\"}\n").await;
        assert_eq!(response, DaemonMessage::session_list(Vec::new()));

        cancel.cancel();
        server.await.unwrap();
    }
}
