//! Datagram companion listener.
//!
//! Binds UDP on exactly the address the primary listener bound, so clients
//! can reach the daemon over either transport on one `host:port`. Each
//! datagram carries one request and is answered with one datagram sent back
//! to its source address.
//!
//! At most [`MAX_IN_FLIGHT`] datagrams are handled at once; datagrams that
//! arrive beyond that are dropped unanswered.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use emu_protocol::{decode_request, encode_response, DaemonMessage, FrameError, MAX_DATAGRAM_SIZE};

use super::{
    ListenerError, ListenerHandle, ListenerKind, ListenerState, PrimaryListener, StartupError,
    StateReporter,
};
use crate::backend::SharedBackend;
use crate::dispatch::{dispatch, frame_error_response, MESSAGE_TOO_LARGE};

/// Receive buffer size; large enough for any UDP payload.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Datagrams being handled concurrently before new ones are dropped.
pub const MAX_IN_FLIGHT: usize = 256;

/// UDP listener sharing the primary listener's address and backend.
pub struct DatagramListener {
    local_addr: SocketAddr,
    backend: SharedBackend,
    in_flight: Arc<Semaphore>,
}

impl DatagramListener {
    /// Prepares a datagram listener on the primary's bound address.
    ///
    /// Nothing is bound until the listener runs.
    pub fn derive_on(primary: &PrimaryListener) -> Self {
        Self {
            local_addr: primary.local_addr(),
            backend: primary.backend(),
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        }
    }

    /// The address this listener will bind.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns the listener on a background task.
    ///
    /// A bind or receive failure stops this listener only; it is logged and
    /// reported through the handle.
    pub fn spawn(self, cancel: CancellationToken) -> ListenerHandle {
        ListenerHandle::spawn(ListenerKind::Datagram, move |reporter| async move {
            match self.run(cancel, &reporter).await {
                Ok(()) => reporter.set(ListenerState::Terminated),
                Err(e) => {
                    let failure = StartupError::from(e);
                    error!(
                        listener = %reporter.kind(),
                        error = %failure,
                        "Datagram listener failed, continuing without it"
                    );
                    reporter.set(ListenerState::Failed(failure.listener_error().to_string()));
                }
            }
        })
    }

    async fn run(
        self,
        cancel: CancellationToken,
        reporter: &StateReporter,
    ) -> Result<(), ListenerError> {
        let kind = ListenerKind::Datagram;
        let socket = UdpSocket::bind(self.local_addr)
            .await
            .map_err(|source| ListenerError::Bind {
                kind,
                address: self.local_addr.to_string(),
                source,
            })?;
        let socket = Arc::new(socket);

        reporter.set(ListenerState::Bound(self.local_addr));
        info!(listener = %kind, local_addr = %self.local_addr, "Datagram listener bound");

        reporter.set(ListenerState::Serving(self.local_addr));
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Datagram listener shutdown requested");
                    break;
                }

                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, source)) => {
                            let datagram = buf.get(..len).unwrap_or_default().to_vec();
                            self.handle_datagram(Arc::clone(&socket), datagram, source);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to receive datagram");
                        }
                    }
                }
            }
        }

        info!(local_addr = %self.local_addr, "Datagram listener stopped");
        Ok(())
    }

    fn handle_datagram(&self, socket: Arc<UdpSocket>, datagram: Vec<u8>, source: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.in_flight).try_acquire_owned() else {
            warn!(
                source = %source,
                max = MAX_IN_FLIGHT,
                "Too many datagrams in flight, dropping"
            );
            return;
        };
        let backend = Arc::clone(&self.backend);

        tokio::spawn(async move {
            let _permit = permit;
            let response = match decode_request(&datagram, MAX_DATAGRAM_SIZE) {
                Ok(request) => dispatch(backend.as_ref(), request).await,
                Err(FrameError::Empty) => return,
                Err(e) => {
                    debug!(source = %source, error = %e, "Undecodable datagram");
                    frame_error_response(&e)
                }
            };

            let frame = match encode_reply(&response) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "Failed to encode datagram reply");
                    return;
                }
            };

            if let Err(e) = socket.send_to(&frame, source).await {
                debug!(source = %source, error = %e, "Failed to send datagram reply");
            }
        });
    }
}

/// Encodes a reply, substituting an error if it does not fit in a datagram.
fn encode_reply(response: &DaemonMessage) -> Result<Vec<u8>, FrameError> {
    let frame = encode_response(response)?;
    if frame.len() <= MAX_DATAGRAM_SIZE {
        return Ok(frame);
    }

    let err = FrameError::TooLarge {
        size: frame.len(),
        max: MAX_DATAGRAM_SIZE,
    };
    encode_response(&DaemonMessage::error_with_code(
        &format!("response too large for a datagram: {err}"),
        MESSAGE_TOO_LARGE,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{spawn_backend, BackendOptions};
    use crate::listener::ListenAddress;
    use emu_protocol::ClientMessage;
    use std::time::Duration;

    async fn request(socket: &UdpSocket, target: SocketAddr, payload: &[u8]) -> DaemonMessage {
        socket.send_to(payload, target).await.unwrap();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, target);
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn test_derive_on_reuses_primary_address() {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let primary = PrimaryListener::bind(&ListenAddress::new("127.0.0.1", 0), backend)
            .await
            .unwrap();

        let datagram = DatagramListener::derive_on(&primary);
        assert_eq!(datagram.local_addr(), primary.local_addr());
        assert!(Arc::ptr_eq(&datagram.backend, &primary.backend()));
    }

    #[tokio::test]
    async fn test_answers_requests_on_primary_port() {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let primary = PrimaryListener::bind(&ListenAddress::new("127.0.0.1", 0), backend)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let mut handle = DatagramListener::derive_on(&primary).spawn(cancel.clone());
        let bound = handle.wait_serving().await.unwrap();
        assert_eq!(bound, primary.local_addr());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let ping = serde_json::to_vec(&ClientMessage::ping(11)).unwrap();
        assert_eq!(request(&client, bound, &ping).await, DaemonMessage::pong(11));

        let response = request(&client, bound, b"{broken").await;
        assert!(response.is_failure());

        let create = serde_json::to_vec(&ClientMessage::create_session(None)).unwrap();
        assert!(matches!(
            request(&client, bound, &create).await,
            DaemonMessage::Session { .. }
        ));

        cancel.cancel();
        assert!(handle.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_datagrams_over_in_flight_limit_are_dropped() {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let primary = PrimaryListener::bind(&ListenAddress::new("127.0.0.1", 0), backend)
            .await
            .unwrap();
        let in_flight = Arc::new(Semaphore::new(0));
        let listener = DatagramListener {
            in_flight: Arc::clone(&in_flight),
            ..DatagramListener::derive_on(&primary)
        };
        let cancel = CancellationToken::new();
        let mut handle = listener.spawn(cancel.clone());
        let bound = handle.wait_serving().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ping = serde_json::to_vec(&ClientMessage::ping(1)).unwrap();
        client.send_to(&ping, bound).await.unwrap();
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        assert!(
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf))
                .await
                .is_err(),
            "no reply expected while saturated"
        );

        in_flight.add_permits(1);
        assert_eq!(request(&client, bound, &ping).await, DaemonMessage::pong(1));

        cancel.cancel();
        assert!(handle.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let primary = PrimaryListener::bind(&ListenAddress::new("127.0.0.1", 0), backend)
            .await
            .unwrap();
        let occupied = std::net::UdpSocket::bind(primary.local_addr()).unwrap();

        let mut handle = DatagramListener::derive_on(&primary).spawn(CancellationToken::new());
        match handle.wait_serving().await {
            Err(ListenerState::Failed(reason)) => assert!(reason.contains("datagram")),
            other => panic!("Expected Failed, got {other:?}"),
        }
        drop(occupied);
    }

    #[test]
    fn test_oversized_reply_is_replaced() {
        let huge = DaemonMessage::error(&"x".repeat(MAX_DATAGRAM_SIZE));
        let frame = encode_reply(&huge).unwrap();
        assert!(frame.len() <= MAX_DATAGRAM_SIZE);
        let reply: DaemonMessage = serde_json::from_slice(&frame).unwrap();
        assert!(matches!(
            reply,
            DaemonMessage::Error { code: Some(ref c), .. } if c == MESSAGE_TOO_LARGE
        ));
    }
}
