//! Network listeners.
//!
//! Three listeners serve the same [`SharedBackend`](crate::backend::SharedBackend):
//!
//! ```text
//!                 ┌────────────────────┐
//! TCP  host:port ─▶  PrimaryListener   │  invoking task, fatal on bind failure
//!                 └─────────┬──────────┘
//!                           │ derive_on(&primary): same bound SocketAddr
//!                 ┌─────────▼──────────┐
//! UDP  host:port ─▶  DatagramListener  │  background task
//!                 └────────────────────┘
//!                 ┌────────────────────┐
//! HTTP api:port  ─▶ ControlApiListener │  background task
//!                 └────────────────────┘
//! ```
//!
//! Background listeners publish their progress through a [`ListenerHandle`]
//! so the lifecycle can observe binds and failures without sharing state.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Accept and receive errors are logged and the loop keeps serving

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{EffectiveConfig, DEFAULT_HOST};

pub mod api;
pub mod datagram;
pub mod primary;

pub use api::{router, ControlApiListener};
pub use datagram::DatagramListener;
pub use primary::{ConnectionError, ConnectionHandler, PrimaryListener};

// ============================================================================
// Kinds and severity
// ============================================================================

/// The three listeners the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Primary,
    Datagram,
    ControlApi,
}

/// How a listener failure affects the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The daemon cannot run; exit status 1.
    Critical,
    /// The daemon keeps serving without this listener.
    Degraded,
}

impl ListenerKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Primary => Severity::Critical,
            Self::Datagram | Self::ControlApi => Severity::Degraded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Datagram => "datagram",
            Self::ControlApi => "control-api",
        }
    }
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Addresses
// ============================================================================

/// Host and port a listener is configured for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddress {
    pub host: String,
    pub port: u16,
}

impl ListenAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address of the primary (and datagram) listener.
    ///
    /// An empty `listenaddr` means `localhost`.
    pub fn primary(config: &EffectiveConfig) -> Self {
        let host = match config.listen_addr() {
            "" => DEFAULT_HOST,
            host => host,
        };
        Self::new(host, config.port())
    }

    /// Address of the control API listener.
    pub fn control_api(config: &EffectiveConfig) -> Self {
        Self::new(config.grpc_address(), config.grpc_port())
    }

    /// Resolves the host to socket addresses, IPv4 first, otherwise in
    /// resolver order.
    ///
    /// `localhost` on a dual-stack host thus binds `127.0.0.1` rather than `::1`.
    pub async fn resolve(&self, kind: ListenerKind) -> Result<Vec<SocketAddr>, ListenerError> {
        let resolve_error = |reason: String| ListenerError::Resolve {
            kind,
            address: self.to_string(),
            reason,
        };

        let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| resolve_error(e.to_string()))?
            .collect();

        if addrs.is_empty() {
            return Err(resolve_error("no addresses found".to_string()));
        }
        ipv4_first(&mut addrs);
        Ok(addrs)
    }

    /// Resolves the host and binds the first address that accepts.
    pub(crate) async fn bind_with<T, F, Fut>(
        &self,
        kind: ListenerKind,
        mut bind: F,
    ) -> Result<T, ListenerError>
    where
        F: FnMut(SocketAddr) -> Fut,
        Fut: Future<Output = io::Result<T>>,
    {
        let mut last_error = None;
        for addr in self.resolve(kind).await? {
            match bind(addr).await {
                Ok(bound) => return Ok(bound),
                Err(e) => last_error = Some(e),
            }
        }

        Err(ListenerError::Bind {
            kind,
            address: self.to_string(),
            source: last_error
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address")),
        })
    }
}

fn ipv4_first(addrs: &mut [SocketAddr]) {
    addrs.sort_by_key(SocketAddr::is_ipv6);
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by a listener, tagged with which listener and where.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{kind} listener could not resolve {address}: {reason}")]
    Resolve {
        kind: ListenerKind,
        address: String,
        reason: String,
    },

    #[error("{kind} listener failed to bind {address}: {source}")]
    Bind {
        kind: ListenerKind,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{kind} listener could not configure its socket on {address}: {source}")]
    Descriptor {
        kind: ListenerKind,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("{kind} listener on {address} stopped: {source}")]
    Serve {
        kind: ListenerKind,
        address: String,
        #[source]
        source: io::Error,
    },
}

impl ListenerError {
    pub fn kind(&self) -> ListenerKind {
        match self {
            Self::Resolve { kind, .. }
            | Self::Bind { kind, .. }
            | Self::Descriptor { kind, .. }
            | Self::Serve { kind, .. } => *kind,
        }
    }
}

/// Outcome of bringing a listener up, classified by its severity.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("critical startup failure: {0}")]
    Critical(#[source] ListenerError),

    #[error("degraded startup: {0}")]
    Degraded(#[source] ListenerError),
}

impl StartupError {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical(_))
    }

    pub fn listener_error(&self) -> &ListenerError {
        match self {
            Self::Critical(e) | Self::Degraded(e) => e,
        }
    }
}

impl From<ListenerError> for StartupError {
    fn from(err: ListenerError) -> Self {
        match err.kind().severity() {
            Severity::Critical => Self::Critical(err),
            Severity::Degraded => Self::Degraded(err),
        }
    }
}

// ============================================================================
// Listener state and handles
// ============================================================================

/// Progress of a listener task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Bound(SocketAddr),
    Serving(SocketAddr),
    Terminated,
    Failed(String),
}

impl ListenerState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed(_))
    }
}

/// Sending side of a listener's state channel.
#[derive(Debug)]
pub struct StateReporter {
    kind: ListenerKind,
    tx: watch::Sender<ListenerState>,
}

impl StateReporter {
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    pub fn set(&self, state: ListenerState) {
        // No receiver left means nobody is watching; the listener keeps going.
        let _ = self.tx.send(state);
    }
}

/// A listener running on a background task.
#[derive(Debug)]
pub struct ListenerHandle {
    kind: ListenerKind,
    state: watch::Receiver<ListenerState>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Spawns `run` on a new task, handing it the reporter for this handle.
    pub fn spawn<F, Fut>(kind: ListenerKind, run: F) -> Self
    where
        F: FnOnce(StateReporter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, state) = watch::channel(ListenerState::Created);
        let task = tokio::spawn(run(StateReporter { kind, tx }));
        Self { kind, state, task }
    }

    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Latest reported state.
    pub fn state(&self) -> ListenerState {
        self.state.borrow().clone()
    }

    /// Waits until the listener is serving or has stopped.
    ///
    /// Returns the bound address, or the final state if it never served.
    pub async fn wait_serving(&mut self) -> Result<SocketAddr, ListenerState> {
        let settled = self
            .state
            .wait_for(|s| matches!(s, ListenerState::Serving(_)) || s.is_final())
            .await
            .map(|s| (*s).clone());

        match settled {
            Ok(ListenerState::Serving(addr)) => Ok(addr),
            Ok(other) => Err(other),
            Err(_) => Err(ListenerState::Failed("listener task ended".to_string())),
        }
    }

    /// Waits up to `grace` for the task to end, aborting it otherwise.
    ///
    /// Returns true if the task ended by itself.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => true,
            Err(_) => {
                task.abort();
                false
            }
        }
    }
}

// ============================================================================
// Descriptor flags
// ============================================================================

/// Sets `FD_CLOEXEC` on a descriptor so it is not inherited by child processes.
pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only read and write descriptor flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: as above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Returns whether `FD_CLOEXEC` is set on a descriptor.
pub fn is_cloexec(fd: RawFd) -> io::Result<bool> {
    // SAFETY: F_GETFD only reads descriptor flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & libc::FD_CLOEXEC != 0)
}
