//! Daemon lifecycle: startup ordering, supervision and shutdown.
//!
//! ```text
//! Init → ConfigResolved → LoggingReady → PrimaryBound → ControlApiStarted
//!      → DatagramStarted → Serving → StoppedBySignal
//!                  ↘ Failed (config error or primary bind failure)
//! ```
//!
//! The primary listener is bound first, on the calling task. Only once it
//! exists are the control API and datagram listeners started, both on
//! background tasks whose handles are kept in [`BackgroundListeners`]. The
//! serve loop then runs on the calling task until the shutdown token fires.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::SharedBackend;
use crate::config::{ConfigKey, ConfigSource, EffectiveConfig};
use crate::listener::{
    ControlApiListener, DatagramListener, ListenAddress, ListenerHandle, ListenerKind,
    ListenerState, PrimaryListener, StartupError,
};
use crate::logging::LogTarget;

/// How long background listeners get to stop after shutdown before being abandoned.
pub const BACKGROUND_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    ConfigResolved,
    LoggingReady,
    PrimaryBound,
    ControlApiStarted,
    DatagramStarted,
    Serving,
    StoppedBySignal,
    Failed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ConfigResolved => "config_resolved",
            Self::LoggingReady => "logging_ready",
            Self::PrimaryBound => "primary_bound",
            Self::ControlApiStarted => "control_api_started",
            Self::DatagramStarted => "datagram_started",
            Self::Serving => "serving",
            Self::StoppedBySignal => "stopped_by_signal",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn transition(phase: &mut LifecyclePhase, next: LifecyclePhase) {
    info!(from = %phase, to = %next, "Lifecycle phase changed");
    *phase = next;
}

/// Why the serve loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT/SIGTERM, or the shutdown token was cancelled directly.
    Signal,
}

impl ShutdownReason {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Signal => 0,
        }
    }
}

// ============================================================================
// Daemon
// ============================================================================

/// A daemon that has resolved its configuration but bound nothing yet.
pub struct Daemon {
    shutdown: CancellationToken,
    phase: LifecyclePhase,
}

impl Daemon {
    /// Records the configuration and logging phases and logs what was resolved.
    pub fn configured(
        config: &EffectiveConfig,
        log_target: &LogTarget,
        shutdown: CancellationToken,
    ) -> Self {
        let mut phase = LifecyclePhase::Init;

        transition(&mut phase, LifecyclePhase::ConfigResolved);
        log_effective_config(config);

        transition(&mut phase, LifecyclePhase::LoggingReady);
        match log_target {
            LogTarget::Stderr => debug!("Logging to stderr"),
            LogTarget::File(path) => debug!(file = %path.display(), "Logging to file"),
            LogTarget::Fallback { reason } => {
                warn!(reason = %reason, "Logging configuration not applied, using stderr")
            }
        }

        Self { shutdown, phase }
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Binds the primary listener, then starts the control API and datagram
    /// listeners in that order.
    ///
    /// # Errors
    ///
    /// `StartupError::Critical` if the primary listener cannot be bound. No
    /// background listener is started in that case. Background listener
    /// failures never surface here; they are logged as degraded and show up
    /// in their [`ListenerHandle`] state.
    pub async fn start(
        mut self,
        config: &EffectiveConfig,
        backend: SharedBackend,
    ) -> Result<RunningDaemon, StartupError> {
        let address = ListenAddress::primary(config);
        let primary = match PrimaryListener::bind(&address, backend).await {
            Ok(primary) => primary,
            Err(e) => {
                let failure = StartupError::from(e);
                error!(
                    host = %address.host,
                    port = address.port,
                    error = %failure,
                    "Primary listener could not be started"
                );
                transition(&mut self.phase, LifecyclePhase::Failed);
                return Err(failure);
            }
        };
        transition(&mut self.phase, LifecyclePhase::PrimaryBound);

        let api_address = ListenAddress::control_api(config);
        info!(address = %api_address, "Starting control API listener");
        let control_api = ControlApiListener::new(api_address, primary.backend())
            .spawn(self.shutdown.child_token());
        transition(&mut self.phase, LifecyclePhase::ControlApiStarted);

        let datagram = DatagramListener::derive_on(&primary);
        info!(local_addr = %datagram.local_addr(), "Starting datagram listener");
        let datagram = datagram.spawn(self.shutdown.child_token());
        transition(&mut self.phase, LifecyclePhase::DatagramStarted);

        Ok(RunningDaemon {
            primary,
            background: BackgroundListeners {
                control_api,
                datagram,
            },
            shutdown: self.shutdown,
            phase: self.phase,
        })
    }
}

/// Handles of the listeners running on background tasks.
#[derive(Debug)]
pub struct BackgroundListeners {
    control_api: ListenerHandle,
    datagram: ListenerHandle,
}

impl BackgroundListeners {
    pub fn control_api(&mut self) -> &mut ListenerHandle {
        &mut self.control_api
    }

    pub fn datagram(&mut self) -> &mut ListenerHandle {
        &mut self.datagram
    }

    /// Latest state of each background listener.
    pub fn states(&self) -> Vec<(ListenerKind, ListenerState)> {
        vec![
            (self.control_api.kind(), self.control_api.state()),
            (self.datagram.kind(), self.datagram.state()),
        ]
    }

    /// Waits up to `grace` for each listener to stop, abandoning stragglers.
    pub async fn shutdown(self, grace: Duration) {
        for handle in [self.control_api, self.datagram] {
            let kind = handle.kind();
            if handle.shutdown(grace).await {
                debug!(listener = %kind, "Background listener stopped");
            } else {
                warn!(listener = %kind, "Background listener did not stop in time, abandoned");
            }
        }
    }
}

/// A daemon whose primary listener is bound and whose background listeners
/// have been started.
pub struct RunningDaemon {
    primary: PrimaryListener,
    background: BackgroundListeners,
    shutdown: CancellationToken,
    phase: LifecyclePhase,
}

impl RunningDaemon {
    /// Address the primary and datagram listeners use.
    pub fn local_addr(&self) -> SocketAddr {
        self.primary.local_addr()
    }

    pub fn backend(&self) -> SharedBackend {
        self.primary.backend()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn background(&mut self) -> &mut BackgroundListeners {
        &mut self.background
    }

    /// Runs the primary accept loop until shutdown is requested.
    pub async fn serve(mut self) -> ShutdownReason {
        transition(&mut self.phase, LifecyclePhase::Serving);

        self.primary.serve(self.shutdown.clone()).await;

        transition(&mut self.phase, LifecyclePhase::StoppedBySignal);
        log_background_states(&self.background);
        self.background.shutdown(BACKGROUND_GRACE).await;

        ShutdownReason::Signal
    }
}

fn log_background_states(background: &BackgroundListeners) {
    for (kind, state) in background.states() {
        match state {
            ListenerState::Failed(reason) => {
                warn!(listener = %kind, reason = %reason, "Background listener was not running")
            }
            state => debug!(listener = %kind, state = ?state, "Background listener state"),
        }
    }
}

fn log_effective_config(config: &EffectiveConfig) {
    info!(
        config_file = %config.config_file().display(),
        loaded = config.file_loaded(),
        "Configuration resolved"
    );

    for (key, value, source) in config.iter() {
        debug!(key = %key, value = %value, source = %source, "Config value");
    }
    for key in config.ignored_keys() {
        warn!(key = %key, "Ignoring unknown config key");
    }

    if config.source(ConfigKey::NumThreads) != ConfigSource::Default {
        info!(
            numthreads = config.num_threads(),
            "numthreads is informational; requests are served on the async runtime"
        );
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Cancels `shutdown` on SIGINT or SIGTERM.
pub fn spawn_signal_watcher(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => {
                error!(error = %e, "Could not install signal handlers");
            }
        }
    })
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{spawn_backend, BackendOptions};
    use std::sync::Arc;

    fn local_config(port: u16) -> EffectiveConfig {
        EffectiveConfig::defaults("/nonexistent/core.toml")
            .with_override(ConfigKey::ListenAddr, "127.0.0.1")
            .with_override(ConfigKey::Port, port.to_string())
            .with_override(ConfigKey::GrpcAddress, "127.0.0.1")
            .with_override(ConfigKey::GrpcPort, "0")
    }

    fn daemon(shutdown: &CancellationToken) -> Daemon {
        Daemon::configured(&local_config(0), &LogTarget::Stderr, shutdown.clone())
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(LifecyclePhase::StoppedBySignal.to_string(), "stopped_by_signal");
        assert_eq!(ShutdownReason::Signal.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_configured_daemon_is_logging_ready() {
        let shutdown = CancellationToken::new();
        assert_eq!(daemon(&shutdown).phase(), LifecyclePhase::LoggingReady);
    }

    #[tokio::test]
    async fn test_start_reaches_datagram_started() {
        let shutdown = CancellationToken::new();
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));

        let mut running = daemon(&shutdown)
            .start(&local_config(0), backend)
            .await
            .unwrap();
        assert_eq!(running.phase(), LifecyclePhase::DatagramStarted);

        let udp = running.background().datagram().wait_serving().await.unwrap();
        assert_eq!(udp, running.local_addr());

        shutdown.cancel();
        assert_eq!(running.serve().await, ShutdownReason::Signal);
    }

    #[tokio::test]
    async fn test_states_report_failed_control_api() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let api_port = occupied.local_addr().unwrap().port();
        let config = local_config(0).with_override(ConfigKey::GrpcPort, api_port.to_string());

        let shutdown = CancellationToken::new();
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let mut running = Daemon::configured(&config, &LogTarget::Stderr, shutdown.clone())
            .start(&config, backend)
            .await
            .unwrap();

        assert!(running.background().control_api().wait_serving().await.is_err());
        running.background().datagram().wait_serving().await.unwrap();

        let states = running.background().states();
        assert!(matches!(
            states.as_slice(),
            [
                (ListenerKind::ControlApi, ListenerState::Failed(_)),
                (ListenerKind::Datagram, ListenerState::Serving(_)),
            ]
        ));

        shutdown.cancel();
        assert_eq!(running.serve().await, ShutdownReason::Signal);
    }

    #[tokio::test]
    async fn test_primary_bind_failure_is_critical() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let shutdown = CancellationToken::new();
        let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions::default()));
        let err = daemon(&shutdown)
            .start(&local_config(port), backend)
            .await
            .err()
            .unwrap();

        assert!(err.is_critical());
        assert_eq!(err.listener_error().kind(), ListenerKind::Primary);
    }
}
