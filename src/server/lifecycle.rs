//! Lifecycle controller
//!
//! Owns the process-wide broadcast state (registry, stats, background
//! workers) and moves it through
//! `NotStarted → Running → ShuttingDown → Stopped`.
//!
//! Shutdown order:
//! 1. signal cancellation to the capture thread and the broadcast task
//! 2. wait for the capture thread to report it released the source
//!    (bounded by `shutdown_timeout`)
//! 3. close every connection with "going away" / "Server shutdown"

use std::future::Future;
use std::sync::atomic::AtomicU8;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::capture::worker::load_state;
use crate::capture::{CaptureHandle, CaptureLoop, CaptureState, Encoder, FrameSource};
use crate::error::{Error, Result};
use crate::registry::{CloseReason, Connection, ConnectionRegistry};
use crate::stats::{BroadcastStats, StatsSnapshot};

use super::config::ServerConfig;

/// Lifecycle state of the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, capture not started
    NotStarted,
    /// Capture and broadcast running (capture may have stopped on exhaustion)
    Running,
    /// Stop in progress
    ShuttingDown,
    /// Terminal
    Stopped,
}

struct Workers {
    capture: CaptureHandle,
    pump: JoinHandle<()>,
}

/// Live-frame broadcast server
///
/// The transport layer registers accepted connections through
/// [`registry`](Self::registry); the server owns capture, fan-out, and
/// shutdown. Dropping a running server cancels the capture thread, which
/// then releases the source.
pub struct BroadcastServer<C: Connection> {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry<C>>,
    stats: Arc<BroadcastStats>,
    state: watch::Sender<LifecycleState>,
    workers: Mutex<Option<Workers>>,
    capture_state: OnceLock<Arc<AtomicU8>>,
    cancel: CancellationToken,
}

impl<C: Connection> BroadcastServer<C> {
    /// Create a server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::with_close_timeout(config.close_timeout));
        let (state, _) = watch::channel(LifecycleState::NotStarted);

        Self {
            config,
            registry,
            stats: Arc::new(BroadcastStats::new()),
            state,
            workers: Mutex::new(None),
            capture_state: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Registry the transport layer registers connections with
    pub fn registry(&self) -> &Arc<ConnectionRegistry<C>> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// State of the capture thread, `None` before start
    pub fn capture_state(&self) -> Option<CaptureState> {
        self.capture_state.get().map(|cell| load_state(cell))
    }

    /// Current pipeline counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Start capturing from `source` and broadcasting
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`Error::InvalidState`] unless the server is `NotStarted`; the
    /// source is released on every failure path.
    pub fn start<S, E>(&self, source: S, encoder: E) -> Result<()>
    where
        S: FrameSource,
        E: Encoder<S::Frame>,
    {
        let mut workers = self.lock_workers();

        let state = self.state();
        if state != LifecycleState::NotStarted {
            let mut source = source;
            source.release();
            return Err(Error::InvalidState { state });
        }

        let (tx, rx) = mpsc::channel(self.config.frame_queue_capacity.max(1));

        let capture = CaptureLoop::new(
            source,
            encoder,
            tx,
            self.cancel.clone(),
            Arc::clone(&self.stats),
        )
        .spawn(&self.config.capture_thread_name)?;

        let _ = self.capture_state.set(capture.state_cell());

        let broadcaster = Broadcaster::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            self.config.send_timeout,
        )
        .max_consecutive_timeouts(self.config.max_consecutive_timeouts);
        let pump = tokio::spawn(broadcaster.run(rx, self.cancel.clone()));

        *workers = Some(Workers { capture, pump });
        self.state.send_replace(LifecycleState::Running);

        tracing::info!(
            queue_capacity = self.config.frame_queue_capacity,
            send_timeout_ms = self.config.send_timeout.as_millis() as u64,
            "Broadcast server started"
        );

        Ok(())
    }

    /// Stop the server
    ///
    /// A no-op if a stop is already in progress or finished.
    pub async fn stop(&self) {
        let workers = {
            let mut guard = self.lock_workers();
            let proceed = self.state.send_if_modified(|state| match *state {
                LifecycleState::NotStarted | LifecycleState::Running => {
                    *state = LifecycleState::ShuttingDown;
                    true
                }
                LifecycleState::ShuttingDown | LifecycleState::Stopped => false,
            });

            if !proceed {
                return;
            }

            guard.take()
        };

        tracing::info!("Broadcast server shutting down");

        self.cancel.cancel();

        if let Some(Workers { capture, pump }) = workers {
            match tokio::time::timeout(self.config.shutdown_timeout, capture.stopped()).await {
                Ok(exit) => {
                    tracing::debug!(exit = ?exit, "Capture stopped");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                        "Capture did not stop in time, source is released when the pending read returns"
                    );
                }
            }

            if let Err(e) = pump.await {
                tracing::warn!(error = %e, "Broadcast task failed");
            }
        }

        let closed = self.registry.close_all(CloseReason::server_shutdown()).await;

        self.state.send_replace(LifecycleState::Stopped);

        tracing::info!(connections = closed, "Broadcast server stopped");
    }

    /// Wait until the server reaches `Stopped`
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == LifecycleState::Stopped).await;
    }

    /// Start, run until `shutdown` resolves, then stop
    pub async fn run_until<S, E, F>(&self, source: S, encoder: E, shutdown: F) -> Result<()>
    where
        S: FrameSource,
        E: Encoder<S::Frame>,
        F: Future<Output = ()>,
    {
        self.start(source, encoder)?;

        shutdown.await;
        tracing::info!("Shutdown signal received");

        self.stop().await;
        Ok(())
    }

    fn lock_workers(&self) -> MutexGuard<'_, Option<Workers>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connection> Drop for BroadcastServer<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_test::assert_err;

    use super::*;
    use crate::registry::RegistryError;
    use crate::test_util::{
        encoded, EndlessSource, GatedSource, RecordingConnection, ScriptedSource, TagEncoder,
    };

    async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn server() -> BroadcastServer<RecordingConnection> {
        BroadcastServer::new(ServerConfig::default().send_timeout(Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_clients_connected() {
        let server = server();
        let conns: Vec<_> = (0..3).map(|_| RecordingConnection::new()).collect();
        for conn in &conns {
            server.registry().register(conn.clone()).await.unwrap();
        }

        let (source, releases) = ScriptedSource::new(vec![
            Bytes::from_static(b"F1"),
            Bytes::from_static(b"bad-F2"),
        ]);
        server.start(source, TagEncoder).unwrap();
        assert_eq!(server.state(), LifecycleState::Running);

        eventually("capture stop", || server.capture_state() == Some(CaptureState::Stopped)).await;
        eventually("delivery", || server.stats().deliveries == 3).await;

        for conn in &conns {
            assert_eq!(conn.received(), vec![encoded(b"F1")]);
            assert!(conn.close_reasons().is_empty());
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(server.registry().len().await, 3);
        assert_eq!(server.state(), LifecycleState::Running);

        let stats = server.stats();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.encode_failures, 1);
        assert_eq!(stats.deliveries, 3);

        server.stop().await;
        for conn in &conns {
            assert_eq!(conn.close_reasons(), vec![CloseReason::server_shutdown()]);
        }
        assert!(server.registry().is_empty().await);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_twice_is_stop_once() {
        let server = server();
        let conn = RecordingConnection::new();
        server.registry().register(conn.clone()).await.unwrap();

        let (source, releases) = EndlessSource::new();
        server.start(source, TagEncoder).unwrap();
        eventually("first frame", || !conn.received().is_empty()).await;

        server.stop().await;
        server.stop().await;

        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(server.capture_state(), Some(CaptureState::Stopped));
        assert!(server.registry().is_empty().await);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(conn.close_reasons().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_stops() {
        let server = server();
        let (source, releases) = EndlessSource::new();
        server.start(source, TagEncoder).unwrap();

        tokio::join!(server.stop(), server.stop(), server.wait_stopped());

        server.wait_stopped().await;
        assert_eq!(server.state(), LifecycleState::Stopped);
        eventually("release", || releases.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = server();
        let (source, first) = EndlessSource::new();
        server.start(source, TagEncoder).unwrap();

        let (source, second) = EndlessSource::new();
        let err = assert_err!(server.start(source, TagEncoder));
        assert!(matches!(
            err,
            Error::InvalidState {
                state: LifecycleState::Running
            }
        ));
        assert_eq!(second.load(Ordering::SeqCst), 1);

        server.stop().await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let server = server();
        server.stop().await;
        assert_eq!(server.state(), LifecycleState::Stopped);

        let (source, releases) = ScriptedSource::new(Vec::<Bytes>::new());
        let err = assert_err!(server.start(source, TagEncoder));
        assert!(matches!(
            err,
            Error::InvalidState {
                state: LifecycleState::Stopped
            }
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let result = server.registry().register(RecordingConnection::new()).await;
        assert_eq!(assert_err!(result), RegistryError::Closed);
    }

    #[tokio::test]
    async fn test_stop_with_blocked_read_is_bounded() {
        let config = ServerConfig::default().shutdown_timeout(Duration::from_millis(50));
        let server = BroadcastServer::<RecordingConnection>::new(config);
        let conn = RecordingConnection::new();
        server.registry().register(conn.clone()).await.unwrap();

        let (source, gate) = GatedSource::new();
        server.start(source, TagEncoder).unwrap();
        eventually("read in progress", || gate.reading.load(Ordering::SeqCst)).await;

        tokio::time::timeout(Duration::from_secs(2), server.stop())
            .await
            .unwrap();
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(conn.close_reasons().len(), 1);
        assert_eq!(gate.releases.load(Ordering::SeqCst), 0);

        // The device read finally returns; the frame is discarded and the
        // source released
        gate.tx.send(Some(Bytes::from_static(b"late"))).unwrap();
        eventually("capture stop", || server.capture_state() == Some(CaptureState::Stopped)).await;
        assert_eq!(gate.releases.load(Ordering::SeqCst), 1);
        assert!(conn.received().is_empty());
    }

    #[tokio::test]
    async fn test_stalled_client_closed_while_running() {
        let config = ServerConfig::default()
            .send_timeout(Duration::from_millis(20))
            .max_consecutive_timeouts(2);
        let server = BroadcastServer::<RecordingConnection>::new(config);
        let fast = RecordingConnection::new();
        let stalled = RecordingConnection::new().stall_send();
        server.registry().register(fast.clone()).await.unwrap();
        let stalled_id = server.registry().register(stalled.clone()).await.unwrap();

        let (source, _releases) = EndlessSource::new();
        server.start(source, TagEncoder).unwrap();

        eventually("eviction", || !stalled.close_reasons().is_empty()).await;
        assert_eq!(stalled.close_reasons(), vec![CloseReason::too_slow()]);
        assert!(!server.registry().contains(stalled_id).await);

        let seen = fast.received().len();
        eventually("more frames", || fast.received().len() > seen).await;

        server.stop().await;
        assert_eq!(stalled.close_reasons().len(), 1);
        assert_eq!(fast.close_reasons(), vec![CloseReason::server_shutdown()]);
    }

    #[tokio::test]
    async fn test_drop_running_server_releases_source() {
        let server = server();
        let (source, releases) = EndlessSource::new();
        server.start(source, TagEncoder).unwrap();

        drop(server);

        eventually("release", || releases.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_run_until_shutdown_signal() {
        let server = Arc::new(server());
        let conn = RecordingConnection::new();
        server.registry().register(conn.clone()).await.unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let (source, releases) = EndlessSource::new();

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move {
            running
                .run_until(source, TagEncoder, async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        eventually("delivery", || !conn.received().is_empty()).await;
        shutdown_tx.send(()).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(server.state(), LifecycleState::Stopped);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(conn.close_reasons(), vec![CloseReason::server_shutdown()]);
    }
}
