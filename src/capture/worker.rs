//! Capture worker
//!
//! Runs the read → encode → hand-off loop on its own OS thread so a slow
//! device read never delays client I/O, and client I/O never blocks a read.
//!
//! ```text
//!   capture thread                          tokio runtime
//!   ──────────────                          ─────────────
//!   loop {
//!     cancelled? ──► stop
//!     source.read() ──None──► Exhausted ──┐
//!     encoder.encode() ──Err──► drop      │
//!     tx.try_send(Frame) ──Full──► skip   ├──► mpsc ──► Broadcaster
//!   }                                     │
//!   source.release()  (exactly once)      │
//!   done_tx.send(exit) ───────────────────┴──► CaptureHandle::stopped()
//! ```

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::frame::{CaptureEvent, Frame};
use crate::stats::BroadcastStats;

use super::{Encoder, FrameSource};

/// State of the capture worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Reading frames
    Running,
    /// Cancellation observed, releasing the source
    Cancelled,
    /// Source released, thread finished (terminal)
    Stopped,
}

impl CaptureState {
    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Running => 0,
            CaptureState::Cancelled => 1,
            CaptureState::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureState::Running,
            1 => CaptureState::Cancelled,
            _ => CaptureState::Stopped,
        }
    }
}

/// Why the capture worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    /// The source reported no more frames
    Exhausted,
    /// Cancellation was signalled
    Cancelled,
    /// The frame receiver went away
    ReceiverClosed,
    /// The loop panicked (source or encoder); the source was still released
    Aborted,
}

/// Releases the source exactly once and publishes `Stopped`, including
/// while unwinding from a panic in `read` or `encode`.
struct SourceGuard<S: FrameSource> {
    source: S,
    released: bool,
    state: Arc<AtomicU8>,
}

impl<S: FrameSource> SourceGuard<S> {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.source.release();
            tracing::debug!("Capture source released");
        }
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.release();
        self.state
            .store(CaptureState::Stopped.as_u8(), Ordering::Release);
    }
}

/// The capture loop, before it is moved onto its thread
pub struct CaptureLoop<S: FrameSource, E> {
    source: SourceGuard<S>,
    encoder: E,
    tx: mpsc::Sender<CaptureEvent>,
    cancel: CancellationToken,
    stats: Arc<BroadcastStats>,
}

impl<S, E> CaptureLoop<S, E>
where
    S: FrameSource,
    E: Encoder<S::Frame>,
{
    /// Build a capture loop feeding `tx`
    pub fn new(
        source: S,
        encoder: E,
        tx: mpsc::Sender<CaptureEvent>,
        cancel: CancellationToken,
        stats: Arc<BroadcastStats>,
    ) -> Self {
        Self {
            source: SourceGuard {
                source,
                released: false,
                state: Arc::new(AtomicU8::new(CaptureState::Running.as_u8())),
            },
            encoder,
            tx,
            cancel,
            stats,
        }
    }

    /// Start the loop on a named OS thread
    ///
    /// If the thread cannot be spawned the source is released before the
    /// error is returned.
    pub fn spawn(self, thread_name: &str) -> io::Result<CaptureHandle> {
        let state = Arc::clone(&self.source.state);
        let (done_tx, done_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let exit = self.run();
                let _ = done_tx.send(exit);
            })?;

        Ok(CaptureHandle {
            state,
            done: done_rx,
        })
    }

    /// Run the loop on the current thread until it stops
    ///
    /// Only ever called on the thread started by [`spawn`](Self::spawn):
    /// the exhaustion hand-off uses `blocking_send`, which panics inside a
    /// Tokio runtime.
    fn run(mut self) -> CaptureExit {
        tracing::info!("Capture loop started");

        let mut seq = 0u64;

        let exit = loop {
            if self.cancel.is_cancelled() {
                break CaptureExit::Cancelled;
            }

            let raw = match self.source.source.read() {
                Some(raw) => raw,
                None => break CaptureExit::Exhausted,
            };

            // Cancellation raced with the read: the frame is discarded
            if self.cancel.is_cancelled() {
                break CaptureExit::Cancelled;
            }

            self.stats.record_captured();

            let data = match self.encoder.encode(&raw) {
                Ok(data) => data,
                Err(e) => {
                    self.stats.record_encode_failure();
                    tracing::warn!(error = %e, "Frame encode failed, dropping frame");
                    continue;
                }
            };

            seq += 1;
            let frame = Frame::new(seq, data);

            match self.tx.try_send(CaptureEvent::Frame(frame)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.stats.record_skipped();
                    tracing::debug!(seq = seq, "Broadcaster behind, frame skipped");
                }
                Err(TrySendError::Closed(_)) => break CaptureExit::ReceiverClosed,
            }
        };

        if exit == CaptureExit::Cancelled {
            self.source
                .state
                .store(CaptureState::Cancelled.as_u8(), Ordering::Release);
        }

        self.source.release();

        if exit == CaptureExit::Exhausted {
            tracing::info!(frames = seq, "Capture source exhausted");
            // Err only if the broadcaster is already gone
            let _ = self.tx.blocking_send(CaptureEvent::Exhausted);
        }

        tracing::info!(exit = ?exit, frames = seq, "Capture loop stopped");

        exit
    }
}

/// Handle to a running capture worker
#[derive(Debug)]
pub struct CaptureHandle {
    state: Arc<AtomicU8>,
    done: oneshot::Receiver<CaptureExit>,
}

impl CaptureHandle {
    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Shared view of the worker state that outlives this handle
    pub(crate) fn state_cell(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.state)
    }

    /// Wait for the worker to finish
    ///
    /// The source has been released by the time this returns.
    pub async fn stopped(self) -> CaptureExit {
        self.done.await.unwrap_or(CaptureExit::Aborted)
    }
}

pub(crate) fn load_state(cell: &AtomicU8) -> CaptureState {
    CaptureState::from_u8(cell.load(Ordering::Acquire))
}
