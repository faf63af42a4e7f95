//! Frame fan-out
//!
//! The [`Broadcaster`] delivers each encoded frame to every connection in a
//! registry snapshot. Sends for one frame run concurrently, one task per
//! connection, and the next frame starts only after every send of the
//! current one has finished, failed, or timed out. That keeps frames in
//! order per connection while no single client can hold up the others for
//! longer than the send timeout.
//!
//! # Backpressure
//!
//! A send that exceeds the timeout is cancelled and the frame is dropped
//! for that connection only; the connection stays registered. After
//! `max_consecutive_timeouts` dropped frames in a row the connection is
//! evicted with [`CloseReason::too_slow`], so a stalled client costs the
//! others at most that many send timeouts. Any completed send resets the
//! streak.
//!
//! A send that returns an error, or whose task panics, evicts the
//! connection with [`CloseReason::send_failed`]. Eviction removes it from
//! the registry and then calls [`Connection::close`], bounded by the
//! registry's close timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::frame::{CaptureEvent, Frame};
use crate::registry::{
    CloseReason, Connection, ConnectionEntry, ConnectionId, ConnectionRegistry, SendError,
};
use crate::stats::BroadcastStats;

/// Default number of timed-out sends in a row before a connection is evicted
pub const DEFAULT_MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

/// Outcome of broadcasting a single frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sequence number of the frame
    pub seq: u64,
    /// Connections in the snapshot
    pub recipients: usize,
    /// Sends that completed
    pub delivered: usize,
    /// Sends that timed out (frame dropped for that connection)
    pub dropped: usize,
    /// Connections removed because their send failed, they kept timing out,
    /// or they were no longer open
    pub removed: Vec<ConnectionId>,
}

enum SendOutcome {
    Delivered,
    TimedOut,
    Failed(SendError),
}

/// Delivers frames to all registered connections
pub struct Broadcaster<C> {
    registry: Arc<ConnectionRegistry<C>>,
    stats: Arc<BroadcastStats>,
    send_timeout: Duration,
    max_consecutive_timeouts: u32,
}

impl<C: Connection> Broadcaster<C> {
    pub fn new(
        registry: Arc<ConnectionRegistry<C>>,
        stats: Arc<BroadcastStats>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            stats,
            send_timeout,
            max_consecutive_timeouts: DEFAULT_MAX_CONSECUTIVE_TIMEOUTS,
        }
    }

    /// Set how many timed-out sends in a row evict a connection (at least 1)
    pub fn max_consecutive_timeouts(mut self, limit: u32) -> Self {
        self.max_consecutive_timeouts = limit.max(1);
        self
    }

    /// Deliver one frame to every connection registered right now
    ///
    /// Per-connection failures are contained here and never returned.
    pub async fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let snapshot = self.registry.snapshot().await;

        let mut report = BroadcastReport {
            seq: frame.seq,
            recipients: snapshot.len(),
            ..Default::default()
        };

        self.stats.record_broadcast();

        let mut sends = JoinSet::new();
        let mut pending: HashMap<ConnectionId, Arc<ConnectionEntry<C>>> = HashMap::new();
        let mut stale: Vec<ConnectionId> = Vec::new();
        let mut evict: Vec<(ConnectionId, CloseReason)> = Vec::new();

        for entry in snapshot {
            if !entry.is_open() {
                stale.push(entry.id());
                continue;
            }

            pending.insert(entry.id(), Arc::clone(&entry));

            let payload = frame.data.clone();
            let timeout = self.send_timeout;

            sends.spawn(async move {
                let send = entry.connection().send(payload);
                let outcome = match tokio::time::timeout(timeout, send).await {
                    Ok(Ok(())) => SendOutcome::Delivered,
                    Ok(Err(e)) => SendOutcome::Failed(e),
                    Err(_) => SendOutcome::TimedOut,
                };
                (entry.id(), outcome)
            });
        }

        while let Some(joined) = sends.join_next().await {
            let (id, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    // The entry stays in `pending` and is evicted below
                    tracing::warn!(seq = frame.seq, error = %e, "Send task failed");
                    continue;
                }
            };

            let Some(entry) = pending.remove(&id) else {
                continue;
            };

            match outcome {
                SendOutcome::Delivered => {
                    report.delivered += 1;
                    entry.reset_missed_frames();
                    self.stats.record_delivery(frame.len());
                }
                SendOutcome::TimedOut => {
                    report.dropped += 1;
                    self.stats.record_send_timeout();

                    let missed = entry.record_missed_frame();
                    if missed >= self.max_consecutive_timeouts {
                        self.stats.record_send_failure();
                        tracing::warn!(
                            connection = %id,
                            seq = frame.seq,
                            missed = missed,
                            "Connection keeps timing out, closing connection"
                        );
                        evict.push((id, CloseReason::too_slow()));
                    } else {
                        tracing::debug!(
                            connection = %id,
                            seq = frame.seq,
                            missed = missed,
                            timeout_ms = self.send_timeout.as_millis() as u64,
                            "Slow connection, frame dropped"
                        );
                    }
                }
                SendOutcome::Failed(e) => {
                    self.stats.record_send_failure();
                    tracing::warn!(
                        connection = %id,
                        seq = frame.seq,
                        error = %e,
                        "Send failed, closing connection"
                    );
                    evict.push((id, CloseReason::send_failed()));
                }
            }
        }

        // Whatever is left never reported back: its send task panicked
        for id in pending.into_keys() {
            self.stats.record_send_failure();
            evict.push((id, CloseReason::send_failed()));
        }

        for id in stale {
            self.registry.unregister(id).await;
            report.removed.push(id);
        }

        let mut evictions = JoinSet::new();
        for (id, reason) in evict {
            let registry = Arc::clone(&self.registry);
            evictions.spawn(async move {
                registry.evict(id, &reason).await;
                id
            });
        }

        while let Some(joined) = evictions.join_next().await {
            match joined {
                Ok(id) => report.removed.push(id),
                Err(e) => tracing::warn!(seq = frame.seq, error = %e, "Eviction task failed"),
            }
        }

        tracing::trace!(
            seq = frame.seq,
            recipients = report.recipients,
            delivered = report.delivered,
            dropped = report.dropped,
            removed = report.removed.len(),
            "Frame broadcast"
        );

        report
    }

    /// Pump frames from the capture channel until exhaustion, channel
    /// close, or cancellation
    pub async fn run(self, mut frames: mpsc::Receiver<CaptureEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Broadcaster cancelled");
                    break;
                }
                event = frames.recv() => event,
            };

            match event {
                Some(CaptureEvent::Frame(frame)) => {
                    self.broadcast(&frame).await;
                }
                Some(CaptureEvent::Exhausted) => {
                    tracing::info!("Capture exhausted, broadcaster idle until shutdown");
                    break;
                }
                None => {
                    tracing::debug!("Capture channel closed");
                    break;
                }
            }
        }
    }
}
