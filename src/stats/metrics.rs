//! Statistics for the capture and broadcast pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Pipeline-wide counters
///
/// Updated lock-free from the capture thread and the broadcast task.
#[derive(Debug, Default)]
pub struct BroadcastStats {
    frames_captured: AtomicU64,
    encode_failures: AtomicU64,
    frames_skipped: AtomicU64,
    frames_broadcast: AtomicU64,
    deliveries: AtomicU64,
    bytes_delivered: AtomicU64,
    send_failures: AtomicU64,
    send_timeouts: AtomicU64,
}

impl BroadcastStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_broadcast(&self) {
        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self, bytes: usize) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        self.bytes_delivered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_timeout(&self) {
        self.send_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_broadcast: self.frames_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            bytes_delivered: self.bytes_delivered.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BroadcastStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Raw frames read from the source
    pub frames_captured: u64,
    /// Frames dropped because the encoder failed
    pub encode_failures: u64,
    /// Encoded frames dropped because the broadcaster was behind
    pub frames_skipped: u64,
    /// Frames handed to the broadcaster
    pub frames_broadcast: u64,
    /// Successful per-connection sends
    pub deliveries: u64,
    /// Payload bytes across all successful sends
    pub bytes_delivered: u64,
    /// Sends that failed and closed their connection
    pub send_failures: u64,
    /// Sends that exceeded the send timeout (frame dropped for that connection)
    pub send_timeouts: u64,
}

impl StatsSnapshot {
    /// Outbound bitrate in bits per second over `elapsed`
    pub fn bitrate(&self, elapsed: Duration) -> u64 {
        let secs = elapsed.as_secs();
        if secs > 0 {
            (self.bytes_delivered * 8) / secs
        } else {
            0
        }
    }

    /// Broadcast framerate over `elapsed`
    pub fn framerate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_broadcast as f64 / secs
        } else {
            0.0
        }
    }
}
