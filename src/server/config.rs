//! Server configuration

use std::time::Duration;

use crate::broadcast::DEFAULT_MAX_CONSECUTIVE_TIMEOUTS;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Capacity of the capture → broadcast frame queue (at least 1)
    ///
    /// When the queue is full the newest frame is skipped so capture never
    /// waits on client I/O. The capture thread only holds the sending half
    /// and cannot evict queued frames, so a lagging broadcaster delivers
    /// frames up to this many frame intervals old. Keep it small for live
    /// feeds; 1 gives the freshest picture at the cost of more skips.
    pub frame_queue_capacity: usize,

    /// Per-connection bound on delivering one frame
    pub send_timeout: Duration,

    /// Timed-out sends in a row after which a connection is closed (at least 1)
    pub max_consecutive_timeouts: u32,

    /// Per-connection bound on closing at shutdown
    pub close_timeout: Duration,

    /// Bound on waiting for the capture thread to stop during shutdown
    pub shutdown_timeout: Duration,

    /// Name of the capture thread
    pub capture_thread_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: 4,
            send_timeout: Duration::from_secs(2),
            max_consecutive_timeouts: DEFAULT_MAX_CONSECUTIVE_TIMEOUTS,
            close_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(5),
            capture_thread_name: "frame-capture".to_string(),
        }
    }
}

impl ServerConfig {
    /// Set the frame queue capacity
    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = capacity.max(1);
        self
    }

    /// Set the per-frame send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set how many timed-out sends in a row close a connection
    pub fn max_consecutive_timeouts(mut self, limit: u32) -> Self {
        self.max_consecutive_timeouts = limit.max(1);
        self
    }

    /// Set the per-connection close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the capture shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the capture thread name
    pub fn capture_thread_name(mut self, name: impl Into<String>) -> Self {
        self.capture_thread_name = name.into();
        self
    }
}
