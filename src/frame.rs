//! Encoded frame types
//!
//! A [`Frame`] is produced once by the capture worker and handed to the
//! broadcaster. It is never mutated after encoding; cloning only bumps the
//! reference count of the inner `Bytes`.

use std::time::Instant;

use bytes::Bytes;

/// One encoded unit of image data
#[derive(Debug, Clone)]
pub struct Frame {
    /// Producer-assigned sequence number, starting at 1
    pub seq: u64,
    /// Encoded payload (zero-copy via reference counting)
    pub data: Bytes,
    /// When the raw frame was read from the source
    pub captured_at: Instant,
}

impl Frame {
    /// Create a frame stamped with the current instant
    pub fn new(seq: u64, data: Bytes) -> Self {
        Self {
            seq,
            data,
            captured_at: Instant::now(),
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Item crossing the capture → broadcast channel
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A freshly encoded frame
    Frame(Frame),
    /// The source reported it has no more frames
    Exhausted,
}
