//! Frame capture
//!
//! The capture side depends on two narrow capabilities:
//! - [`FrameSource`]: the device driver, which may block on hardware I/O
//! - [`Encoder`]: turns a raw frame into a compact payload (JPEG, ...)
//!
//! [`CaptureLoop`] drives both on a dedicated thread and hands encoded
//! frames to the broadcaster over a bounded channel.

pub mod worker;

use bytes::Bytes;

pub use worker::{CaptureExit, CaptureHandle, CaptureLoop, CaptureState};

/// A device producing raw frames on demand
pub trait FrameSource: Send + 'static {
    /// Raw frame type produced by the device
    type Frame;

    /// Read the next frame, blocking until one is available
    ///
    /// `None` means the device is exhausted or unavailable. This is a
    /// normal terminal condition, not a fault.
    fn read(&mut self) -> Option<Self::Frame>;

    /// Release the device
    ///
    /// Called exactly once by the capture loop, on every exit path.
    fn release(&mut self);
}

/// Transforms a raw frame into an encoded payload
pub trait Encoder<F>: Send + 'static {
    type Error: std::fmt::Display;

    /// Encode one frame. A failure drops only this frame.
    fn encode(&mut self, frame: &F) -> Result<Bytes, Self::Error>;
}

/// Encoder for sources that already produce encoded bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEncoder;

impl Encoder<Bytes> for IdentityEncoder {
    type Error = std::convert::Infallible;

    fn encode(&mut self, frame: &Bytes) -> Result<Bytes, Self::Error> {
        Ok(frame.clone())
    }
}

impl Encoder<Vec<u8>> for IdentityEncoder {
    type Error = std::convert::Infallible;

    fn encode(&mut self, frame: &Vec<u8>) -> Result<Bytes, Self::Error> {
        Ok(Bytes::copy_from_slice(frame))
    }
}
