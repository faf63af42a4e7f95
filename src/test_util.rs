//! Scripted fakes shared by the unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};

use crate::capture::{Encoder, FrameSource};
use crate::registry::{CloseReason, Connection, SendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Ok,
    Fail,
    Stall,
    Panic,
}

/// Connection that records everything sent to it
#[derive(Clone)]
pub struct RecordingConnection {
    received: Arc<Mutex<Vec<Bytes>>>,
    closes: Arc<Mutex<Vec<CloseReason>>>,
    disconnected: Arc<AtomicBool>,
    send_stalled: Arc<AtomicBool>,
    send: Behavior,
    close: Behavior,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(Mutex::new(Vec::new())),
            disconnected: Arc::new(AtomicBool::new(false)),
            send_stalled: Arc::new(AtomicBool::new(false)),
            send: Behavior::Ok,
            close: Behavior::Ok,
        }
    }

    /// Every send returns a write error
    pub fn fail_send(mut self) -> Self {
        self.send = Behavior::Fail;
        self
    }

    /// Every send never completes, until [`set_send_stalled`](Self::set_send_stalled)
    /// turns it off
    pub fn stall_send(self) -> Self {
        self.set_send_stalled(true);
        self
    }

    pub fn set_send_stalled(&self, stalled: bool) {
        self.send_stalled.store(stalled, Ordering::SeqCst);
    }

    /// Every send panics
    pub fn panic_send(mut self) -> Self {
        self.send = Behavior::Panic;
        self
    }

    pub fn fail_close(mut self) -> Self {
        self.close = Behavior::Fail;
        self
    }

    pub fn stall_close(mut self) -> Self {
        self.close = Behavior::Stall;
        self
    }

    /// Simulate the peer going away; later sends report `Closed`
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().unwrap().clone()
    }

    pub fn close_reasons(&self) -> Vec<CloseReason> {
        self.closes.lock().unwrap().clone()
    }
}

impl Connection for RecordingConnection {
    async fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        if self.send_stalled.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        match self.send {
            Behavior::Ok => {
                self.received.lock().unwrap().push(payload);
                Ok(())
            }
            Behavior::Fail => Err(SendError::Write("connection reset".into())),
            Behavior::Stall => std::future::pending().await,
            Behavior::Panic => panic!("send crashed"),
        }
    }

    async fn close(&self, reason: &CloseReason) -> Result<(), SendError> {
        match self.close {
            Behavior::Ok => {
                self.closes.lock().unwrap().push(reason.clone());
                Ok(())
            }
            Behavior::Fail => Err(SendError::Closed),
            Behavior::Stall => std::future::pending().await,
            Behavior::Panic => panic!("close crashed"),
        }
    }
}

/// Source yielding a fixed list of frames, then exhaustion
pub struct ScriptedSource {
    frames: VecDeque<Bytes>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new<I, B>(frames: I) -> (Self, Arc<AtomicUsize>)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = Self {
            frames: frames.into_iter().map(Into::into).collect(),
            releases: Arc::clone(&releases),
        };
        (source, releases)
    }
}

impl FrameSource for ScriptedSource {
    type Frame = Bytes;

    fn read(&mut self) -> Option<Bytes> {
        self.frames.pop_front()
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Source whose every read blocks until the test opens the gate
///
/// Sending `Some(frame)` through the gate completes one read with that
/// frame; sending `None` or dropping the gate reports exhaustion.
pub struct GatedSource {
    gate: std::sync::mpsc::Receiver<Option<Bytes>>,
    reading: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
}

pub struct Gate {
    pub tx: std::sync::mpsc::Sender<Option<Bytes>>,
    pub reading: Arc<AtomicBool>,
    pub releases: Arc<AtomicUsize>,
}

impl GatedSource {
    pub fn new() -> (Self, Gate) {
        let (tx, rx) = std::sync::mpsc::channel();
        let reading = Arc::new(AtomicBool::new(false));
        let releases = Arc::new(AtomicUsize::new(0));
        let source = Self {
            gate: rx,
            reading: Arc::clone(&reading),
            releases: Arc::clone(&releases),
        };
        (source, Gate { tx, reading, releases })
    }
}

impl FrameSource for GatedSource {
    type Frame = Bytes;

    fn read(&mut self) -> Option<Bytes> {
        self.reading.store(true, Ordering::SeqCst);
        let frame = self.gate.recv().ok().flatten();
        self.reading.store(false, Ordering::SeqCst);
        frame
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Source producing a frame every millisecond until released
pub struct EndlessSource {
    releases: Arc<AtomicUsize>,
}

impl EndlessSource {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Self {
                releases: Arc::clone(&releases),
            },
            releases,
        )
    }
}

impl FrameSource for EndlessSource {
    type Frame = Bytes;

    fn read(&mut self) -> Option<Bytes> {
        std::thread::sleep(std::time::Duration::from_millis(1));
        Some(Bytes::from_static(b"tick"))
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Encoder prefixing `enc:`; raw frames starting with `bad` fail to encode
pub struct TagEncoder;

pub fn encoded(raw: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(4 + raw.len());
    out.put_slice(b"enc:");
    out.put_slice(raw);
    out.freeze()
}

impl Encoder<Bytes> for TagEncoder {
    type Error = String;

    fn encode(&mut self, frame: &Bytes) -> Result<Bytes, String> {
        if frame.starts_with(b"bad") {
            return Err(format!("cannot encode {} bytes", frame.len()));
        }
        Ok(encoded(frame))
    }
}

/// Encoder that panics on every frame
pub struct PanickingEncoder;

impl Encoder<Bytes> for PanickingEncoder {
    type Error = String;

    fn encode(&mut self, _frame: &Bytes) -> Result<Bytes, String> {
        panic!("encoder crashed");
    }
}
