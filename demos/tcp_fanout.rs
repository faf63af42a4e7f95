//! Test-pattern broadcast over raw TCP
//!
//! Run with: cargo run --example tcp_fanout [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example tcp_fanout                    # binds to 0.0.0.0:7860
//!   cargo run --example tcp_fanout 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! Each client receives frames as `u32 big-endian length + payload`. A
//! synthetic gradient source stands in for a camera and a run-length
//! encoder stands in for JPEG. Connect a few clients, e.g.:
//!
//!   nc localhost 7860 | xxd | head
//!
//! Ctrl+C closes every client and releases the source.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use framecast::{
    BroadcastServer, ChannelConnection, ConnectionRegistry, Encoder, FrameSource, Outbound,
    ServerConfig,
};

const WIDTH: usize = 64;
const HEIGHT: usize = 48;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Grayscale gradient that scrolls one pixel per frame
struct TestPattern {
    offset: usize,
}

impl FrameSource for TestPattern {
    type Frame = Vec<u8>;

    fn read(&mut self) -> Option<Vec<u8>> {
        std::thread::sleep(FRAME_INTERVAL);
        self.offset = (self.offset + 1) % WIDTH;

        let mut frame = Vec::with_capacity(WIDTH * HEIGHT);
        for _ in 0..HEIGHT {
            for x in 0..WIDTH {
                frame.push((((x + self.offset) % WIDTH) * 255 / WIDTH) as u8);
            }
        }
        Some(frame)
    }

    fn release(&mut self) {
        println!("Test pattern released");
    }
}

/// Byte-oriented run-length encoding: `(count, value)` pairs
struct RunLength;

impl Encoder<Vec<u8>> for RunLength {
    type Error = Infallible;

    fn encode(&mut self, frame: &Vec<u8>) -> Result<Bytes, Infallible> {
        let mut out = BytesMut::with_capacity(frame.len() / 2);
        let mut iter = frame.iter().copied().peekable();

        while let Some(value) = iter.next() {
            let mut count: u8 = 1;
            while count < u8::MAX && iter.peek() == Some(&value) {
                iter.next();
                count += 1;
            }
            out.put_u8(count);
            out.put_u8(value);
        }

        Ok(out.freeze())
    }
}

async fn serve_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    registry: Arc<ConnectionRegistry<ChannelConnection>>,
) {
    let (conn, mut outbound) = ChannelConnection::new(2);
    let id = match registry.register(conn).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Rejecting client");
            return;
        }
    };

    let (mut reader, mut writer) = socket.split();
    let mut inbound = [0u8; 512];

    loop {
        tokio::select! {
            msg = outbound.recv() => match msg {
                Some(Outbound::Frame(frame)) => {
                    if writer.write_u32(frame.len() as u32).await.is_err()
                        || writer.write_all(&frame).await.is_err()
                    {
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    tracing::info!(peer = %peer, reason = %reason, "Closing client");
                    let _ = writer.shutdown().await;
                    break;
                }
                None => break,
            },
            // Inbound traffic is ignored; EOF means the client left
            read = reader.read(&mut inbound) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    registry.unregister(id).await;
    tracing::info!(peer = %peer, connection = %id, "Client disconnected");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 7860)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framecast=debug".parse()?)
                .add_directive("tcp_fanout=debug".parse()?),
        )
        .init();

    let config = ServerConfig::default().send_timeout(Duration::from_millis(500));
    let server = Arc::new(BroadcastServer::<ChannelConnection>::new(config));

    let listener = TcpListener::bind(bind_addr).await?;
    println!("Broadcasting {}x{} test pattern on {}", WIDTH, HEIGHT, bind_addr);

    let registry = Arc::clone(server.registry());
    let accept = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    tracing::info!(peer = %peer, "Client connected");
                    tokio::spawn(serve_client(socket, peer, Arc::clone(&registry)));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    });

    let source = TestPattern { offset: 0 };

    server
        .run_until(source, RunLength, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    accept.abort();

    let stats = server.stats();
    println!(
        "Frames: captured={} broadcast={} skipped={} deliveries={} bytes={}",
        stats.frames_captured,
        stats.frames_broadcast,
        stats.frames_skipped,
        stats.deliveries,
        stats.bytes_delivered,
    );

    Ok(())
}
