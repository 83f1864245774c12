//! Per-client session handling for the simulator

use anyhow::Result;
use bytes::Bytes;
use livelink_shared::codec::{self, Frame, FrameDecoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Behaviour knobs shared by every client session
#[derive(Debug)]
pub struct Simulator {
    /// Token a client must present in its `Auth` frame
    pub token: String,
    /// Drop the connection instead of answering every Nth ping (0 = never)
    pub drop_ping_every: u64,
    pings: AtomicU64,
}

/// What the session loop does with an incoming frame
#[derive(Debug, PartialEq)]
pub enum Reply {
    Send(Frame),
    /// Answer, then hang up
    SendAndClose(Frame),
    /// Hang up without answering
    Drop,
}

impl Simulator {
    pub fn new(token: impl Into<String>, drop_ping_every: u64) -> Self {
        Self {
            token: token.into(),
            drop_ping_every,
            pings: AtomicU64::new(0),
        }
    }

    /// Decide the reply to `frame` for a client whose auth state is `authenticated`
    pub fn respond(&self, frame: Frame, authenticated: &mut bool) -> Reply {
        match frame {
            Frame::Auth { token } if token == self.token => {
                *authenticated = true;
                Reply::Send(Frame::AuthOk)
            }
            Frame::Auth { .. } => Reply::SendAndClose(Frame::AuthRejected {
                reason: "invalid token".into(),
            }),
            _ if !*authenticated => Reply::SendAndClose(Frame::Error {
                code: 401,
                message: "not authenticated".into(),
            }),
            Frame::Ping => {
                let n = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
                if self.drop_ping_every > 0 && n % self.drop_ping_every == 0 {
                    Reply::Drop
                } else {
                    Reply::Send(Frame::Pong)
                }
            }
            Frame::Request { operation, body } => Reply::Send(handle_request(&operation, body)),
            other => Reply::SendAndClose(Frame::Error {
                code: 400,
                message: format!("unexpected frame: {other:?}"),
            }),
        }
    }
}

fn handle_request(operation: &str, body: Bytes) -> Frame {
    match operation {
        "echo" => Frame::Response { body },
        "fail" => Frame::Error {
            code: 400,
            message: String::from_utf8_lossy(&body).into_owned(),
        },
        _ => Frame::Error {
            code: 404,
            message: format!("unknown operation: {operation}"),
        },
    }
}

/// One connected client
pub struct ClientSession {
    addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
    authenticated: bool,
}

impl ClientSession {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            addr,
            reader,
            writer,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
            authenticated: false,
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        let encoded = codec::encode(frame)?;
        self.writer.write_all(&encoded).await?;
        Ok(())
    }

    /// Read the next frame; `None` once the client is gone
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!("Decode error from {}: {}", self.addr, e);
                    return None;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!("Read error from {}: {}", self.addr, e);
                    return None;
                }
            }
        }
    }

    /// Serve frames until the client leaves or the simulator hangs up
    pub async fn run(mut self, sim: Arc<Simulator>) {
        while let Some(frame) = self.recv().await {
            debug!("{} -> {:?}", self.addr, frame);

            let mut authenticated = self.authenticated;
            let reply = sim.respond(frame, &mut authenticated);
            self.authenticated = authenticated;

            let result = match reply {
                Reply::Send(frame) => self.send(&frame).await,
                Reply::SendAndClose(frame) => {
                    let _ = self.send(&frame).await;
                    info!("Closing {} after {:?}", self.addr, frame);
                    break;
                }
                Reply::Drop => {
                    info!("Dropping {} (simulated fault)", self.addr);
                    break;
                }
            };

            if let Err(e) = result {
                warn!("Write error to {}: {}", self.addr, e);
                break;
            }
        }

        info!("Client disconnected: {}", self.addr);
    }
}
