//! TCP remote service speaking the length-prefixed LiveLink frame protocol

use crate::remote::traits::RemoteService;
use async_trait::async_trait;
use bytes::Bytes;
use livelink_shared::codec::{self, Frame, FrameDecoder};
use livelink_shared::{duration_ms, ConnectionError, RemoteError};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Where and how to reach the remote service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpServiceConfig {
    /// Server address (host:port)
    pub address: String,
    /// Access token presented during the handshake
    pub token: String,
    /// Bound on a single request/response exchange
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for TcpServiceConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7880".into(),
            token: "devkey".into(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Read/write halves plus decoder state; one exchange at a time
struct Channel {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl Channel {
    async fn send(&mut self, frame: &Frame) -> Result<(), ConnectionError> {
        let encoded = codec::encode(frame)
            .map_err(|e| ConnectionError::Transient(format!("encode: {e}")))?;
        self.writer
            .write_all(&encoded)
            .await
            .map_err(|e| ConnectionError::from_io("write", &e))
    }

    async fn recv(&mut self) -> Result<Frame, ConnectionError> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(e) => return Err(ConnectionError::Transient(format!("decode: {e}"))),
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => {
                    return Err(ConnectionError::Transient("server closed connection".into()))
                }
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => return Err(ConnectionError::from_io("read", &e)),
            }
        }
    }

    async fn exchange(&mut self, frame: &Frame) -> Result<Frame, ConnectionError> {
        self.send(frame).await?;
        self.recv().await
    }
}

/// An authenticated TCP session
pub struct TcpSession {
    channel: Mutex<Channel>,
    request_timeout: Duration,
}

impl TcpSession {
    async fn exchange(&self, frame: Frame) -> Result<Frame, ConnectionError> {
        let mut channel = self.channel.lock().await;
        match timeout(self.request_timeout, channel.exchange(&frame)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(format!(
                "no reply within {}ms",
                self.request_timeout.as_millis()
            ))),
        }
    }

    /// Invoke a named remote operation
    pub async fn call(&self, operation: &str, body: Bytes) -> Result<Bytes, ConnectionError> {
        let reply = self
            .exchange(Frame::Request {
                operation: operation.to_string(),
                body,
            })
            .await?;

        match reply {
            Frame::Response { body } => Ok(body),
            Frame::Error { code, message } => Err(RemoteError::new(code, message).into()),
            other => Err(ConnectionError::Transient(format!(
                "unexpected reply to {operation}: {other:?}"
            ))),
        }
    }
}

/// TCP implementation of [`RemoteService`]
pub struct TcpRemoteService {
    config: TcpServiceConfig,
}

impl TcpRemoteService {
    pub fn new(config: TcpServiceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteService for TcpRemoteService {
    type Session = TcpSession;

    async fn open(&self) -> Result<Self::Session, ConnectionError> {
        let stream = TcpStream::connect(&self.config.address)
            .await
            .map_err(|e| ConnectionError::from_io(&self.config.address, &e))?;
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let session = TcpSession {
            channel: Mutex::new(Channel {
                reader,
                writer,
                decoder: FrameDecoder::new(),
                read_buf: vec![0u8; 4096],
            }),
            request_timeout: self.config.request_timeout,
        };

        let reply = session
            .exchange(Frame::Auth {
                token: self.config.token.clone(),
            })
            .await?;

        match reply {
            Frame::AuthOk => {
                debug!("[TCP] Authenticated with {}", self.config.address);
                Ok(session)
            }
            Frame::AuthRejected { reason } => Err(ConnectionError::Authentication(reason)),
            other => Err(ConnectionError::Transient(format!(
                "unexpected handshake reply: {other:?}"
            ))),
        }
    }

    async fn probe(&self, session: &Self::Session) -> Result<(), ConnectionError> {
        match session.exchange(Frame::Ping).await? {
            Frame::Pong => Ok(()),
            other => Err(ConnectionError::Transient(format!(
                "unexpected probe reply: {other:?}"
            ))),
        }
    }

    async fn close(&self, session: Arc<Self::Session>) {
        let mut channel = session.channel.lock().await;
        let _ = channel.writer.shutdown().await;
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
