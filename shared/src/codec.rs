//! Length-prefixed codec for the demo TCP remote service
//!
//! All frames are laid out as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ 1 byte: kind ][ N-1 bytes: body ]
//! ```
//!
//! The connection manager itself never sees these frames; only the TCP
//! `RemoteService` implementation and the simulator speak them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum frame size (1 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

const KIND_AUTH: u8 = 1;
const KIND_AUTH_OK: u8 = 2;
const KIND_AUTH_REJECTED: u8 = 3;
const KIND_PING: u8 = 4;
const KIND_PONG: u8 = 5;
const KIND_REQUEST: u8 = 6;
const KIND_RESPONSE: u8 = 7;
const KIND_ERROR: u8 = 8;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("Invalid frame length prefix: {0}")]
    InvalidLength(u32),

    #[error("Unknown frame kind: {0}")]
    UnknownKind(u8),

    #[error("Malformed {0} frame")]
    Malformed(&'static str),

    #[error("Frame body is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client presents its access token
    Auth { token: String },
    AuthOk,
    AuthRejected { reason: String },
    Ping,
    Pong,
    /// Named remote operation with an opaque body
    Request { operation: String, body: Bytes },
    Response { body: Bytes },
    /// Well-formed failure of a single operation
    Error { code: u16, message: String },
}

impl Frame {
    fn kind(&self) -> u8 {
        match self {
            Frame::Auth { .. } => KIND_AUTH,
            Frame::AuthOk => KIND_AUTH_OK,
            Frame::AuthRejected { .. } => KIND_AUTH_REJECTED,
            Frame::Ping => KIND_PING,
            Frame::Pong => KIND_PONG,
            Frame::Request { .. } => KIND_REQUEST,
            Frame::Response { .. } => KIND_RESPONSE,
            Frame::Error { .. } => KIND_ERROR,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Frame::Auth { token } => token.len(),
            Frame::AuthRejected { reason } => reason.len(),
            Frame::AuthOk | Frame::Ping | Frame::Pong => 0,
            Frame::Request { operation, body } => 2 + operation.len() + body.len(),
            Frame::Response { body } => body.len(),
            Frame::Error { message, .. } => 2 + message.len(),
        }
    }
}

/// Encode a frame into a length-prefixed byte buffer
pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame directly into a provided buffer
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), CodecError> {
    let frame_len = 1 + frame.body_len();
    if frame_len > MAX_FRAME_SIZE as usize {
        return Err(CodecError::FrameTooLarge(frame_len));
    }

    buf.reserve(4 + frame_len);
    buf.put_u32(frame_len as u32);
    buf.put_u8(frame.kind());

    match frame {
        Frame::Auth { token } => buf.put_slice(token.as_bytes()),
        Frame::AuthRejected { reason } => buf.put_slice(reason.as_bytes()),
        Frame::AuthOk | Frame::Ping | Frame::Pong => {}
        Frame::Request { operation, body } => {
            if operation.len() > u16::MAX as usize {
                return Err(CodecError::Malformed("request"));
            }
            buf.put_u16(operation.len() as u16);
            buf.put_slice(operation.as_bytes());
            buf.put_slice(body);
        }
        Frame::Response { body } => buf.put_slice(body),
        Frame::Error { code, message } => {
            buf.put_u16(*code);
            buf.put_slice(message.as_bytes());
        }
    }

    Ok(())
}

/// Try to decode a length-prefixed frame from a buffer
///
/// Returns:
/// - `Ok(Some(frame))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if frame_len == 0 || frame_len > MAX_FRAME_SIZE {
        return Err(CodecError::InvalidLength(frame_len));
    }

    let total_len = 4 + frame_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let mut body = buf.split_to(frame_len as usize);
    let kind = body.get_u8();

    let frame = match kind {
        KIND_AUTH => Frame::Auth {
            token: String::from_utf8(body.to_vec())?,
        },
        KIND_AUTH_OK => Frame::AuthOk,
        KIND_AUTH_REJECTED => Frame::AuthRejected {
            reason: String::from_utf8(body.to_vec())?,
        },
        KIND_PING => Frame::Ping,
        KIND_PONG => Frame::Pong,
        KIND_REQUEST => {
            if body.len() < 2 {
                return Err(CodecError::Malformed("request"));
            }
            let op_len = body.get_u16() as usize;
            if body.len() < op_len {
                return Err(CodecError::Malformed("request"));
            }
            let operation = String::from_utf8(body.split_to(op_len).to_vec())?;
            Frame::Request {
                operation,
                body: body.freeze(),
            }
        }
        KIND_RESPONSE => Frame::Response {
            body: body.freeze(),
        },
        KIND_ERROR => {
            if body.len() < 2 {
                return Err(CodecError::Malformed("error"));
            }
            let code = body.get_u16();
            Frame::Error {
                code,
                message: String::from_utf8(body.to_vec())?,
            }
        }
        other => return Err(CodecError::UnknownKind(other)),
    };

    Ok(Some(frame))
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Frame>, CodecError> {
        decode(&mut self.buffer)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let frame = Frame::Request {
            operation: "echo".into(),
            body: Bytes::from_static(b"hi"),
        };
        let encoded = encode(&frame).expect("encode failed");

        let len_prefix = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len_prefix as usize, encoded.len() - 4);
        assert_eq!(encoded[4], KIND_REQUEST);

        let mut buf = BytesMut::from(&encoded[..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty(), "buffer should be empty after decode");
    }

    #[test]
    fn test_partial_decode() {
        let encoded = encode(&Frame::Auth {
            token: "secret".into(),
        })
        .expect("encode failed");

        let mut buf = BytesMut::from(&encoded[..5]);
        let result = decode(&mut buf).expect("decode should not fail on partial data");
        assert!(result.is_none(), "should return None for partial data");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_frame_decoder_multiple_frames() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encode(&Frame::Ping).unwrap());
        decoder.extend(&encode(&Frame::Error {
            code: 404,
            message: "no such room".into(),
        })
        .unwrap());

        assert_eq!(decoder.decode_next().unwrap(), Some(Frame::Ping));
        assert_eq!(
            decoder.decode_next().unwrap(),
            Some(Frame::Error {
                code: 404,
                message: "no such room".into()
            })
        );
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.buffer_len(), 0);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_bytes(0, 100);

        assert!(matches!(decode(&mut buf), Err(CodecError::InvalidLength(_))));
    }

    #[test]
    fn test_unknown_kind() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(99);

        assert!(matches!(decode(&mut buf), Err(CodecError::UnknownKind(99))));
    }
}
