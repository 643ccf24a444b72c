// src/core/protocol/resp_frame.rs

//! RESP frames and the `tokio_util` codec that moves them on and off the wire.

use crate::core::ConnError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub(crate) const CRLF: &[u8] = b"\r\n";

// Limits on what a single frame may claim, checked before any allocation.
const MAX_ARRAY_ELEMENTS: i64 = 1024 * 1024;
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
const MAX_NESTING_DEPTH: usize = 64;

/// One RESP2 value as exchanged between client and server.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    pub fn ok() -> Self {
        RespFrame::SimpleString("OK".to_string())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespFrame::BulkString(data.into())
    }

    /// Appends the wire form of this frame to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            RespFrame::SimpleString(s) => write_line(dst, b'+', s.as_bytes()),
            RespFrame::Error(s) => write_line(dst, b'-', s.as_bytes()),
            RespFrame::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                write_line(dst, b':', buf.format(*i).as_bytes());
            }
            RespFrame::BulkString(data) => {
                let mut buf = itoa::Buffer::new();
                write_line(dst, b'$', buf.format(data.len()).as_bytes());
                dst.extend_from_slice(data);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(items) => {
                let mut buf = itoa::Buffer::new();
                write_line(dst, b'*', buf.format(items.len()).as_bytes());
                for item in items {
                    item.write_to(dst);
                }
            }
        }
    }

    /// Encodes the frame into a standalone buffer, ready for `Connection::reply`.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.write_to(&mut dst);
        dst.freeze()
    }
}

fn write_line(dst: &mut BytesMut, marker: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.extend_from_slice(&[marker]);
    dst.extend_from_slice(body);
    dst.extend_from_slice(CRLF);
}

/// Codec for `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = ConnError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = ConnError;

    /// Decodes one frame, leaving `src` untouched when the frame is not yet complete.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut cursor = &src[..];
        match decode_frame(&mut cursor, 0) {
            Ok(frame) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(ConnError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Parses a single frame from the front of `bytes`, advancing it past the frame.
fn decode_frame(bytes: &mut &[u8], depth: usize) -> Result<RespFrame, ConnError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ConnError::Protocol("nesting too deep".to_string()));
    }
    let Some((&marker, rest)) = bytes.split_first() else {
        return Err(ConnError::IncompleteData);
    };
    *bytes = rest;

    match marker {
        b'+' => Ok(RespFrame::SimpleString(
            std::str::from_utf8(take_line(bytes)?)?.to_string(),
        )),
        b'-' => Ok(RespFrame::Error(
            std::str::from_utf8(take_line(bytes)?)?.to_string(),
        )),
        b':' => Ok(RespFrame::Integer(parse_length(take_line(bytes)?)?)),
        b'$' => {
            let len = parse_length(take_line(bytes)?)?;
            if len == -1 {
                return Ok(RespFrame::Null);
            }
            if !(0..=MAX_BULK_LEN).contains(&len) {
                return Err(ConnError::Protocol("invalid bulk length".to_string()));
            }
            let len = len as usize;
            if bytes.len() < len + CRLF.len() {
                return Err(ConnError::IncompleteData);
            }
            if &bytes[len..len + CRLF.len()] != CRLF {
                return Err(ConnError::Protocol(
                    "bulk string is not terminated by CRLF".to_string(),
                ));
            }
            let data = Bytes::copy_from_slice(&bytes[..len]);
            *bytes = &bytes[len + CRLF.len()..];
            Ok(RespFrame::BulkString(data))
        }
        b'*' => {
            let count = parse_length(take_line(bytes)?)?;
            if count == -1 {
                return Ok(RespFrame::NullArray);
            }
            if !(0..=MAX_ARRAY_ELEMENTS).contains(&count) {
                return Err(ConnError::Protocol("invalid multibulk length".to_string()));
            }
            // Cap the preallocation; the count is client-controlled.
            let mut items = Vec::with_capacity((count as usize).min(64));
            for _ in 0..count {
                items.push(decode_frame(bytes, depth + 1)?);
            }
            Ok(RespFrame::Array(items))
        }
        other => Err(ConnError::Protocol(format!(
            "unexpected type byte '{}'",
            other.escape_ascii()
        ))),
    }
}

/// Returns the bytes up to the next CRLF and advances past it.
pub(crate) fn take_line<'a>(bytes: &mut &'a [u8]) -> Result<&'a [u8], ConnError> {
    let pos = bytes
        .windows(CRLF.len())
        .position(|w| w == CRLF)
        .ok_or(ConnError::IncompleteData)?;
    let line = &bytes[..pos];
    *bytes = &bytes[pos + CRLF.len()..];
    Ok(line)
}

fn parse_length(line: &[u8]) -> Result<i64, ConnError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ConnError::Protocol("invalid integer".to_string()))
}
