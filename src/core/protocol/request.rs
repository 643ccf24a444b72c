// src/core/protocol/request.rs

//! Extracts client requests from the connection's input buffer.
//!
//! Clients speak either multibulk (`*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n`) or the
//! inline form typed into a terminal (`ECHO hi\r\n`). Both produce the same
//! argument vector.

use super::resp_frame::{RespFrame, RespFrameCodec};
use crate::core::ConnError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// The longest inline request accepted while still waiting for its newline.
const MAX_INLINE_LEN: usize = 64 * 1024;

/// A single request: the command name followed by its arguments.
pub type RequestArgs = Vec<Bytes>;

/// Pulls the next complete request off the front of `src`.
///
/// Returns `Ok(None)` when `src` holds only a partial request; the partial
/// bytes stay in `src` for the next read. Empty inline lines are consumed and
/// yield an empty argument vector.
pub fn next_request(src: &mut BytesMut) -> Result<Option<RequestArgs>, ConnError> {
    if src.is_empty() {
        return Ok(None);
    }
    if src[0] == b'*' {
        return match RespFrameCodec.decode(src)? {
            Some(frame) => frame_to_args(frame).map(Some),
            None => Ok(None),
        };
    }
    next_inline_request(src)
}

fn frame_to_args(frame: RespFrame) -> Result<RequestArgs, ConnError> {
    match frame {
        RespFrame::Array(items) => items
            .into_iter()
            .map(|item| match item {
                RespFrame::BulkString(b) => Ok(b),
                _ => Err(ConnError::Protocol("expected '$', got something else".to_string())),
            })
            .collect(),
        RespFrame::NullArray => Ok(Vec::new()),
        _ => Err(ConnError::Protocol("expected '*'".to_string())),
    }
}

fn next_inline_request(src: &mut BytesMut) -> Result<Option<RequestArgs>, ConnError> {
    let Some(newline) = src.iter().position(|&b| b == b'\n') else {
        if src.len() > MAX_INLINE_LEN {
            return Err(ConnError::Protocol("too big inline request".to_string()));
        }
        return Ok(None);
    };

    let mut line = &src[..newline];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();
    src.advance(newline + 1);
    Ok(Some(args))
}
