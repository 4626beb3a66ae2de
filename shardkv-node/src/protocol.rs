//! # RESP2 Framing
//!
//! Purpose: Split the inbound byte stream into command argument vectors and
//! encode replies.
//!
//! ## Design Principles
//! 1. **Incremental Parsing**: `parse` only consumes bytes once a full frame is
//!    buffered; partial frames stay in the buffer for the next read.
//! 2. **Inline Fallback**: Lines not starting with `*` are split on whitespace,
//!    so the node can be poked with telnet or `nc`.
//! 3. **Bounded Frames**: Absurd array or bulk lengths are protocol errors.

use bytes::{Buf, BytesMut};

const MAX_ARGS: usize = 1024 * 1024;
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Framing failure; the connection cannot be resynchronised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespError {
    Protocol,
}

/// Parser for client command frames.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Parses one command from the front of `buffer`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. An empty vector means the
    /// client sent an empty inline line or `*0`.
    pub fn parse(&mut self, buffer: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, RespError> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let parsed = if buffer[0] == b'*' {
            parse_array(buffer)?
        } else {
            parse_inline(buffer)
        };
        Ok(parsed.map(|(args, consumed)| {
            buffer.advance(consumed);
            args
        }))
    }
}

fn find_crlf(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|window| window == b"\r\n")
        .map(|offset| from + offset)
}

fn parse_len(digits: &[u8]) -> Result<usize, RespError> {
    if digits.is_empty() || digits.len() > 10 {
        return Err(RespError::Protocol);
    }
    let mut value = 0usize;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol);
        }
        value = value * 10 + (b - b'0') as usize;
    }
    Ok(value)
}

type Parsed = Option<(Vec<Vec<u8>>, usize)>;

fn parse_array(data: &[u8]) -> Result<Parsed, RespError> {
    let Some(header_end) = find_crlf(data, 0) else {
        return Ok(None);
    };
    let count = parse_len(&data[1..header_end])?;
    if count > MAX_ARGS {
        return Err(RespError::Protocol);
    }

    let mut pos = header_end + 2;
    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        match data.get(pos) {
            None => return Ok(None),
            Some(b'$') => {}
            Some(_) => return Err(RespError::Protocol),
        }
        let Some(line_end) = find_crlf(data, pos) else {
            return Ok(None);
        };
        let len = parse_len(&data[pos + 1..line_end])?;
        if len > MAX_BULK_LEN {
            return Err(RespError::Protocol);
        }
        let start = line_end + 2;
        let stop = start + len;
        if data.len() < stop + 2 {
            return Ok(None);
        }
        if &data[stop..stop + 2] != b"\r\n" {
            return Err(RespError::Protocol);
        }
        args.push(data[start..stop].to_vec());
        pos = stop + 2;
    }
    Ok(Some((args, pos)))
}

fn parse_inline(data: &[u8]) -> Parsed {
    let newline = data.iter().position(|&b| b == b'\n')?;
    let line = &data[..newline];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Some((args, newline + 1))
}

/// A reply to be encoded onto the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
    NullArray,
    /// Several top-level replies written back to back.
    Frames(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK")
    }

    /// A generic `-ERR` reply.
    pub fn err(message: impl AsRef<str>) -> Self {
        Reply::Error(format!("ERR {}", message.as_ref()))
    }

    pub fn bulk_or_nil(value: Option<Vec<u8>>) -> Self {
        value.map_or(Reply::Nil, Reply::Bulk)
    }

    pub fn bulks(values: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Reply::Array(values.into_iter().map(Reply::Bulk).collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(message) => {
                out.push(b'-');
                out.extend_from_slice(message.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(data) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Frames(replies) => {
                for reply in replies {
                    reply.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}
