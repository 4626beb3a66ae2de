//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse node replies without an external
//! driver, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol faults immediately.

use std::io::BufRead;

use crate::error::{ConnectionFault, FaultResult};

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK, +QUEUED or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
    /// *-1, returned by EXEC when a watched key changed.
    NullArray,
}

impl RespValue {
    /// Returns the error text when this is an error reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        let arg = arg.as_ref();
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> FaultResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ConnectionFault::Protocol("empty reply line"));
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        _ => Err(ConnectionFault::Protocol("unknown reply type")),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> FaultResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    let len = len as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ConnectionFault::Protocol("bulk string missing crlf"));
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> FaultResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::NullArray);
    }
    if len == 0 {
        return Ok(RespValue::Array(Vec::new()));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        items.push(read_response(reader, line_buf)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> FaultResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ConnectionFault::Protocol("connection closed by node"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ConnectionFault::Protocol("line missing crlf"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> FaultResult<i64> {
    if data.is_empty() {
        return Err(ConnectionFault::Protocol("empty integer"));
    }
    let mut negative = false;
    let mut idx = 0;
    if data[0] == b'-' {
        negative = true;
        idx = 1;
    }
    if idx == data.len() {
        return Err(ConnectionFault::Protocol("invalid integer"));
    }

    let mut value: i64 = 0;
    while idx < data.len() {
        let b = data[idx];
        if !b.is_ascii_digit() {
            return Err(ConnectionFault::Protocol("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        idx += 1;
    }

    if negative {
        Ok(-value)
    } else {
        Ok(value)
    }
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(input: &[u8]) -> FaultResult<RespValue> {
        let mut reader = Cursor::new(input.to_vec());
        let mut line = Vec::new();
        read_response(&mut reader, &mut line)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[&b"GET"[..], &b"key"[..]], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_empty_argument() {
        let mut buf = Vec::new();
        encode_command(&[b"SET".to_vec(), b"k".to_vec(), Vec::new()], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n").unwrap(), RespValue::Simple(b"OK".to_vec()));
    }

    #[test]
    fn parses_bulk_string() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").unwrap(),
            RespValue::Bulk(Some(b"hello".to_vec()))
        );
    }

    #[test]
    fn rejects_sign_without_digits() {
        assert!(matches!(parse(b":-\r\n"), Err(ConnectionFault::Protocol(_))));
        assert!(matches!(parse(b"$-\r\n"), Err(ConnectionFault::Protocol(_))));
        assert_eq!(parse(b":-12\r\n").unwrap(), RespValue::Integer(-12));
    }

    #[test]
    fn parses_null_bulk_string() {
        assert_eq!(parse(b"$-1\r\n").unwrap(), RespValue::Bulk(None));
    }

    #[test]
    fn parses_integer() {
        assert_eq!(parse(b":-42\r\n").unwrap(), RespValue::Integer(-42));
    }

    #[test]
    fn parses_error() {
        let resp = parse(b"-ERR bad\r\n").unwrap();
        assert_eq!(resp.error_message().as_deref(), Some("ERR bad"));
    }

    #[test]
    fn parses_nested_array_and_null_array() {
        let resp = parse(b"*2\r\n:1\r\n*1\r\n$1\r\na\r\n").unwrap();
        assert_eq!(
            resp,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Bulk(Some(b"a".to_vec()))]),
            ])
        );
        assert_eq!(parse(b"*-1\r\n").unwrap(), RespValue::NullArray);
    }

    #[test]
    fn truncated_input_is_protocol_fault() {
        assert!(matches!(parse(b""), Err(ConnectionFault::Protocol(_))));
        assert!(matches!(parse(b"+OK\n"), Err(ConnectionFault::Protocol(_))));
        assert!(matches!(parse(b"$5\r\nhel"), Err(ConnectionFault::Io(_))));
    }
}
