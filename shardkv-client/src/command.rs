//! # Commands and Reply Decoders
//!
//! Purpose: Model one request (command name plus arguments) and the decoder
//! that turns its reply into a typed value.
//!
//! ## Design Principles
//! 1. **Stateless Operations**: A `Command` is built per call and owns its args.
//! 2. **Decoder as Trait**: `FromReply` is the expected-result decoder; the type
//!    parameter picks it at compile time, so pipelines stay typed.
//! 3. **Errors Are Values**: Error replies decode to `ConnectionFault::Server`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::{ConnectionFault, FaultResult};
use crate::resp::RespValue;

/// A single request destined for one shard.
#[derive(Clone, PartialEq)]
pub struct Command {
    // args[0] is the command name.
    args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Command {
            args: vec![name.as_bytes().to_vec()],
        }
    }

    /// Appends a binary-safe argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Appends every item as its own argument.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_vec()));
        self
    }

    pub fn int_arg(self, value: i64) -> Self {
        self.arg(value.to_string())
    }

    /// Scores use Rust's float formatting, which the node parses ("inf" included).
    pub fn float_arg(self, value: f64) -> Self {
        self.arg(value.to_string())
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).into_owned()
    }

    pub fn parts(&self) -> &[Vec<u8>] {
        &self.args
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self
            .args
            .iter()
            .map(|arg| String::from_utf8_lossy(arg))
            .collect();
        write!(f, "Command({})", parts.join(" "))
    }
}

/// Decodes a node reply into a typed value.
pub trait FromReply: Sized {
    fn from_reply(value: RespValue) -> FaultResult<Self>;
}

/// Turns error replies into faults so every decoder can ignore them.
fn ok_reply(value: RespValue) -> FaultResult<RespValue> {
    match value {
        RespValue::Error(message) => Err(ConnectionFault::Server(
            String::from_utf8_lossy(&message).into_owned(),
        )),
        other => Ok(other),
    }
}

fn utf8(data: Vec<u8>) -> FaultResult<String> {
    String::from_utf8(data).map_err(|_| ConnectionFault::InvalidUtf8)
}

impl FromReply for RespValue {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        ok_reply(value)
    }
}

impl FromReply for () {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        ok_reply(value).map(|_| ())
    }
}

impl FromReply for bool {
    /// Integer replies are 0/1 flags; SET NX answers OK or nil.
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        match ok_reply(value)? {
            RespValue::Integer(flag) => Ok(flag != 0),
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(true),
            RespValue::Bulk(None) => Ok(false),
            _ => Err(ConnectionFault::UnexpectedResponse("integer or status")),
        }
    }
}

impl FromReply for i64 {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        match ok_reply(value)? {
            RespValue::Integer(value) => Ok(value),
            RespValue::Bulk(Some(data)) => utf8(data)?
                .parse()
                .map_err(|_| ConnectionFault::UnexpectedResponse("integer")),
            _ => Err(ConnectionFault::UnexpectedResponse("integer")),
        }
    }
}

impl FromReply for Option<String> {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        match ok_reply(value)? {
            RespValue::Bulk(None) => Ok(None),
            RespValue::Bulk(Some(data)) | RespValue::Simple(data) => utf8(data).map(Some),
            _ => Err(ConnectionFault::UnexpectedResponse("bulk string")),
        }
    }
}

impl FromReply for String {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        Option::<String>::from_reply(value)?
            .ok_or(ConnectionFault::UnexpectedResponse("non-null bulk string"))
    }
}

fn array(value: RespValue) -> FaultResult<Vec<RespValue>> {
    match ok_reply(value)? {
        RespValue::Array(items) => Ok(items),
        _ => Err(ConnectionFault::UnexpectedResponse("array")),
    }
}

impl FromReply for Vec<Option<String>> {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        array(value)?
            .into_iter()
            .map(Option::<String>::from_reply)
            .collect()
    }
}

impl FromReply for Vec<String> {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        array(value)?.into_iter().map(String::from_reply).collect()
    }
}

impl FromReply for HashSet<String> {
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        array(value)?.into_iter().map(String::from_reply).collect()
    }
}

impl FromReply for HashMap<String, String> {
    /// Flat field/value arrays, as returned by HGETALL.
    fn from_reply(value: RespValue) -> FaultResult<Self> {
        let items = array(value)?;
        if items.len() % 2 != 0 {
            return Err(ConnectionFault::UnexpectedResponse("even-length array"));
        }
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(String::from_reply(field)?, String::from_reply(value)?);
        }
        Ok(map)
    }
}
