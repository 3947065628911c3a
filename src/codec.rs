//! The line-based invocation encoding.
//!
//! A request is the method name on one line, one line per argument, then a line holding only
//! [`SENTINEL`]. There is no argument count and no escaping, so an argument equal to the
//! sentinel, or one containing a newline, cannot be sent.
//!
//! Responses have no framing at all: the callee writes the rendered return value and closes.

use crate::{
    error::{Result, RpcError},
    types::Value,
};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const SENTINEL: &str = "$";

/// One decoded request: a method name and its arguments as raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub method: String,
    pub args: Vec<String>,
}

pub fn encode(method: &str, args: &[Value]) -> String {
    let mut encoded = String::with_capacity(method.len() + 3);
    encoded.push_str(method);
    encoded.push('\n');
    for arg in args {
        encoded.push_str(&arg.render());
        encoded.push('\n');
    }
    encoded.push_str(SENTINEL);
    encoded.push('\n');
    encoded
}

/// Reads one invocation. The reader is left positioned after the sentinel line.
pub async fn decode<R>(reader: &mut R) -> Result<Invocation>
where
    R: AsyncBufRead + Unpin,
{
    let method = read_line(reader)
        .await?
        .ok_or_else(|| RpcError::MalformedInvocation("stream ended before method name".into()))?;

    let mut args = Vec::new();
    loop {
        match read_line(reader).await? {
            Some(line) if line == SENTINEL => break,
            Some(line) => args.push(line),
            None => {
                return Err(RpcError::MalformedInvocation(format!(
                    "stream ended after {} argument(s) without {SENTINEL:?}",
                    args.len()
                )))
            }
        }
    }

    Ok(Invocation { method, args })
}

/// `None` at end of stream. A final line without a newline still counts as a line.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(RpcError::MalformedInvocation(e.to_string()))
        }
        Err(e) => return Err(e.into()),
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}
