// Copyright 2020 Joyent, Inc.

//! RESP framing. Commands go out as arrays of bulk strings; replies come back
//! as one of the five RESP frame types.

use std::cmp;
use std::io::{self, BufRead, Read, Write};

use sentinel_pool::command::{Command, Reply};

use crate::RespError;

const CRLF: &[u8] = b"\r\n";
// Largest bulk string a store node will send
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
// Largest element count accepted in an array header
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;
// Array storage is grown as elements arrive beyond this
const ARRAY_PREALLOC: usize = 64;

pub fn encode(command: &Command) -> Vec<u8> {
    let tokens = command.tokens();
    let mut buf = Vec::with_capacity(16 * (tokens.len() + 1));
    buf.extend_from_slice(format!("*{}\r\n", tokens.len()).as_bytes());
    for token in tokens {
        buf.extend_from_slice(format!("${}\r\n", token.len()).as_bytes());
        buf.extend_from_slice(token.as_bytes());
        buf.extend_from_slice(CRLF);
    }
    buf
}

pub fn write_command<W: Write>(
    writer: &mut W,
    command: &Command,
) -> Result<(), RespError> {
    writer.write_all(&encode(command))?;
    writer.flush()?;
    Ok(())
}

/// Read one complete reply, blocking until it has arrived.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply, RespError> {
    let line = read_line(reader)?;
    let (kind, rest) = match line.split_first() {
        Some((kind, rest)) => (*kind, rest),
        None => return Err(RespError::Protocol("empty frame".into())),
    };

    match kind {
        b'+' => Ok(Reply::Status(utf8(rest)?)),
        b'-' => Ok(Reply::Error(utf8(rest)?)),
        b':' => Ok(Reply::Integer(length(rest)?)),
        b'$' => {
            let len = length(rest)?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            if len > MAX_BULK_LEN {
                return Err(RespError::Protocol(format!(
                    "bulk string length {} exceeds {}",
                    len, MAX_BULK_LEN
                )));
            }
            let expected = len as usize + CRLF.len();
            let mut payload = Vec::new();
            reader
                .by_ref()
                .take(expected as u64)
                .read_to_end(&mut payload)?;
            if payload.len() < expected {
                return Err(RespError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "bulk string truncated",
                )));
            }
            if !payload.ends_with(CRLF) {
                return Err(RespError::Protocol(
                    "bulk string not terminated by CRLF".into(),
                ));
            }
            payload.truncate(len as usize);
            Ok(Reply::Str(utf8(&payload)?))
        }
        b'*' => {
            let len = length(rest)?;
            if len < 0 {
                return Ok(Reply::Nil);
            }
            if len > MAX_ARRAY_LEN {
                return Err(RespError::Protocol(format!(
                    "array length {} exceeds {}",
                    len, MAX_ARRAY_LEN
                )));
            }
            let mut elements =
                Vec::with_capacity(cmp::min(len as usize, ARRAY_PREALLOC));
            for _ in 0..len {
                elements.push(read_reply(reader)?);
            }
            Ok(Reply::Array(elements))
        }
        other => Err(RespError::Protocol(format!(
            "unknown frame type {:?}",
            other as char
        ))),
    }
}

// One CRLF terminated line, terminator stripped
fn read_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, RespError> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Err(RespError::Closed);
    }
    if !line.ends_with(CRLF) {
        return Err(RespError::Protocol("line not terminated by CRLF".into()));
    }
    line.truncate(line.len() - CRLF.len());
    Ok(line)
}

fn utf8(bytes: &[u8]) -> Result<String, RespError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RespError::Protocol(format!("invalid utf-8: {}", e)))
}

fn length(bytes: &[u8]) -> Result<i64, RespError> {
    let s = utf8(bytes)?;
    s.parse::<i64>()
        .map_err(|_| RespError::Protocol(format!("invalid integer {:?}", s)))
}
