//! Command framing.
//!
//! Turns an accumulated, possibly partial, byte buffer into complete
//! commands. Three request dialects are accepted and told apart by the
//! first byte of each request:
//!
//! - `*`: RESP array of bulk strings (`*1\r\n$4\r\nPING\r\n`)
//! - `$`: native line protocol (`$4 PING\r\n`)
//! - anything else: plain text line (`PING\n`)
//!
//! Framing stops at the first incomplete request. Unconsumed bytes are
//! handed back as `leftover` and must be prepended to the next read.

mod native;
mod plain;
mod resp;

use crate::protocols::resp::writer::{append_array, append_bulk};
use bytes::{Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// A framed client request.
///
/// `raw` is the request in RESP form: the bytes as received for RESP
/// requests, a RESP re-encoding for the text dialects. Every argument is a
/// slice of `raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub raw: Bytes,
    pub args: Vec<Bytes>,
}

impl Command {
    /// Build a command from its arguments, encoding `raw` as a RESP array.
    pub fn from_args<I, A>(args: I) -> Command
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let args: Vec<A> = args.into_iter().collect();
        let mut buf = BytesMut::with_capacity(
            16 + args.iter().map(|a| a.as_ref().len() + 16).sum::<usize>(),
        );
        let mut marks = Vec::with_capacity(args.len());

        append_array(&mut buf, args.len());
        for arg in &args {
            let arg = arg.as_ref();
            append_bulk(&mut buf, arg);
            let end = buf.len() - 2;
            marks.push((end - arg.len(), end));
        }

        let raw = buf.freeze();
        let args = marks.into_iter().map(|(s, e)| raw.slice(s..e)).collect();
        Command { raw, args }
    }

    /// The command name, `args[0]`.
    pub fn name(&self) -> &[u8] {
        self.args.first().map(|a| &a[..]).unwrap_or(&[])
    }

    /// Case-insensitive match on the command name.
    pub fn is(&self, name: &str) -> bool {
        self.name().eq_ignore_ascii_case(name.as_bytes())
    }

    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }
}

/// Request dialect, chosen from the first byte of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Resp,
    Native,
    PlainText,
}

impl Dialect {
    pub fn detect(first: u8) -> Dialect {
        match first {
            b'*' => Dialect::Resp,
            b'$' => Dialect::Native,
            _ => Dialect::PlainText,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Resp => write!(f, "RESP"),
            Dialect::Native => write!(f, "native"),
            Dialect::PlainText => write!(f, "plain text"),
        }
    }
}

/// Malformed request input. The stream cannot be resynchronized after one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Protocol error: unbalanced quotes in request")]
    UnbalancedQuotes,

    #[error("Protocol error: invalid bulk length")]
    InvalidBulkLength,

    #[error("Protocol error: invalid multibulk length")]
    InvalidMultiBulkLength,

    #[error("Protocol error: expected '$', got '{}'", char::from(*.0))]
    UnexpectedMarker(u8),

    #[error("Protocol error: invalid message")]
    InvalidMessage,

    #[error("Protocol error: expected {expected} request, got {found}")]
    DialectMismatch { expected: Dialect, found: Dialect },

    #[error("Protocol error: request buffer of {size} bytes exceeds {max}")]
    BufferLimit { size: usize, max: usize },
}

/// Result of one framing pass.
#[derive(Debug)]
pub struct Framed<'a> {
    /// Complete commands, in arrival order.
    pub commands: Vec<Command>,
    /// Bytes consumed from the head of the buffer.
    pub consumed: usize,
    /// Unconsumed tail of the buffer.
    pub leftover: &'a [u8],
    /// Set when framing stopped at malformed input. `leftover` then starts
    /// at the offending request.
    pub error: Option<ProtocolError>,
}

/// Outcome of reading one request from the head of a buffer.
#[derive(Debug)]
enum Step {
    /// A command and the bytes it used.
    Command(Command, usize),
    /// A request with no arguments, such as `*0\r\n` or a blank line.
    Skip(usize),
    Incomplete,
}

/// Frame as many commands as `buf` holds, detecting the dialect of each
/// request from its first byte.
pub fn frame(buf: &[u8]) -> Framed<'_> {
    frame_with(buf, None)
}

/// Frame with a fixed dialect.
///
/// A request whose first byte selects RESP or native while another dialect
/// is pinned fails with [`ProtocolError::DialectMismatch`]. When plain text
/// is pinned every request is read as a text line.
pub fn frame_pinned(buf: &[u8], dialect: Dialect) -> Framed<'_> {
    frame_with(buf, Some(dialect))
}

fn frame_with(buf: &[u8], pinned: Option<Dialect>) -> Framed<'_> {
    let mut commands = Vec::new();
    let mut pos = 0;

    while pos < buf.len() {
        let rest = &buf[pos..];
        let detected = Dialect::detect(rest[0]);
        let dialect = match pinned {
            None => detected,
            Some(Dialect::PlainText) => Dialect::PlainText,
            Some(expected) if expected == detected => expected,
            Some(expected) => {
                let error = ProtocolError::DialectMismatch {
                    expected,
                    found: detected,
                };
                return Framed {
                    commands,
                    consumed: pos,
                    leftover: rest,
                    error: Some(error),
                };
            }
        };

        let step = match dialect {
            Dialect::Resp => resp::read_command(rest),
            Dialect::Native => native::read_command(rest),
            Dialect::PlainText => plain::read_command(rest),
        };

        match step {
            Ok(Step::Command(command, n)) => {
                commands.push(command);
                pos += n;
            }
            Ok(Step::Skip(n)) => pos += n,
            Ok(Step::Incomplete) => break,
            Err(error) => {
                return Framed {
                    commands,
                    consumed: pos,
                    leftover: rest,
                    error: Some(error),
                };
            }
        }
    }

    Framed {
        commands,
        consumed: pos,
        leftover: &buf[pos..],
        error: None,
    }
}
