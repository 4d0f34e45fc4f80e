//! Native line protocol reader: `$<len> <payload>\r\n`.
//!
//! The payload is split on spaces. Two shapes get special treatment because
//! the line format has no way to delimit them:
//! - a token starting with `{` is a JSON object and runs to the end of the line
//! - in `SET ... STRING "<value>"` the quoted value is taken without its quotes

use super::{Command, ProtocolError, Step};
use crate::protocols::resp::value::{parse_int, MAX_BULK_SIZE};

pub(super) fn read_command(buf: &[u8]) -> Result<Step, ProtocolError> {
    for (i, &b) in buf.iter().enumerate().skip(1) {
        match b {
            b' ' => return read_payload(buf, i),
            b'0'..=b'9' => {}
            _ => return Err(ProtocolError::InvalidMessage),
        }
    }
    Ok(Step::Incomplete)
}

fn read_payload(buf: &[u8], space: usize) -> Result<Step, ProtocolError> {
    let len = parse_int(&buf[1..space])
        .map_err(|_| ProtocolError::InvalidMessage)?;
    if len < 0 || len as usize > MAX_BULK_SIZE {
        return Err(ProtocolError::InvalidMessage);
    }

    let start = space + 1;
    let end = start + len as usize;
    if buf.len() < end + 2 {
        return Ok(Step::Incomplete);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(ProtocolError::InvalidMessage);
    }

    let args = split_payload(&buf[start..end]);
    if args.is_empty() {
        return Ok(Step::Skip(end + 2));
    }
    Ok(Step::Command(Command::from_args(args), end + 2))
}

fn split_payload(mut line: &[u8]) -> Vec<&[u8]> {
    let mut args: Vec<&[u8]> = Vec::new();

    while !line.is_empty() {
        if line[0] == b'{' {
            args.push(line);
            break;
        }
        if is_quoted_string_value(&args, line) {
            args.push(&line[1..line.len() - 1]);
            break;
        }
        match line.iter().position(|&b| b == b' ') {
            Some(sp) => {
                if sp > 0 {
                    args.push(&line[..sp]);
                }
                line = &line[sp + 1..];
            }
            None => {
                args.push(line);
                break;
            }
        }
    }
    args
}

fn is_quoted_string_value(args: &[&[u8]], line: &[u8]) -> bool {
    let quoted = line.len() >= 2 && line[0] == b'"' && line[line.len() - 1] == b'"';
    quoted && arg_is(args.first(), b"set") && arg_is(args.last(), b"string")
}

fn arg_is(arg: Option<&&[u8]>, name: &[u8]) -> bool {
    arg.is_some_and(|a| a.eq_ignore_ascii_case(name))
}
