//! RESP request reader: `*<count>\r\n` followed by `count` bulk strings.

use super::{Command, ProtocolError, Step};
use crate::protocols::resp::value::{parse_int, MAX_BULK_SIZE};
use bytes::Bytes;

/// Maximum number of arguments in one request (same as Redis).
const MAX_ARGS: i64 = 1024 * 1024;

pub(super) fn read_command(buf: &[u8]) -> Result<Step, ProtocolError> {
    let Some(lf) = find_lf(buf, 0) else {
        return Ok(Step::Incomplete);
    };
    if lf < 2 || buf[lf - 1] != b'\r' {
        return Err(ProtocolError::InvalidMultiBulkLength);
    }
    let count = parse_int(&buf[1..lf - 1])
        .map_err(|_| ProtocolError::InvalidMultiBulkLength)?;
    if !(0..=MAX_ARGS).contains(&count) {
        return Err(ProtocolError::InvalidMultiBulkLength);
    }

    let mut pos = lf + 1;
    if count == 0 {
        return Ok(Step::Skip(pos));
    }

    let count = count as usize;
    let mut marks = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let Some(&marker) = buf.get(pos) else {
            return Ok(Step::Incomplete);
        };
        if marker != b'$' {
            return Err(ProtocolError::UnexpectedMarker(marker));
        }

        let Some(lf) = find_lf(buf, pos) else {
            return Ok(Step::Incomplete);
        };
        if buf[lf - 1] != b'\r' {
            return Err(ProtocolError::InvalidBulkLength);
        }
        let size = parse_int(&buf[pos + 1..lf - 1])
            .map_err(|_| ProtocolError::InvalidBulkLength)?;
        if size < 0 || size as usize > MAX_BULK_SIZE {
            return Err(ProtocolError::InvalidBulkLength);
        }

        let start = lf + 1;
        let end = start + size as usize;
        if buf.len() < end + 2 {
            return Ok(Step::Incomplete);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError::InvalidBulkLength);
        }
        marks.push((start, end));
        pos = end + 2;
    }

    // One copy of the request; every argument is a view into it.
    let raw = Bytes::copy_from_slice(&buf[..pos]);
    let args = marks.into_iter().map(|(s, e)| raw.slice(s..e)).collect();
    Ok(Step::Command(Command { raw, args }, pos))
}

fn find_lf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| from + i)
}
