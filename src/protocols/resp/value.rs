//! RESP value reader.
//!
//! Recursive-descent parser for a single RESP2 value. The parser borrows
//! from the input slice and never copies payload bytes; callers that need
//! to keep a value past the lifetime of the buffer copy what they need.
//!
//! The reader distinguishes three outcomes:
//! - `Ok(Some((value, consumed)))`: one complete value at the head of the slice
//! - `Ok(None)`: the slice is a prefix of a value, retry with more bytes
//! - `Err(ValueError)`: the bytes can never form a valid value

use thiserror::Error;

/// Maximum bulk string length (512 MB, same as Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth accepted by the reader.
pub const MAX_NESTING_DEPTH: usize = 32;

/// RESP value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `:1000\r\n`
    Integer,
    /// `+OK\r\n`
    SimpleString,
    /// `$6\r\nfoobar\r\n` or `$-1\r\n`
    Bulk,
    /// `*2\r\n...` or `*-1\r\n`
    Array,
    /// `-ERR message\r\n`
    Error,
}

impl Kind {
    /// Map a leading marker byte to its kind.
    pub fn from_marker(byte: u8) -> Option<Kind> {
        match byte {
            b':' => Some(Kind::Integer),
            b'+' => Some(Kind::SimpleString),
            b'$' => Some(Kind::Bulk),
            b'*' => Some(Kind::Array),
            b'-' => Some(Kind::Error),
            _ => None,
        }
    }

    /// The marker byte that starts a value of this kind.
    pub fn marker(self) -> u8 {
        match self {
            Kind::Integer => b':',
            Kind::SimpleString => b'+',
            Kind::Bulk => b'$',
            Kind::Array => b'*',
            Kind::Error => b'-',
        }
    }
}

/// Errors for byte sequences that can never form a valid value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("unknown type marker: {0:#04x}")]
    UnknownMarker(u8),

    #[error("missing CR before LF")]
    MissingCr,

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid bulk length")]
    InvalidBulkLength,

    #[error("invalid array length")]
    InvalidArrayLength,

    #[error("missing CRLF after bulk payload")]
    MissingTerminator,

    #[error("bulk string too large: {0} bytes")]
    BulkTooLarge(usize),

    #[error("array nesting too deep")]
    TooDeep,
}

/// A single parsed value borrowing from the input buffer.
///
/// `raw` covers every byte the value consumed, markers and terminators
/// included. For a bulk string `payload` is the content; for an array it is
/// the concatenated bytes of all elements. A null bulk or null array has no
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireValue<'a> {
    pub kind: Kind,
    pub raw: &'a [u8],
    pub payload: Option<&'a [u8]>,
    /// Element count, arrays only.
    pub count: usize,
}

impl<'a> WireValue<'a> {
    /// True for `$-1\r\n` and `*-1\r\n`.
    pub fn is_null(&self) -> bool {
        self.payload.is_none()
    }

    /// Interpret the payload as a signed integer.
    ///
    /// Works for `Integer` values and for bulk/simple strings holding
    /// decimal text. `None` when the number does not fit in an `i64`.
    pub fn as_integer(&self) -> Option<i64> {
        match self.kind {
            Kind::Integer | Kind::Bulk | Kind::SimpleString => {
                self.payload.and_then(|p| parse_int(p).ok())
            }
            _ => None,
        }
    }

    /// Payload as UTF-8 text.
    pub fn as_str(&self) -> Option<&'a str> {
        match self.kind {
            Kind::Array => None,
            _ => self.payload.and_then(|p| std::str::from_utf8(p).ok()),
        }
    }

    /// Iterate the elements of an array. Empty for every other kind.
    pub fn elements(&self) -> Elements<'a> {
        let rest = match self.kind {
            Kind::Array => self.payload.unwrap_or(&[]),
            _ => &[],
        };
        Elements { rest }
    }

    /// Visit array elements in order until `f` returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(WireValue<'a>) -> bool,
    {
        for element in self.elements() {
            if !f(element) {
                break;
            }
        }
    }
}

/// Iterator over the elements of an array value.
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Elements<'a> {
    type Item = WireValue<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // The payload was validated when the array was parsed.
        match parse_value(self.rest) {
            Ok(Some((value, consumed))) => {
                self.rest = &self.rest[consumed..];
                Some(value)
            }
            _ => {
                self.rest = &[];
                None
            }
        }
    }
}

/// Read one value from the head of `buf`.
///
/// Returns `(0, None)` when the buffer holds no complete, well-formed value.
/// Use [`parse_value`] to tell an incomplete buffer from a malformed one.
pub fn read_value(buf: &[u8]) -> (usize, Option<WireValue<'_>>) {
    match parse_value(buf) {
        Ok(Some((value, consumed))) => (consumed, Some(value)),
        _ => (0, None),
    }
}

/// Parse one value from the head of `buf`.
pub fn parse_value(buf: &[u8]) -> Result<Option<(WireValue<'_>, usize)>, ValueError> {
    parse_at_depth(buf, 0)
}

fn parse_at_depth(buf: &[u8], depth: usize) -> Result<Option<(WireValue<'_>, usize)>, ValueError> {
    let Some(&marker) = buf.first() else {
        return Ok(None);
    };
    let kind = Kind::from_marker(marker)
        .ok_or(ValueError::UnknownMarker(marker))?;

    let Some(line_end) = find_line(buf)? else {
        return Ok(None);
    };
    let line = &buf[1..line_end];
    let header_len = line_end + 2;

    match kind {
        Kind::SimpleString | Kind::Error => Ok(Some((
            WireValue {
                kind,
                raw: &buf[..header_len],
                payload: Some(line),
                count: 0,
            },
            header_len,
        ))),
        Kind::Integer => {
            check_integer(line)?;
            Ok(Some((
                WireValue {
                    kind,
                    raw: &buf[..header_len],
                    payload: Some(line),
                    count: 0,
                },
                header_len,
            )))
        }
        Kind::Bulk => parse_bulk(buf, line, header_len),
        Kind::Array => parse_array(buf, line, header_len, depth),
    }
}

fn parse_bulk<'a>(
    buf: &'a [u8],
    line: &[u8],
    header_len: usize,
) -> Result<Option<(WireValue<'a>, usize)>, ValueError> {
    let len = parse_int(line).map_err(|_| ValueError::InvalidBulkLength)?;
    if len == -1 {
        return Ok(Some((
            WireValue {
                kind: Kind::Bulk,
                raw: &buf[..header_len],
                payload: None,
                count: 0,
            },
            header_len,
        )));
    }
    if len < 0 {
        return Err(ValueError::InvalidBulkLength);
    }

    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ValueError::BulkTooLarge(len));
    }

    let total = header_len + len + 2;
    if buf.len() < total {
        return Ok(None);
    }
    if &buf[header_len + len..total] != b"\r\n" {
        return Err(ValueError::MissingTerminator);
    }

    Ok(Some((
        WireValue {
            kind: Kind::Bulk,
            raw: &buf[..total],
            payload: Some(&buf[header_len..header_len + len]),
            count: 0,
        },
        total,
    )))
}

fn parse_array<'a>(
    buf: &'a [u8],
    line: &[u8],
    header_len: usize,
    depth: usize,
) -> Result<Option<(WireValue<'a>, usize)>, ValueError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(ValueError::TooDeep);
    }

    let count = parse_int(line).map_err(|_| ValueError::InvalidArrayLength)?;
    if count == -1 {
        return Ok(Some((
            WireValue {
                kind: Kind::Array,
                raw: &buf[..header_len],
                payload: None,
                count: 0,
            },
            header_len,
        )));
    }
    if count < 0 {
        return Err(ValueError::InvalidArrayLength);
    }

    let count = count as usize;
    let mut pos = header_len;
    for _ in 0..count {
        match parse_at_depth(&buf[pos..], depth + 1)? {
            Some((_, consumed)) => pos += consumed,
            None => return Ok(None),
        }
    }

    Ok(Some((
        WireValue {
            kind: Kind::Array,
            raw: &buf[..pos],
            payload: Some(&buf[header_len..pos]),
            count,
        },
        pos,
    )))
}

/// Find the `\r` of the first line terminator.
///
/// An LF that is not preceded by CR is a hard error.
fn find_line(buf: &[u8]) -> Result<Option<usize>, ValueError> {
    match buf.iter().position(|&b| b == b'\n') {
        Some(lf) if lf >= 2 && buf[lf - 1] == b'\r' => Ok(Some(lf - 1)),
        Some(_) => Err(ValueError::MissingCr),
        None => Ok(None),
    }
}

/// Check that `digits` is `-?[0-9]+`. Any width is accepted, so unsigned
/// values above `i64::MAX` read back; [`WireValue::as_integer`] does the
/// range check.
fn check_integer(digits: &[u8]) -> Result<(), ValueError> {
    let digits = digits.strip_prefix(b"-").unwrap_or(digits);
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ValueError::InvalidInteger);
    }
    Ok(())
}

/// Parse `-?[0-9]+` with overflow checking.
pub(crate) fn parse_int(digits: &[u8]) -> Result<i64, ValueError> {
    let (negative, digits) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, digits),
    };
    if digits.is_empty() {
        return Err(ValueError::InvalidInteger);
    }

    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ValueError::InvalidInteger);
        }
        let digit = i64::from(b - b'0');
        n = n
            .checked_mul(10)
            .and_then(|n| {
                if negative {
                    n.checked_sub(digit)
                } else {
                    n.checked_add(digit)
                }
            })
            .ok_or(ValueError::InvalidInteger)?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_complete(input: &[u8]) -> (WireValue<'_>, usize) {
        match parse_value(input) {
            Ok(Some(result)) => result,
            other => panic!("Expected complete value, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_integer() {
        let (value, consumed) = parse_complete(b":1000\r\n");
        assert_eq!(value.kind, Kind::Integer);
        assert_eq!(value.as_integer(), Some(1000));
        assert_eq!(consumed, 7);

        let (value, _) = parse_complete(b":-42\r\n");
        assert_eq!(value.as_integer(), Some(-42));
    }

    #[test]
    fn test_parse_invalid_integer() {
        assert_eq!(parse_value(b":12a\r\n"), Err(ValueError::InvalidInteger));
        assert_eq!(parse_value(b":\r\n"), Err(ValueError::InvalidInteger));
        assert_eq!(parse_value(b":-\r\n"), Err(ValueError::InvalidInteger));
        assert_eq!(parse_value(b":1-2\r\n"), Err(ValueError::InvalidInteger));
    }

    #[test]
    fn test_parse_integer_wider_than_i64() {
        let (value, consumed) = parse_complete(b":18446744073709551615\r\n");
        assert_eq!(value.kind, Kind::Integer);
        assert_eq!(value.payload, Some(&b"18446744073709551615"[..]));
        assert_eq!(consumed, 23);
        assert_eq!(value.as_integer(), None);

        let (value, _) = parse_complete(b":-9223372036854775808\r\n");
        assert_eq!(value.as_integer(), Some(i64::MIN));
    }

    #[test]
    fn test_parse_simple_and_error() {
        let (value, consumed) = parse_complete(b"+OK\r\nrest");
        assert_eq!(value.kind, Kind::SimpleString);
        assert_eq!(value.payload, Some(&b"OK"[..]));
        assert_eq!(value.raw, b"+OK\r\n");
        assert_eq!(consumed, 5);

        let (value, _) = parse_complete(b"-ERR bad arg\r\n");
        assert_eq!(value.kind, Kind::Error);
        assert_eq!(value.as_str(), Some("ERR bad arg"));
    }

    #[test]
    fn test_parse_bulk() {
        let (value, consumed) = parse_complete(b"$6\r\nfoobar\r\n");
        assert_eq!(value.kind, Kind::Bulk);
        assert_eq!(value.payload, Some(&b"foobar"[..]));
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_null_bulk_differs_from_empty_bulk() {
        let (null, consumed) = parse_complete(b"$-1\r\n");
        assert!(null.is_null());
        assert_eq!(consumed, 5);

        let (empty, consumed) = parse_complete(b"$0\r\n\r\n");
        assert!(!empty.is_null());
        assert_eq!(empty.payload, Some(&b""[..]));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_bulk_errors() {
        assert_eq!(parse_value(b"$-2\r\n"), Err(ValueError::InvalidBulkLength));
        assert_eq!(parse_value(b"$x\r\n"), Err(ValueError::InvalidBulkLength));
        assert_eq!(
            parse_value(b"$3\r\nfooXX"),
            Err(ValueError::MissingTerminator)
        );
        assert_eq!(
            parse_value(b"$600000000\r\n"),
            Err(ValueError::BulkTooLarge(600_000_000))
        );
    }

    #[test]
    fn test_parse_bulk_incomplete() {
        assert_eq!(parse_value(b"$6\r\nfoo"), Ok(None));
        assert_eq!(parse_value(b"$6\r\nfoobar\r"), Ok(None));
        assert_eq!(parse_value(b"$6"), Ok(None));
        assert_eq!(parse_value(b""), Ok(None));
    }

    #[test]
    fn test_missing_cr_is_error() {
        assert_eq!(parse_value(b"+OK\n"), Err(ValueError::MissingCr));
        assert_eq!(parse_value(b"$3\nfoo\r\n"), Err(ValueError::MissingCr));
    }

    #[test]
    fn test_unknown_marker() {
        assert_eq!(
            parse_value(b"!oops\r\n"),
            Err(ValueError::UnknownMarker(b'!'))
        );
    }

    #[test]
    fn test_parse_array() {
        let input = b"*2\r\n$3\r\nfoo\r\n:7\r\n";
        let (value, consumed) = parse_complete(input);
        assert_eq!(value.kind, Kind::Array);
        assert_eq!(value.count, 2);
        assert_eq!(consumed, input.len());
        assert_eq!(value.payload, Some(&b"$3\r\nfoo\r\n:7\r\n"[..]));

        let elements: Vec<_> = value.elements().collect();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].payload, Some(&b"foo"[..]));
        assert_eq!(elements[1].as_integer(), Some(7));
    }

    #[test]
    fn test_parse_nested_array() {
        let input = b"*2\r\n*1\r\n+a\r\n$-1\r\n";
        let (value, _) = parse_complete(input);
        let mut kinds = Vec::new();
        value.for_each(|element| {
            kinds.push(element.kind);
            true
        });
        assert_eq!(kinds, vec![Kind::Array, Kind::Bulk]);
    }

    #[test]
    fn test_for_each_stops_early() {
        let (value, _) = parse_complete(b"*3\r\n:1\r\n:2\r\n:3\r\n");
        let mut seen = 0;
        value.for_each(|_| {
            seen += 1;
            seen < 2
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_null_and_invalid_array() {
        let (value, consumed) = parse_complete(b"*-1\r\n");
        assert_eq!(value.kind, Kind::Array);
        assert!(value.is_null());
        assert_eq!(consumed, 5);

        assert_eq!(parse_value(b"*-2\r\n"), Err(ValueError::InvalidArrayLength));
    }

    #[test]
    fn test_incomplete_child_makes_array_incomplete() {
        assert_eq!(parse_value(b"*2\r\n$3\r\nfoo\r\n"), Ok(None));
        assert_eq!(read_value(b"*2\r\n$3\r\nfoo\r\n"), (0, None));
    }

    #[test]
    fn test_nesting_limit() {
        let mut input = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        assert_eq!(parse_value(&input), Err(ValueError::TooDeep));
    }

    #[test]
    fn test_read_value_every_prefix_is_incomplete() {
        let input = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$-1\r\n";
        for split in 0..input.len() {
            assert_eq!(read_value(&input[..split]), (0, None), "split at {split}");
        }
        let (consumed, value) = read_value(input);
        assert_eq!(consumed, input.len());
        match value {
            Some(v) => assert_eq!(v.count, 3),
            None => panic!("Expected complete array"),
        }
    }

    #[test]
    fn test_read_value_invalid_returns_zero() {
        assert_eq!(read_value(b"$-5\r\n"), (0, None));
    }
}
