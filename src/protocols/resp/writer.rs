//! RESP value writers.
//!
//! Each `append_*` function writes exactly the bytes the reader in
//! [`super::value`] accepts back. Simple strings and errors cannot carry CR
//! or LF, so those bytes are replaced with a space before writing.

use bytes::{BufMut, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Append a `<marker><n>\r\n` header.
fn append_prefix(buf: &mut BytesMut, marker: u8, n: i64) {
    if (0..=9).contains(&n) {
        buf.put_slice(&[marker, b'0' + n as u8, b'\r', b'\n']);
        return;
    }
    buf.put_u8(marker);
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(CRLF);
}

/// `:<n>\r\n`
pub fn append_int(buf: &mut BytesMut, n: i64) {
    append_prefix(buf, b':', n);
}

/// `:<n>\r\n` for unsigned values.
pub fn append_uint(buf: &mut BytesMut, n: u64) {
    buf.put_u8(b':');
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(CRLF);
}

/// Array header. The caller appends `count` values after it.
pub fn append_array(buf: &mut BytesMut, count: usize) {
    append_prefix(buf, b'*', count as i64);
}

/// `*-1\r\n`
pub fn append_null_array(buf: &mut BytesMut) {
    buf.put_slice(b"*-1\r\n");
}

/// `$<len>\r\n<data>\r\n`
pub fn append_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.reserve(data.len() + 16);
    append_prefix(buf, b'$', data.len() as i64);
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

pub fn append_bulk_string(buf: &mut BytesMut, s: &str) {
    append_bulk(buf, s.as_bytes());
}

/// `+<text>\r\n`
pub fn append_string(buf: &mut BytesMut, s: &str) {
    buf.put_u8(b'+');
    put_stripped(buf, s);
    buf.put_slice(CRLF);
}

/// `-<text>\r\n`
///
/// The message is written as given. Use [`super::any::Value::error`] to get
/// the leading error code enforced.
pub fn append_error(buf: &mut BytesMut, s: &str) {
    buf.put_u8(b'-');
    put_stripped(buf, s);
    buf.put_slice(CRLF);
}

/// `+OK\r\n`
pub fn append_ok(buf: &mut BytesMut) {
    buf.put_slice(b"+OK\r\n");
}

/// Null bulk string, `$-1\r\n`.
pub fn append_null(buf: &mut BytesMut) {
    buf.put_slice(b"$-1\r\n");
}

/// Native line reply, `$<len> <data>\r\n`.
pub fn append_native(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(data);
    buf.put_slice(CRLF);
}

pub fn append_bulk_int(buf: &mut BytesMut, n: i64) {
    append_bulk(buf, n.to_string().as_bytes());
}

pub fn append_bulk_uint(buf: &mut BytesMut, n: u64) {
    append_bulk(buf, n.to_string().as_bytes());
}

/// Bulk string holding the shortest decimal text of `f`, never in
/// exponent form.
pub fn append_bulk_float(buf: &mut BytesMut, f: f64) {
    let text = if f == f64::INFINITY {
        "+Inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        f.to_string()
    };
    append_bulk(buf, text.as_bytes());
}

fn put_stripped(buf: &mut BytesMut, s: &str) {
    buf.extend(s.bytes().map(|b| match b {
        b'\r' | b'\n' => b' ',
        other => other,
    }));
}
