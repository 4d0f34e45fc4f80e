//! Typed reply values.
//!
//! `Value` is a closed set of reply shapes. Handlers build one and call
//! [`Value::append_to`]; the encoding rules live here so every handler gets
//! the same output for the same data:
//!
//! - `Null` is a null bulk string
//! - text, bytes, booleans and numbers are bulk strings
//! - arrays are RESP arrays, maps are flat key/value arrays
//! - errors always start with an upper-case code (`ERR` by default)
//! - `Simple` and `SimpleInt` bypass bulk encoding
//! - `Raw` is appended verbatim

use super::writer::{
    append_array, append_bulk, append_bulk_float, append_bulk_int, append_bulk_string,
    append_bulk_uint, append_error, append_int, append_null, append_string,
};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// A reply value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Error(String),
    Text(String),
    Bytes(Bytes),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    Array(Vec<Value>),
    /// Key/value pairs. Sorted by key on output when every key is `Text`,
    /// insertion order otherwise.
    Map(Vec<(Value, Value)>),
    /// Written as `+text\r\n`.
    Simple(String),
    /// Written as `:n\r\n`.
    SimpleInt(i64),
    /// Pre-encoded RESP bytes.
    Raw(Bytes),
}

impl Value {
    /// Error reply. Adds the `ERR` code when the message has none.
    pub fn error(msg: impl fmt::Display) -> Value {
        Value::Error(msg.to_string())
    }

    /// Bulk string of the value's display text.
    pub fn display(v: impl fmt::Display) -> Value {
        Value::Text(v.to_string())
    }

    pub fn array<I, T>(items: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(pairs: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Encode into an existing buffer.
    pub fn append_to(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => append_null(buf),
            Value::Error(msg) => append_error(buf, &prefix_err_if_needed(msg)),
            Value::Text(s) => append_bulk_string(buf, s),
            Value::Bytes(b) => append_bulk(buf, b),
            Value::Bool(true) => append_bulk(buf, b"1"),
            Value::Bool(false) => append_bulk(buf, b"0"),
            Value::Int(n) => append_bulk_int(buf, *n),
            Value::Uint(n) => append_bulk_uint(buf, *n),
            Value::Float(f) => append_bulk_float(buf, *f),
            Value::Array(items) => {
                append_array(buf, items.len());
                for item in items {
                    item.append_to(buf);
                }
            }
            Value::Map(pairs) => append_map(buf, pairs),
            Value::Simple(s) => append_string(buf, s),
            Value::SimpleInt(n) => append_int(buf, *n),
            Value::Raw(raw) => buf.extend_from_slice(raw),
        }
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.append_to(&mut buf);
        buf
    }
}

/// Append any value convertible into a [`Value`].
pub fn append_any(buf: &mut BytesMut, v: impl Into<Value>) {
    v.into().append_to(buf);
}

fn append_map(buf: &mut BytesMut, pairs: &[(Value, Value)]) {
    append_array(buf, pairs.len() * 2);

    let text_keys: Option<Vec<(&str, &Value)>> = pairs
        .iter()
        .map(|(k, v)| match k {
            Value::Text(key) => Some((key.as_str(), v)),
            _ => None,
        })
        .collect();

    match text_keys {
        Some(mut sorted) if !sorted.is_empty() => {
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in sorted {
                append_bulk_string(buf, key);
                value.append_to(buf);
            }
        }
        _ => {
            for (key, value) in pairs {
                key.append_to(buf);
                value.append_to(buf);
            }
        }
    }
}

/// Make sure an error message starts with an upper-case code.
///
/// `"bad thing"` becomes `"ERR bad thing"`; `"WRONGTYPE bad"` is kept. The
/// code is the first whitespace-delimited token.
pub fn prefix_err_if_needed(msg: &str) -> String {
    let msg = msg.trim();
    let first = msg.split_whitespace().next().unwrap_or("");
    if !first.is_empty() && first.bytes().all(|b| b.is_ascii_uppercase()) {
        msg.to_string()
    } else {
        format!("ERR {msg}").trim().to_string()
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

impl_from! {
    String => Text as String,
    &str => Text as String,
    Bytes => Bytes as Bytes,
    Vec<u8> => Bytes as Bytes,
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => Uint as u64,
    u16 => Uint as u64,
    u32 => Uint as u64,
    u64 => Uint as u64,
    f32 => Float as f64,
    f64 => Float as f64,
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Uint(v as u64)
    }
}

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::Int(v as i64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}
