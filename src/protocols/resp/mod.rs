//! RESP (Redis Serialization Protocol) value codec.
//!
//! - `value`: zero-copy reader for a single RESP2 value
//! - `writer`: `append_*` functions, the reader's inverse
//! - `any`: the `Value` reply type and its encoding rules

pub mod any;
pub mod value;
pub mod writer;

pub use any::{append_any, prefix_err_if_needed, Value};
pub use value::{parse_value, read_value, Elements, Kind, ValueError, WireValue};
pub use writer::*;
