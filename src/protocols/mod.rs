//! Wire protocol support.
//!
//! - `resp`: RESP value codec (reader, writers, typed replies)
//! - `command`: request framing for the RESP, native and plain text dialects

pub mod command;
pub mod resp;
