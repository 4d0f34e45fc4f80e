//! redframe: a framework for Redis-protocol-compatible servers
//!
//! Applications implement [`Handler`] and get:
//! - framing of RESP, native (`$len payload`) and plain text requests
//! - pipelining, with partial requests held across reads
//! - RESP reply encoding through `append_*` writers or [`Value`]
//! - a multi-threaded mio server with SO_REUSEPORT listeners
//!
//! ```no_run
//! use bytes::BytesMut;
//! use redframe::{append_string, Action, Command, Config, Conn, Handler, Server};
//!
//! struct Pong;
//!
//! impl Handler for Pong {
//!     fn on_command(&self, _conn: &Conn, _cmd: &Command, out: &mut BytesMut) -> Action {
//!         append_string(out, "PONG");
//!         Action::Continue
//!     }
//! }
//!
//! Server::bind(Config::default(), Pong)?.run()?;
//! # Ok::<(), redframe::ServerError>(())
//! ```

pub mod config;
pub mod protocols;
pub mod runtime;

pub use config::{Config, ConfigError, DialectPolicy};
pub use protocols::command::{frame, frame_pinned, Command, Dialect, Framed, ProtocolError};
pub use protocols::resp::{
    append_any, append_array, append_bulk, append_bulk_float, append_bulk_int, append_bulk_string,
    append_bulk_uint, append_error, append_int, append_native, append_null, append_null_array,
    append_ok, append_string, append_uint, parse_value, read_value, Kind, Value, ValueError,
    WireValue,
};
pub use runtime::{
    listen_and_serve, Action, Conn, ConnId, FnHandler, Handler, Hub, Server, ServerError,
    ServerHandle, SessionOptions, SessionState, SessionTable, Traffic,
};
