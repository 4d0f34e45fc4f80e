//! Server runtime.
//!
//! - `session`: per-connection buffering and dispatch, independent of I/O
//! - `handler`: the application callback trait
//! - `server`: listener setup, worker threads and shutdown
//! - `mio`: the readiness-based event loop each worker runs
//!
//! The session layer never touches sockets. The event loop reads bytes,
//! hands them to the session [`Hub`], and writes back what it returns.

mod connection;
mod handler;
mod mio;
mod server;
pub mod session;

pub use connection::{Conn, ConnId};
pub use handler::{Action, FnHandler, Handler};
pub use server::{listen_and_serve, Server, ServerError, ServerHandle};
pub use session::{
    ConnectionBuffer, Hub, SessionOptions, SessionState, SessionTable, SharedBuffer, Traffic,
};
