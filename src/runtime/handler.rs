//! Application callbacks.

use crate::protocols::command::Command;
use crate::runtime::connection::Conn;
use bytes::BytesMut;
use std::io;

/// What to do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep the connection open.
    #[default]
    Continue,
    /// Flush pending output, then close this connection.
    Close,
    /// Flush pending output, then stop the whole server.
    Shutdown,
}

/// Application logic plugged into the server.
///
/// Callbacks for one connection are never run concurrently. Different
/// connections may be served from different worker threads at once.
pub trait Handler: Send + Sync + 'static {
    /// A connection was accepted. Bytes appended to `out` are sent first.
    fn on_open(&self, _conn: &Conn, _out: &mut BytesMut) -> Action {
        Action::Continue
    }

    /// A connection was closed, by either side. `err` is set when the close
    /// was caused by an I/O error.
    fn on_close(&self, _conn: &Conn, _err: Option<&io::Error>) -> Action {
        Action::Continue
    }

    /// Handle one command, appending the reply to `out`.
    fn on_command(&self, conn: &Conn, command: &Command, out: &mut BytesMut) -> Action;
}

/// A [`Handler`] built from three closures.
pub struct FnHandler<O, C, H> {
    on_open: O,
    on_close: C,
    on_command: H,
}

impl<O, C, H> FnHandler<O, C, H>
where
    O: Fn(&Conn, &mut BytesMut) -> Action + Send + Sync + 'static,
    C: Fn(&Conn, Option<&io::Error>) -> Action + Send + Sync + 'static,
    H: Fn(&Conn, &Command, &mut BytesMut) -> Action + Send + Sync + 'static,
{
    pub fn new(on_open: O, on_close: C, on_command: H) -> Self {
        Self {
            on_open,
            on_close,
            on_command,
        }
    }
}

impl<O, C, H> Handler for FnHandler<O, C, H>
where
    O: Fn(&Conn, &mut BytesMut) -> Action + Send + Sync + 'static,
    C: Fn(&Conn, Option<&io::Error>) -> Action + Send + Sync + 'static,
    H: Fn(&Conn, &Command, &mut BytesMut) -> Action + Send + Sync + 'static,
{
    fn on_open(&self, conn: &Conn, out: &mut BytesMut) -> Action {
        (self.on_open)(conn, out)
    }

    fn on_close(&self, conn: &Conn, err: Option<&io::Error>) -> Action {
        (self.on_close)(conn, err)
    }

    fn on_command(&self, conn: &Conn, command: &Command, out: &mut BytesMut) -> Action {
        (self.on_command)(conn, command, out)
    }
}
