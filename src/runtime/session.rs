//! Per-connection sessions.
//!
//! A session owns the bytes a connection has sent that do not yet form a
//! complete command, and the commands framed but not yet handed to the
//! handler. The [`Hub`] drives sessions from engine callbacks:
//!
//! ```text
//! Idle --data--> Accumulating --all input framed--> Dispatching --> Idle
//!                     |                                  |
//!                     +-- partial request: wait          +-- Close/Shutdown --> Closing
//! ```
//!
//! Commands are dispatched only once a read leaves no unframed bytes, so a
//! pipelined batch is answered with a single write.

use crate::config::{Config, DialectPolicy};
use crate::protocols::command::{frame, frame_pinned, Command, Dialect, Framed, ProtocolError};
use crate::protocols::resp::writer::append_error;
use crate::runtime::connection::{Conn, ConnId};
use crate::runtime::handler::{Action, Handler};
use bytes::{Buf, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, trace};

/// Where a session is in its read/dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing buffered, nothing pending.
    #[default]
    Idle,
    /// Holding a partial request.
    Accumulating,
    /// Handing pending commands to the handler.
    Dispatching,
    /// A handler asked for the connection to close.
    Closing,
}

/// Buffered state of one connection.
#[derive(Debug, Default)]
pub struct ConnectionBuffer {
    accumulated: BytesMut,
    pending: VecDeque<Command>,
    dialect: Option<Dialect>,
    state: SessionState,
}

impl ConnectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bytes received but not yet framed.
    pub fn buffered_len(&self) -> usize {
        self.accumulated.len()
    }

    /// Commands framed but not yet dispatched.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Dialect pinned for this connection, if any.
    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    /// Answer malformed input with one error reply and drop the unframed
    /// bytes. Commands queued before this read are kept.
    fn reject(&mut self, mut traffic: Traffic, err: ProtocolError) -> Traffic {
        append_error(&mut traffic.out, &format!("ERR {err}"));
        self.accumulated.clear();
        self.state = if self.pending.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Accumulating
        };
        traffic.error = Some(err);
        traffic
    }
}

pub type SharedBuffer = Arc<Mutex<ConnectionBuffer>>;

/// Connection id to session lookup.
///
/// Opens and closes take the write lock; traffic only needs the read lock
/// to find its session. Each session has its own mutex, which is never
/// contended since a connection's events are processed one at a time.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: RwLock<HashMap<ConnId, SharedBuffer>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session, replacing any previous one for `id`.
    pub fn insert(&self, id: ConnId) -> SharedBuffer {
        let buffer = Arc::new(Mutex::new(ConnectionBuffer::new()));
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.insert(id, Arc::clone(&buffer));
        buffer
    }

    pub fn get(&self, id: ConnId) -> Option<SharedBuffer> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).cloned()
    }

    pub fn remove(&self, id: ConnId) -> Option<SharedBuffer> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session behavior knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Maximum unframed bytes per connection, 0 for no limit.
    pub max_buffer_size: usize,
    pub dialect_policy: DialectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions::from(&Config::default())
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_buffer_size: config.max_buffer_size,
            dialect_policy: config.dialect_policy,
        }
    }
}

/// Result of processing one chunk of inbound data.
#[derive(Debug, Default)]
pub struct Traffic {
    /// Bytes to write back to the client.
    pub out: BytesMut,
    pub action: Action,
    /// Set when the input was malformed. `out` then holds the error reply.
    pub error: Option<ProtocolError>,
}

/// Connects engine callbacks to sessions and the application handler.
pub struct Hub<H> {
    handler: H,
    table: Arc<SessionTable>,
    options: SessionOptions,
}

impl<H: Handler> Hub<H> {
    pub fn new(handler: H, table: Arc<SessionTable>, options: SessionOptions) -> Self {
        Self {
            handler,
            table,
            options,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// A connection was accepted.
    pub fn on_open(&self, conn: &Conn) -> (BytesMut, Action) {
        self.table.insert(conn.id);
        let mut out = BytesMut::new();
        let action = self.handler.on_open(conn, &mut out);
        (out, action)
    }

    /// A connection closed. Commands still queued are dropped.
    pub fn on_close(&self, conn: &Conn, err: Option<&io::Error>) -> Action {
        if let Some(buffer) = self.table.remove(conn.id) {
            let buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
            if !buffer.pending.is_empty() {
                trace!(
                    conn_id = conn.id.0,
                    dropped = buffer.pending.len(),
                    "Dropping undispatched commands"
                );
            }
        }
        self.handler.on_close(conn, err)
    }

    /// Process bytes read from a connection.
    pub fn on_traffic(&self, conn: &Conn, data: &[u8]) -> Traffic {
        let mut traffic = Traffic::default();

        let Some(buffer) = self.table.get(conn.id) else {
            append_error(&mut traffic.out, "ERR Client is closed");
            return traffic;
        };
        if data.is_empty() {
            return traffic;
        }

        let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let session = &mut *guard;

        session.state = SessionState::Accumulating;
        session.accumulated.extend_from_slice(data);

        let pinned = match self.options.dialect_policy {
            DialectPolicy::Redetect => None,
            DialectPolicy::Pinned => {
                let first = Dialect::detect(session.accumulated[0]);
                Some(*session.dialect.get_or_insert(first))
            }
        };

        let Framed {
            commands,
            consumed,
            error,
            ..
        } = match pinned {
            Some(dialect) => frame_pinned(&session.accumulated, dialect),
            None => frame(&session.accumulated),
        };

        if let Some(err) = error {
            debug!(conn_id = conn.id.0, error = %err, "Protocol error");
            return session.reject(traffic, err);
        }

        session.pending.extend(commands);
        session.accumulated.advance(consumed);

        let limit = self.options.max_buffer_size;
        if limit > 0 && session.accumulated.len() > limit {
            let err = ProtocolError::BufferLimit {
                size: session.accumulated.len(),
                max: limit,
            };
            debug!(conn_id = conn.id.0, error = %err, "Request buffer limit exceeded");
            return session.reject(traffic, err);
        }

        if !session.accumulated.is_empty() {
            return traffic;
        }

        session.state = SessionState::Dispatching;
        while let Some(command) = session.pending.pop_front() {
            let action = self.handler.on_command(conn, &command, &mut traffic.out);
            if action != Action::Continue {
                if !session.pending.is_empty() {
                    trace!(
                        conn_id = conn.id.0,
                        dropped = session.pending.len(),
                        action = ?action,
                        "Stopping dispatch"
                    );
                }
                session.pending.clear();
                session.state = SessionState::Closing;
                traffic.action = action;
                return traffic;
            }
        }

        session.state = SessionState::Idle;
        traffic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::resp::writer::{append_bulk, append_int, append_ok, append_string};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        closed: Mutex<Vec<ConnId>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Handler for Recorder {
        fn on_open(&self, _conn: &Conn, out: &mut BytesMut) -> Action {
            append_string(out, "HELLO");
            Action::Continue
        }

        fn on_close(&self, conn: &Conn, _err: Option<&io::Error>) -> Action {
            self.closed.lock().unwrap().push(conn.id);
            Action::Continue
        }

        fn on_command(&self, _conn: &Conn, command: &Command, out: &mut BytesMut) -> Action {
            let name = String::from_utf8_lossy(command.name()).to_uppercase();
            self.seen.lock().unwrap().push(name.clone());
            match name.as_str() {
                "PING" => {
                    append_string(out, "PONG");
                    Action::Continue
                }
                "QUIT" => {
                    append_ok(out);
                    Action::Close
                }
                "SHUTDOWN" => {
                    append_ok(out);
                    Action::Shutdown
                }
                "ECHO" => {
                    match command.arg(1) {
                        Some(arg) => append_bulk(out, arg),
                        None => append_error(out, "ERR wrong number of arguments"),
                    }
                    Action::Continue
                }
                _ => {
                    append_int(out, command.args.len() as i64);
                    Action::Continue
                }
            }
        }
    }

    fn conn(id: u64) -> Conn {
        Conn::new(
            ConnId(id),
            "127.0.0.1:50000".parse().unwrap(),
            "127.0.0.1:6380".parse().unwrap(),
        )
    }

    fn hub_with(options: SessionOptions) -> Hub<Recorder> {
        Hub::new(Recorder::default(), Arc::new(SessionTable::new()), options)
    }

    fn hub() -> Hub<Recorder> {
        hub_with(SessionOptions::default())
    }

    fn session_of(hub: &Hub<Recorder>, conn: &Conn) -> SharedBuffer {
        match hub.table().get(conn.id) {
            Some(buffer) => buffer,
            None => panic!("Expected session for {}", conn.id),
        }
    }

    #[test]
    fn test_open_and_close() {
        let hub = hub();
        let c = conn(1);

        let (out, action) = hub.on_open(&c);
        assert_eq!(&out[..], b"+HELLO\r\n");
        assert_eq!(action, Action::Continue);
        assert_eq!(hub.table().len(), 1);

        assert_eq!(hub.on_close(&c, None), Action::Continue);
        assert!(hub.table().is_empty());
        assert_eq!(*hub.handler().closed.lock().unwrap(), vec![ConnId(1)]);
    }

    #[test]
    fn test_traffic_for_unknown_connection() {
        let hub = hub();
        let traffic = hub.on_traffic(&conn(9), b"PING\r\n");
        assert_eq!(&traffic.out[..], b"-ERR Client is closed\r\n");
        assert_eq!(traffic.action, Action::Continue);
        assert!(hub.handler().seen().is_empty());
    }

    #[test]
    fn test_pipelined_commands_answered_together() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(&traffic.out[..], b"+PONG\r\n+PONG\r\n");
        assert_eq!(traffic.action, Action::Continue);
        assert!(traffic.error.is_none());
        assert_eq!(
            session_of(&hub, &c).lock().unwrap().state(),
            SessionState::Idle
        );
    }

    #[test]
    fn test_partial_request_waits_for_more_data() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"*2\r\n$4\r\nECHO\r\n$5\r\nhel");
        assert!(traffic.out.is_empty());
        {
            let session = session_of(&hub, &c);
            let session = session.lock().unwrap();
            assert_eq!(session.state(), SessionState::Accumulating);
            assert_eq!(session.buffered_len(), 21);
        }

        let traffic = hub.on_traffic(&c, b"lo\r\n");
        assert_eq!(&traffic.out[..], b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_dispatch_waits_until_input_is_fully_framed() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"PING\r\n*1\r\n$4\r\nPI");
        assert!(traffic.out.is_empty());
        assert_eq!(session_of(&hub, &c).lock().unwrap().pending_len(), 1);

        let traffic = hub.on_traffic(&c, b"NG\r\n");
        assert_eq!(&traffic.out[..], b"+PONG\r\n+PONG\r\n");
        assert_eq!(hub.handler().seen(), vec!["PING", "PING"]);
    }

    #[test]
    fn test_protocol_error_reply() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"*-2\r\n");
        assert_eq!(
            &traffic.out[..],
            b"-ERR Protocol error: invalid multibulk length\r\n"
        );
        assert_eq!(traffic.error, Some(ProtocolError::InvalidMultiBulkLength));
        assert_eq!(traffic.action, Action::Continue);
        assert_eq!(session_of(&hub, &c).lock().unwrap().buffered_len(), 0);

        // The session is usable again once the bad bytes are gone.
        let traffic = hub.on_traffic(&c, b"PING\n");
        assert_eq!(&traffic.out[..], b"+PONG\r\n");
    }

    #[test]
    fn test_protocol_error_does_not_dispatch_same_read() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"PING\nSET \"a\n");
        assert_eq!(
            &traffic.out[..],
            b"-ERR Protocol error: unbalanced quotes in request\r\n"
        );
        assert!(hub.handler().seen().is_empty());
    }

    #[test]
    fn test_close_stops_dispatch() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"PING\r\nQUIT\r\nPING\r\n");
        assert_eq!(&traffic.out[..], b"+PONG\r\n+OK\r\n");
        assert_eq!(traffic.action, Action::Close);
        assert_eq!(hub.handler().seen(), vec!["PING", "QUIT"]);

        let session = session_of(&hub, &c);
        let session = session.lock().unwrap();
        assert_eq!(session.state(), SessionState::Closing);
        assert_eq!(session.pending_len(), 0);
    }

    #[test]
    fn test_shutdown_propagates() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"SHUTDOWN\n");
        assert_eq!(traffic.action, Action::Shutdown);
        assert_eq!(&traffic.out[..], b"+OK\r\n");
    }

    #[test]
    fn test_buffer_limit() {
        let hub = hub_with(SessionOptions {
            max_buffer_size: 16,
            dialect_policy: DialectPolicy::Redetect,
        });
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"*1\r\n$100\r\n0123456789abcdef");
        assert_eq!(
            traffic.error,
            Some(ProtocolError::BufferLimit { size: 26, max: 16 })
        );
        let expected = b"-ERR Protocol error: request buffer";
        assert!(traffic.out.starts_with(expected));
        assert_eq!(session_of(&hub, &c).lock().unwrap().buffered_len(), 0);
    }

    #[test]
    fn test_pinned_dialect() {
        let hub = hub_with(SessionOptions {
            max_buffer_size: 0,
            dialect_policy: DialectPolicy::Pinned,
        });
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(&traffic.out[..], b"+PONG\r\n");
        assert_eq!(
            session_of(&hub, &c).lock().unwrap().dialect(),
            Some(Dialect::Resp)
        );

        let traffic = hub.on_traffic(&c, b"PING\r\n");
        assert_eq!(
            traffic.error,
            Some(ProtocolError::DialectMismatch {
                expected: Dialect::Resp,
                found: Dialect::PlainText,
            })
        );
    }

    #[test]
    fn test_redetect_accepts_dialect_change() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        let traffic = hub.on_traffic(&c, b"*1\r\n$4\r\nPING\r\n");
        assert_eq!(&traffic.out[..], b"+PONG\r\n");
        let traffic = hub.on_traffic(&c, b"$9 ECHO text\r\nPING\n");
        assert_eq!(&traffic.out[..], b"$4\r\ntext\r\n+PONG\r\n");
    }

    #[test]
    fn test_close_discards_pending() {
        let hub = hub();
        let c = conn(1);
        hub.on_open(&c);

        hub.on_traffic(&c, b"PING\r\n*1\r\n");
        assert_eq!(session_of(&hub, &c).lock().unwrap().pending_len(), 1);

        hub.on_close(&c, None);
        assert!(hub.table().get(c.id).is_none());
        assert!(hub.handler().seen().is_empty());
    }
}
