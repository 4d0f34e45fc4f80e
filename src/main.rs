//! redframe demo server
//!
//! A small in-memory key-value server built on the redframe library. It
//! answers PING, ECHO, QUIT, SET, GET, DEL and a stub CONFIG GET (enough for
//! redis-cli and redis-benchmark) in any of the three request dialects.

use bytes::{Bytes, BytesMut};
use redframe::{
    append_array, append_bulk, append_bulk_string, append_error, append_int, append_null,
    append_ok, append_string, Action, Command, Config, Conn, Handler, Server,
};
use std::collections::HashMap;
use std::io;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Key-value handler backed by a shared map.
#[derive(Default)]
struct KvHandler {
    items: RwLock<HashMap<Bytes, Bytes>>,
}

impl KvHandler {
    fn wrong_arity(out: &mut BytesMut, command: &Command) {
        append_error(
            out,
            &format!(
                "ERR wrong number of arguments for '{}' command",
                String::from_utf8_lossy(command.name())
            ),
        );
    }
}

impl Handler for KvHandler {
    fn on_open(&self, conn: &Conn, _out: &mut BytesMut) -> Action {
        debug!(conn_id = conn.id.0, peer = %conn.peer_addr, "Client connected");
        Action::Continue
    }

    fn on_close(&self, conn: &Conn, err: Option<&io::Error>) -> Action {
        match err {
            Some(e) => debug!(conn_id = conn.id.0, error = %e, "Client disconnected"),
            None => debug!(conn_id = conn.id.0, "Client disconnected"),
        }
        Action::Continue
    }

    fn on_command(&self, _conn: &Conn, command: &Command, out: &mut BytesMut) -> Action {
        let args = &command.args;
        let name = command.name().to_ascii_lowercase();

        match name.as_slice() {
            b"ping" => match args.len() {
                1 => append_string(out, "PONG"),
                2 => append_bulk(out, &args[1]),
                _ => Self::wrong_arity(out, command),
            },
            b"echo" => match args.len() {
                2 => append_bulk(out, &args[1]),
                _ => Self::wrong_arity(out, command),
            },
            b"quit" => {
                append_ok(out);
                return Action::Close;
            }
            b"set" => {
                if args.len() != 3 {
                    Self::wrong_arity(out, command);
                } else {
                    let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
                    items.insert(args[1].clone(), args[2].clone());
                    append_ok(out);
                }
            }
            b"get" => {
                if args.len() != 2 {
                    Self::wrong_arity(out, command);
                } else {
                    let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
                    match items.get(&args[1]) {
                        Some(value) => append_bulk(out, value),
                        None => append_null(out),
                    }
                }
            }
            b"del" => {
                if args.len() < 2 {
                    Self::wrong_arity(out, command);
                } else {
                    let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
                    let removed = args[1..]
                        .iter()
                        .filter(|key| items.remove(*key).is_some())
                        .count();
                    append_int(out, removed as i64);
                }
            }
            b"config" => {
                // Blank reply, enough for redis-benchmark's CONFIG GET.
                if args.len() != 3 {
                    Self::wrong_arity(out, command);
                } else {
                    append_array(out, 2);
                    append_bulk(out, &args[2]);
                    append_bulk_string(out, "");
                }
            }
            _ => append_error(
                out,
                &format!(
                    "ERR unknown command '{}'",
                    String::from_utf8_lossy(command.name())
                ),
            ),
        }
        Action::Continue
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = config.workers,
        max_buffer_size = config.max_buffer_size,
        dialect_policy = ?config.dialect_policy,
        "Starting redframe server"
    );

    let server = Server::bind(config, KvHandler::default())?;
    info!(addr = %server.local_addr(), "Listening");
    server.run()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redframe::{frame, ConnId};

    fn run(handler: &KvHandler, input: &[u8]) -> (Vec<u8>, Action) {
        let conn = Conn::new(
            ConnId(1),
            "127.0.0.1:40000".parse().unwrap(),
            "127.0.0.1:6380".parse().unwrap(),
        );
        let framed = frame(input);
        assert!(framed.error.is_none());
        let mut out = BytesMut::new();
        let mut action = Action::Continue;
        for command in &framed.commands {
            action = handler.on_command(&conn, command, &mut out);
        }
        (out.to_vec(), action)
    }

    #[test]
    fn test_set_get_del() {
        let handler = KvHandler::default();
        let (out, _) = run(&handler, b"SET k v\nGET k\nDEL k missing\nGET k\n");
        assert_eq!(out, b"+OK\r\n$1\r\nv\r\n:1\r\n$-1\r\n");
    }

    #[test]
    fn test_ping_and_quit() {
        let handler = KvHandler::default();
        let (out, action) = run(&handler, b"*1\r\n$4\r\nping\r\n$4 QUIT\r\n");
        assert_eq!(out, b"+PONG\r\n+OK\r\n");
        assert_eq!(action, Action::Close);
    }

    #[test]
    fn test_errors() {
        let handler = KvHandler::default();
        let (out, _) = run(&handler, b"GET\n");
        assert_eq!(out, b"-ERR wrong number of arguments for 'GET' command\r\n");
        let (out, _) = run(&handler, b"FLUSHALL\n");
        assert_eq!(out, b"-ERR unknown command 'FLUSHALL'\r\n");
    }

    #[test]
    fn test_config_stub() {
        let handler = KvHandler::default();
        let (out, _) = run(&handler, b"CONFIG GET save\n");
        assert_eq!(out, b"*2\r\n$4\r\nsave\r\n$0\r\n\r\n");
    }
}
