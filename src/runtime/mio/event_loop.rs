//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Each readable event drains the socket into the worker's read buffer and
//! feeds every chunk to the session hub. Replies collect in the
//! connection's outbound buffer and are written until the socket would
//! block; WRITABLE interest is only held while output is pending.

use crate::config::Config;
use crate::runtime::connection::Conn;
use crate::runtime::handler::{Action, Handler};
use crate::runtime::server::Lifecycle;
use crate::runtime::session::Hub;
use bytes::{Buf, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Per-worker connection state for mio backend.
struct MioConnection {
    stream: TcpStream,
    conn: Conn,
    /// Reply bytes not yet accepted by the socket.
    outbound: BytesMut,
    /// Close once `outbound` is flushed; further input is ignored.
    close_after_flush: bool,
    interest: Interest,
}

struct Worker<'a, H> {
    id: usize,
    config: &'a Config,
    poll: Poll,
    listener: TcpListener,
    connections: Slab<MioConnection>,
    read_buf: Vec<u8>,
    hub: Arc<Hub<H>>,
    lifecycle: &'a Lifecycle,
}

/// Run one worker until the server stops.
pub(crate) fn worker_loop<H: Handler>(
    worker_id: usize,
    listener: std::net::TcpListener,
    config: &Config,
    hub: Arc<Hub<H>>,
    lifecycle: &Lifecycle,
) -> io::Result<()> {
    let mut events = Events::with_capacity(config.batch_size);
    let mut worker = Worker::new(worker_id, listener, config, hub, lifecycle)?;

    info!(
        worker = worker_id,
        read_buffer_cap = config.read_buffer_cap,
        max_connections = config.max_connections,
        "Worker started"
    );

    while lifecycle.is_running() {
        match worker.poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                WAKER_TOKEN => {}
                LISTENER_TOKEN => worker.accept_connections()?,
                Token(key) => {
                    if let Err(e) = worker.handle_connection_event(key, event) {
                        debug!(conn_id = key, error = %e, "Connection error");
                        worker.close_connection(key, Some(e));
                    }
                }
            }
        }
    }

    worker.shutdown();
    info!(worker = worker_id, "Worker stopped");
    Ok(())
}

impl<'a, H: Handler> Worker<'a, H> {
    fn new(
        id: usize,
        listener: std::net::TcpListener,
        config: &'a Config,
        hub: Arc<Hub<H>>,
        lifecycle: &'a Lifecycle,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;

        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        lifecycle.register_waker(waker);

        Ok(Self {
            id,
            config,
            poll,
            listener,
            connections: Slab::with_capacity(config.max_connections.min(1024)),
            read_buf: vec![0; config.read_buffer_cap],
            hub,
            lifecycle,
        })
    }

    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!(worker = self.id, peer = %peer_addr, "Connection limit reached");
                        continue;
                    }

                    if let Err(e) = configure_stream(&stream, self.config) {
                        warn!(peer = %peer_addr, error = %e, "Failed to set socket options");
                    }
                    let local_addr = match stream.local_addr() {
                        Ok(addr) => addr,
                        Err(e) => {
                            warn!(peer = %peer_addr, error = %e, "Dropping connection");
                            continue;
                        }
                    };

                    let conn = Conn::new(self.lifecycle.next_conn_id(), peer_addr, local_addr);
                    let entry = self.connections.vacant_entry();
                    let key = entry.key();
                    self.poll
                        .registry()
                        .register(&mut stream, Token(key), Interest::READABLE)?;

                    let (outbound, action) = self.hub.on_open(&conn);
                    debug!(
                        worker = self.id,
                        conn_id = conn.id.0,
                        peer = %peer_addr,
                        "Accepted connection"
                    );
                    entry.insert(MioConnection {
                        stream,
                        conn,
                        outbound,
                        close_after_flush: false,
                        interest: Interest::READABLE,
                    });

                    self.apply_action(key, action);
                    if let Err(e) = self.flush(key) {
                        self.close_connection(key, Some(e));
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(worker = self.id, error = %e, "Accept error");
                    break;
                }
            }
        }
        Ok(())
    }

    fn handle_connection_event(&mut self, key: usize, event: &mio::event::Event) -> io::Result<()> {
        if !self.connections.contains(key) {
            return Ok(());
        }

        if event.is_readable() || event.is_read_closed() {
            self.handle_readable(key)?;
        }

        // Re-check connection exists (may have been removed)
        if self.connections.contains(key) && event.is_writable() {
            self.flush(key)?;
        }

        Ok(())
    }

    fn handle_readable(&mut self, key: usize) -> io::Result<()> {
        let mut eof = false;

        {
            let Some(conn) = self.connections.get_mut(key) else {
                return Ok(());
            };

            while !conn.close_after_flush {
                let n = match conn.stream.read(&mut self.read_buf) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };

                trace!(conn_id = conn.conn.id.0, bytes = n, "Read");
                let traffic = self.hub.on_traffic(&conn.conn, &self.read_buf[..n]);
                conn.outbound.unsplit(traffic.out);

                match traffic.action {
                    Action::Continue => {}
                    Action::Close => conn.close_after_flush = true,
                    Action::Shutdown => {
                        conn.close_after_flush = true;
                        self.lifecycle.stop();
                    }
                }
                if traffic.error.is_some() && self.config.close_on_protocol_error {
                    conn.close_after_flush = true;
                }
            }
        }

        if eof {
            // The peer may still read after a half-close.
            let err = self.flush(key).err();
            if let Some(e) = &err {
                trace!(conn_id = key, error = %e, "Flush after EOF failed");
            }
            self.close_connection(key, err);
            return Ok(());
        }

        self.flush(key)
    }

    /// Write pending output until done or the socket would block.
    fn flush(&mut self, key: usize) -> io::Result<()> {
        let Some(conn) = self.connections.get_mut(key) else {
            return Ok(());
        };

        while !conn.outbound.is_empty() {
            match conn.stream.write(&conn.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => conn.outbound.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if conn.outbound.is_empty() && conn.close_after_flush {
            self.close_connection(key, None);
            return Ok(());
        }

        let wanted = if conn.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted != conn.interest {
            self.poll
                .registry()
                .reregister(&mut conn.stream, Token(key), wanted)?;
            conn.interest = wanted;
        }
        Ok(())
    }

    fn apply_action(&mut self, key: usize, action: Action) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        match action {
            Action::Continue => {}
            Action::Close => conn.close_after_flush = true,
            Action::Shutdown => {
                conn.close_after_flush = true;
                self.lifecycle.stop();
            }
        }
    }

    fn close_connection(&mut self, key: usize, err: Option<io::Error>) {
        if let Some(mut conn) = self.connections.try_remove(key) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            if self.hub.on_close(&conn.conn, err.as_ref()) == Action::Shutdown {
                self.lifecycle.stop();
            }
            debug!(conn_id = conn.conn.id.0, "Connection closed");
        }
    }

    /// Flush what can be flushed and close every connection.
    fn shutdown(&mut self) {
        let keys: Vec<usize> = self.connections.iter().map(|(key, _)| key).collect();
        for key in keys {
            if let Some(conn) = self.connections.get_mut(key) {
                conn.close_after_flush = true;
            }
            if let Err(e) = self.flush(key) {
                trace!(conn_id = key, error = %e, "Flush on shutdown failed");
            }
            self.close_connection(key, None);
        }
    }
}

/// Apply per-connection socket options.
fn configure_stream(stream: &TcpStream, config: &Config) -> io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    let sock = socket2::SockRef::from(stream);
    if config.tcp_keepalive > 0 {
        let keepalive =
            socket2::TcpKeepalive::new().with_time(Duration::from_secs(config.tcp_keepalive));
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        let keepalive = {
            let mut keepalive = keepalive;
            if config.tcp_keep_interval > 0 {
                keepalive = keepalive.with_interval(Duration::from_secs(config.tcp_keep_interval));
            }
            if config.tcp_keep_count > 0 {
                keepalive = keepalive.with_retries(config.tcp_keep_count);
            }
            keepalive
        };
        sock.set_tcp_keepalive(&keepalive)?;
    }
    if config.socket_recv_buffer > 0 {
        sock.set_recv_buffer_size(config.socket_recv_buffer)?;
    }
    if config.socket_send_buffer > 0 {
        sock.set_send_buffer_size(config.socket_send_buffer)?;
    }
    Ok(())
}
