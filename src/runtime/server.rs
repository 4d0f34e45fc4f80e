//! Server bootstrap and lifecycle.
//!
//! Listeners are bound up front so the bound address is known (and port 0
//! works) before any worker starts. Each worker runs its own mio event loop
//! on its own thread. With `reuse_port` every worker gets its own
//! SO_REUSEPORT listener and the kernel spreads connections across them;
//! otherwise workers share clones of one listener.

use crate::config::{Config, ConfigError};
use crate::runtime::connection::ConnId;
use crate::runtime::handler::Handler;
use crate::runtime::mio::worker_loop;
use crate::runtime::session::{Hub, SessionOptions, SessionTable};
use mio::Waker;
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use thiserror::Error;
use tracing::{error, info};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot resolve listen address '{0}'")]
    Resolve(String),

    #[error("server is not running")]
    NotRunning,
}

/// State shared by every worker of one server.
pub(crate) struct Lifecycle {
    running: AtomicBool,
    wakers: Mutex<Vec<Arc<Waker>>>,
    next_conn_id: AtomicU64,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            wakers: Mutex::new(Vec::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Register a worker's waker. The worker must check `is_running`
    /// after registering.
    pub(crate) fn register_waker(&self, waker: Arc<Waker>) {
        self.wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(waker);
    }

    /// Stop the server. Returns false if it was already stopped.
    pub(crate) fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        let wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
        for waker in wakers.iter() {
            if let Err(e) = waker.wake() {
                error!(error = %e, "Failed to wake worker");
            }
        }
        true
    }

    pub(crate) fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stops a running server from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    lifecycle: Arc<Lifecycle>,
}

impl ServerHandle {
    /// Ask every worker to close its connections and exit.
    pub fn stop(&self) -> Result<(), ServerError> {
        if self.lifecycle.stop() {
            info!("Server stop requested");
            Ok(())
        } else {
            Err(ServerError::NotRunning)
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

/// A bound server, ready to run.
pub struct Server<H> {
    config: Config,
    hub: Arc<Hub<H>>,
    listeners: Vec<TcpListener>,
    local_addr: SocketAddr,
    lifecycle: Arc<Lifecycle>,
}

impl<H: Handler> Server<H> {
    /// Bind the listening sockets.
    pub fn bind(config: Config, handler: H) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config
            .listen
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ServerError::Resolve(config.listen.clone()))?;

        let num_workers = if config.workers == 0 {
            num_cpus()
        } else {
            config.workers
        };

        let first = create_listener(addr, &config)?;
        // Port 0 resolves here; the remaining listeners reuse it.
        let local_addr = first.local_addr()?;
        let mut listeners = Vec::with_capacity(num_workers);
        for _ in 1..num_workers {
            let listener = if config.reuse_port {
                create_listener(local_addr, &config)?
            } else {
                first.try_clone()?
            };
            listeners.push(listener);
        }
        listeners.insert(0, first);

        let table = Arc::new(SessionTable::new());
        let hub = Arc::new(Hub::new(handler, table, SessionOptions::from(&config)));

        info!(
            workers = num_workers,
            addr = %local_addr,
            reuse_port = config.reuse_port,
            dialect_policy = ?config.dialect_policy,
            "Server bound"
        );

        Ok(Self {
            config,
            hub,
            listeners,
            local_addr,
            lifecycle: Arc::new(Lifecycle::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Session table shared by all workers.
    pub fn sessions(&self) -> &Arc<SessionTable> {
        self.hub.table()
    }

    /// Run the workers and block until the server stops.
    pub fn run(self) -> Result<(), ServerError> {
        let mut handles = Vec::with_capacity(self.listeners.len());

        for (worker_id, listener) in self.listeners.into_iter().enumerate() {
            let config = self.config.clone();
            let hub = Arc::clone(&self.hub);
            let lifecycle = Arc::clone(&self.lifecycle);

            let spawned = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    if let Err(e) = worker_loop(worker_id, listener, &config, hub, &lifecycle) {
                        error!(worker = worker_id, error = %e, "Worker failed");
                        lifecycle.stop();
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.lifecycle.stop();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(e.into());
                }
            }
        }

        // Wait for all workers
        for handle in handles {
            let _ = handle.join();
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Bind and run a server until it is stopped.
pub fn listen_and_serve<H: Handler>(config: Config, handler: H) -> Result<(), ServerError> {
    Server::bind(config, handler)?.run()
}

/// Create a non-blocking TCP listener, optionally with SO_REUSEPORT.
fn create_listener(addr: SocketAddr, config: &Config) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    #[cfg(unix)]
    socket.set_reuse_port(config.reuse_port)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;

    Ok(socket.into())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
