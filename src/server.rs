//! TCP acceptor and server lifecycle.
//!
//! [`TcpServer`] owns the listening socket, the IP access list, and the
//! dispatch pool. `start()` binds the socket and spawns the accept loop
//! as its own task; each admitted connection is handed to the pool as a
//! session task. `stop()` ends the accept loop and releases the
//! listening socket while in-flight sessions run to completion.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::acl::{AclError, IpAccessList};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::pool::DispatchPool;
use crate::service::ServiceFactory;
use crate::session::{describe_connection, run_session};

/// Lifecycle of a server instance. A stopped instance never listens
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Listening,
    Stopping,
}

/// A line-oriented TCP server driving a [`ServiceFactory`].
pub struct TcpServer {
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the control surface and the accept loop.
struct Shared {
    config: ServerConfig,
    acl: IpAccessList,
    pool: DispatchPool,
    factory: Arc<dyn ServiceFactory>,
    state: Mutex<State>,
    shutdown: Notify,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpServer {
    /// Create a server that will serve connections with services built
    /// by `factory`. Nothing is bound until [`start`](Self::start).
    pub fn new<F>(config: ServerConfig, factory: F) -> Self
    where
        F: ServiceFactory + 'static,
    {
        let acl = IpAccessList::new(config.default_policy);
        let pool = DispatchPool::new(config.max_concurrency);

        TcpServer {
            shared: Arc::new(Shared {
                config,
                acl,
                pool,
                factory: Arc::new(factory),
                state: Mutex::new(State::Stopped),
                shutdown: Notify::new(),
                local_addr: Mutex::new(None),
            }),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind the listening socket and begin accepting connections on a
    /// background task. Returns without blocking once the socket is
    /// bound; fails with [`ServerError::Bind`] if it cannot be, leaving
    /// the server stopped.
    pub async fn start(&self) -> Result<(), ServerError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != State::Stopped {
                return Err(ServerError::AlreadyStarted);
            }
            *state = State::Listening;
        }

        let addr = SocketAddr::new(
            self.shared
                .config
                .bind_address
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            self.shared.config.port,
        );

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.shared.state.lock().unwrap() = State::Stopped;
                return Err(ServerError::Bind { addr, source: e });
            }
        };

        let local = match listener.local_addr() {
            Ok(local) => local,
            Err(e) => {
                *self.shared.state.lock().unwrap() = State::Stopped;
                return Err(ServerError::Bind { addr, source: e });
            }
        };
        *self.shared.local_addr.lock().unwrap() = Some(local);

        info!(address = %local, "server listening");

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(accept_loop(shared, listener));
        *self.accept_task.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop accepting connections and release the listening socket.
    ///
    /// In-flight sessions are not interrupted; they end on their own
    /// terms (service stop, peer disconnect, or I/O failure). Calling
    /// `stop` on a server that is not listening does nothing.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != State::Listening {
                return;
            }
            *state = State::Stopping;
        }
        self.shared.shutdown.notify_one();
    }

    /// True while the accept loop is running and the server is
    /// listening.
    pub fn is_alive(&self) -> bool {
        if *self.shared.state.lock().unwrap() != State::Listening {
            return false;
        }
        self.accept_task
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Append an access rule admitting (`allow = true`) or rejecting
    /// peers in `network`/`prefix`. Safe to call before or after
    /// `start`; the rule applies to connections accepted after it is
    /// installed.
    pub fn add_acl(&self, network: IpAddr, prefix: u8, allow: bool) -> Result<(), AclError> {
        self.shared.acl.add(network, prefix, allow)
    }

    /// Change the ceiling on concurrently served sessions. Takes effect
    /// for future scheduling; in-flight sessions are not disturbed.
    pub fn set_max_connections(&self, ceiling: std::num::NonZeroUsize) {
        self.shared.pool.resize(ceiling);
    }

    /// Address the listening socket is bound to, once started. Useful
    /// when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap()
    }
}

/// Accept connections until shutdown, consulting the access list and
/// dispatching admitted connections to the pool.
async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    if stopping(&shared) {
                        // Stop raced the accept; nothing is admitted
                        // once shutdown has begun.
                        drop(stream);
                        break;
                    }
                    if shared.acl.check(peer.ip()) {
                        debug!(conn = %describe_connection(&stream, peer), "accepting connection");
                        let factory = Arc::clone(&shared.factory);
                        shared.pool.submit(run_session(stream, peer, factory));
                    } else {
                        info!(conn = %describe_connection(&stream, peer), "rejecting connection");
                        drop(stream);
                    }
                }
                Err(e) => {
                    if stopping(&shared) {
                        break;
                    }
                    // A single failed accept must not take the server
                    // down.
                    error!(error = %e, "error accepting incoming connection");
                }
            }
        }
    }
    // The listener drops here, releasing the socket together with the
    // accept task.
}

fn stopping(shared: &Shared) -> bool {
    *shared.state.lock().unwrap() == State::Stopping
}
