//! Server-level error types.
//!
//! Only control-surface failures live here: a session's I/O errors are
//! contained inside the session task and logged, and a failed accept is
//! logged and retried, so neither surfaces as a typed error.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by [`TcpServer`](crate::TcpServer) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound; the server stays stopped.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `start()` was called on a server that is not stopped. A stopped
    /// instance never listens again; create a new one instead.
    #[error("server has already been started")]
    AlreadyStarted,
}
