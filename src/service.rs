//! The pluggable per-connection protocol contract.
//!
//! A [`Service`] supplies the application logic for one session: it is
//! asked for an opening line once, then handed each received line in
//! turn, and polled between lines for whether the conversation should
//! continue. The framework owns framing and the socket; the service
//! never sees I/O.

use std::net::SocketAddr;

/// Application logic for a single session.
///
/// One instance is created per admitted connection and never shared.
/// Returning `None` from [`open`](Self::open) or
/// [`receive`](Self::receive) means "send nothing this turn"; ending the
/// session is signalled through [`is_running`](Self::is_running) instead.
pub trait Service: Send {
    /// Called once when the session starts. A `Some` line is written to
    /// the peer, newline-terminated.
    fn open(&mut self) -> Option<String>;

    /// Checked before each read; returning `false` ends the session.
    fn is_running(&self) -> bool;

    /// Called with each line received from the peer, stripped of its
    /// newline terminator but otherwise untouched. A `Some` reply is
    /// written back, newline-terminated.
    fn receive(&mut self, line: &str) -> Option<String>;
}

/// Creates a fresh [`Service`] for each admitted connection.
pub trait ServiceFactory: Send + Sync {
    /// Build the service that will drive the session with `peer`.
    fn create(&self, peer: SocketAddr) -> Box<dyn Service>;
}

impl<F> ServiceFactory for F
where
    F: Fn(SocketAddr) -> Box<dyn Service> + Send + Sync,
{
    fn create(&self, peer: SocketAddr) -> Box<dyn Service> {
        self(peer)
    }
}
