//! lineserver: a line-oriented TCP server framework.
//!
//! The framework owns the accept loop, IP-based admission control, and
//! the lifecycle of each connection; callers plug in the protocol logic
//! through the [`Service`] contract, one instance per connection:
//!
//! - [`Service::open`] — the opening line, sent once at session start
//! - [`Service::is_running`] — polled between lines; `false` ends the session
//! - [`Service::receive`] — called with each received line, returns the reply
//!
//! The wire protocol is plain newline-terminated text in both
//! directions; framing, lifecycle sequencing, and socket cleanup are the
//! framework's job, protocol semantics are the service's.
//!
//! # Example
//!
//! ```no_run
//! use lineserver::{Service, ServerConfig, TcpServer};
//! use std::net::SocketAddr;
//!
//! struct Echo {
//!     running: bool,
//! }
//!
//! impl Service for Echo {
//!     fn open(&mut self) -> Option<String> {
//!         Some("type something; 'quit' ends the session".to_string())
//!     }
//!
//!     fn is_running(&self) -> bool {
//!         self.running
//!     }
//!
//!     fn receive(&mut self, line: &str) -> Option<String> {
//!         if line.trim() == "quit" {
//!             self.running = false;
//!             return Some("OK".to_string());
//!         }
//!         Some(format!("you said: '{line}'"))
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = |_peer: SocketAddr| -> Box<dyn Service> { Box::new(Echo { running: true }) };
//! let server = TcpServer::new(ServerConfig::new(2000), factory);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Known limitations
//!
//! Sessions have no timeout, and connections admitted beyond the
//! concurrency ceiling queue without bound, so a silent or misbehaving
//! peer can occupy a worker indefinitely and a flood of connections can
//! grow the pending queue. Callers needing stricter resource bounds
//! should enforce them in their [`Service`] or in front of the server.

pub mod acl;
pub mod config;
pub mod error;
pub mod pool;
pub mod server;
pub mod service;
mod session;

pub use acl::{AclError, IpAccessList, Policy};
pub use config::ServerConfig;
pub use error::ServerError;
pub use pool::DispatchPool;
pub use server::TcpServer;
pub use service::{Service, ServiceFactory};
