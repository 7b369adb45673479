//! Echo server built on the lineserver framework.
//!
//! Greets each admitted peer, echoes lines back, and closes the session
//! when the peer sends `quit`. Configuration comes from CLI arguments
//! or a TOML file; see `lineserver --help`.

use std::net::SocketAddr;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lineserver::config::Config;
use lineserver::{Service, TcpServer};

/// Per-connection echo conversation.
struct EchoService {
    peer: SocketAddr,
    running: bool,
}

impl Service for EchoService {
    fn open(&mut self) -> Option<String> {
        Some(format!(
            "hello {}! type something, 'quit' ends the session",
            self.peer
        ))
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn receive(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            self.running = false;
            Some("OK".to_string())
        } else {
            Some(format!("you said: '{line}'"))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        port = config.port,
        bind = ?config.bind_address,
        policy = ?config.default_policy,
        max_connections = ?config.max_connections,
        "starting echo server"
    );

    let factory = |peer: SocketAddr| -> Box<dyn Service> {
        Box::new(EchoService {
            peer,
            running: true,
        })
    };

    let server = TcpServer::new(config.server(), factory);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop();

    Ok(())
}
