//! Per-connection session loop.
//!
//! Drives an admitted connection through its [`Service`]: writes the
//! opening line, then alternates read/dispatch/write until the service
//! stops, the peer disconnects, or I/O fails. The socket is owned by the
//! session task and closed by drop on every exit path; a session failure
//! is logged and never propagated to the accept loop or other sessions.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, error};

use crate::service::{Service, ServiceFactory};

/// Run one session to completion. Never returns an error; failures end
/// only this session.
pub(crate) async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    factory: Arc<dyn ServiceFactory>,
) {
    let conn = describe_connection(&stream, peer);
    let mut service = factory.create(peer);
    let (reader, writer) = stream.into_split();

    match drive(BufReader::new(reader), writer, service.as_mut()).await {
        Ok(()) => debug!(conn = %conn, "connection closed"),
        Err(e) => error!(conn = %conn, error = %e, "error talking to peer"),
    }
    // Both halves drop here, closing the socket regardless of how the
    // loop exited.
}

/// The read/dispatch/write cycle, generic over the transport so it can
/// be exercised without a real socket.
async fn drive<R, W>(mut reader: R, mut writer: W, service: &mut dyn Service) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(greeting) = service.open() {
        write_line(&mut writer, &greeting).await?;
    }

    let mut line = String::new();
    while service.is_running() {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            // Peer closed the connection.
            break;
        }

        strip_terminator(&mut line);
        if let Some(reply) = service.receive(&line) {
            write_line(&mut writer, &reply).await?;
        }
    }
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Remove the trailing newline (and carriage return, if any). The rest
/// of the line is passed to the service as received.
fn strip_terminator(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Peer/local pair for log lines.
pub(crate) fn describe_connection(stream: &TcpStream, peer: SocketAddr) -> String {
    match stream.local_addr() {
        Ok(local) => format!("from {peer} to {local}"),
        Err(_) => format!("from {peer}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::task::JoinHandle;

    /// Service that greets, echoes, and stops after a set number of
    /// received lines.
    struct ScriptedService {
        greeting: Option<String>,
        remaining: usize,
        opened: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<String>>>,
    }

    impl Service for ScriptedService {
        fn open(&mut self) -> Option<String> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.greeting.clone()
        }

        fn is_running(&self) -> bool {
            self.remaining > 0
        }

        fn receive(&mut self, line: &str) -> Option<String> {
            self.received.lock().unwrap().push(line.to_string());
            self.remaining -= 1;
            Some(format!("echo: {line}"))
        }
    }

    struct Harness {
        client: tokio::io::DuplexStream,
        opened: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<String>>>,
        session: JoinHandle<io::Result<()>>,
    }

    fn start(greeting: Option<&str>, remaining: usize) -> Harness {
        let opened = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let mut service = ScriptedService {
            greeting: greeting.map(String::from),
            remaining,
            opened: Arc::clone(&opened),
            received: Arc::clone(&received),
        };

        let (server, client) = tokio::io::duplex(1024);
        let session = tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            drive(BufReader::new(reader), writer, &mut service).await
        });

        Harness {
            client,
            opened,
            received,
            session,
        }
    }

    async fn read_line(client: &mut tokio::io::DuplexStream) -> String {
        let mut reader = tokio::io::BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_greeting_written_before_any_input() {
        let mut h = start(Some("welcome"), 1);
        assert_eq!(read_line(&mut h.client).await, "welcome\n");
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
        drop(h.client);
        h.session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_round_trip_is_exact() {
        let mut h = start(None, 2);
        h.client.write_all(b"hello\n").await.unwrap();
        assert_eq!(read_line(&mut h.client).await, "echo: hello\n");
        drop(h.client);
        h.session.await.unwrap().unwrap();
        assert_eq!(*h.received.lock().unwrap(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_crlf_terminator_stripped() {
        let mut h = start(None, 1);
        h.client.write_all(b"hi there\r\n").await.unwrap();
        assert_eq!(read_line(&mut h.client).await, "echo: hi there\n");
        h.session.await.unwrap().unwrap();
        assert_eq!(*h.received.lock().unwrap(), vec!["hi there"]);
    }

    #[tokio::test]
    async fn test_session_closes_after_service_stops() {
        let mut h = start(None, 1);
        h.client.write_all(b"one\ntwo\n").await.unwrap();
        assert_eq!(read_line(&mut h.client).await, "echo: one\n");

        // The service stopped after one line; the second is never read.
        h.session.await.unwrap().unwrap();
        assert_eq!(*h.received.lock().unwrap(), vec!["one"]);

        let mut rest = Vec::new();
        h.client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_peer_disconnect_ends_session() {
        let h = start(None, 5);
        drop(h.client);
        h.session.await.unwrap().unwrap();
        assert!(h.received.lock().unwrap().is_empty());
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_service_never_receives() {
        let mut h = start(Some("bye"), 0);
        assert_eq!(read_line(&mut h.client).await, "bye\n");
        h.client.write_all(b"ignored\n").await.unwrap();
        h.session.await.unwrap().unwrap();
        assert!(h.received.lock().unwrap().is_empty());
    }

    /// Service replies only to every second line.
    struct QuietService {
        count: usize,
    }

    impl Service for QuietService {
        fn open(&mut self) -> Option<String> {
            None
        }

        fn is_running(&self) -> bool {
            true
        }

        fn receive(&mut self, _line: &str) -> Option<String> {
            self.count += 1;
            if self.count % 2 == 0 {
                Some("ack".to_string())
            } else {
                None
            }
        }
    }

    #[tokio::test]
    async fn test_none_reply_sends_nothing() {
        let (server, mut client) = tokio::io::duplex(1024);
        let session = tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            let mut service = QuietService { count: 0 };
            drive(BufReader::new(reader), writer, &mut service).await
        });

        client.write_all(b"first\nsecond\n").await.unwrap();
        // Only the second line draws a reply.
        assert_eq!(read_line(&mut client).await, "ack\n");
        drop(client);
        session.await.unwrap().unwrap();
    }
}
