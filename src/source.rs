//! Source Acceptor — push-mode base station ingest
//!
//! A base station that pushes corrections speaks the legacy NTRIP 1.0
//! `SOURCE <password> <mountpoint>` method instead of the client GET
//! handshake the Upstream Client performs. This module owns that exchange:
//! the Listener has already peeked the connection and routed it here, and
//! has reserved the station's [`SourceSlot`] on our behalf (spec §8: the
//! test-and-set itself happens at dispatch time so a burst of concurrent
//! `SOURCE` attempts can never both be admitted). We just have to hold the
//! slot for the life of the connection and release it on every exit path,
//! which the RAII [`SlotGuard`] guarantees.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::PushConfig;
use crate::hub::Hub;
use crate::slot::SlotGuard;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_BUF_LEN: usize = 2048;

/// Handle one accepted `SOURCE` connection to completion.
///
/// `prefetched` is whatever bytes the Listener already read off the socket
/// while peeking to decide how to route it; they are the start of the
/// `SOURCE` request line and must be treated as already consumed from the
/// stream.
pub async fn run(
    mut sock: TcpStream,
    prefetched: Vec<u8>,
    config: &PushConfig,
    mountpoint: &str,
    hub: &Hub,
    guard: SlotGuard,
) {
    match handshake(&mut sock, prefetched, config).await {
        Ok(()) => {},
        Err(e) => {
            warn!("source handshake rejected: {e}");
            drop(guard);
            return;
        },
    }

    debug!("source attached to {mountpoint}, resetting hub baseline");
    hub.reset();

    if let Err(e) = sock.write_all(b"ICY 200 OK\r\n\r\n").await {
        warn!("failed to write source handshake ack: {e}");
        drop(guard);
        return;
    }

    pump(sock, hub).await;
    drop(guard);
    debug!("source detached from {mountpoint}");
}

enum HandshakeError {
    Io(std::io::Error),
    Timeout,
    Malformed,
    BadPassword,
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::Io(e) => write!(f, "io error: {e}"),
            HandshakeError::Timeout => write!(f, "timed out waiting for SOURCE request"),
            HandshakeError::Malformed => write!(f, "malformed SOURCE request line"),
            HandshakeError::BadPassword => write!(f, "incorrect source password"),
        }
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(e: std::io::Error) -> Self {
        HandshakeError::Io(e)
    }
}

/// Read (if necessary) and validate the `SOURCE <password>` request line
/// (a trailing mountpoint token, if present, is ignored — the Listener has
/// already routed this connection to the right station), replying
/// `401`/`400` on failure. On success, nothing has been written to the
/// socket yet; the caller sends `ICY 200 OK` itself so it can reset the hub
/// first.
async fn handshake(
    sock: &mut TcpStream,
    prefetched: Vec<u8>,
    config: &PushConfig,
) -> Result<(), HandshakeError> {
    let mut buf = prefetched;
    buf.resize(REQUEST_BUF_LEN, 0);
    let mut filled = 0usize;

    // The Listener's peek only guarantees a handful of bytes; keep reading
    // until we have a full request line or hit the deadline.
    loop {
        if let Some(line) = first_line(&buf[..filled]) {
            return validate_request_line(line, config, sock).await;
        }

        if filled >= buf.len() {
            reply(sock, "400 Bad Request", "Malformed SOURCE request")
                .await
                .ok();
            return Err(HandshakeError::Malformed);
        }

        let n = tokio::time::timeout(HANDSHAKE_TIMEOUT, sock.read(&mut buf[filled..]))
            .await
            .map_err(|_| HandshakeError::Timeout)??;
        if n == 0 {
            return Err(HandshakeError::Malformed);
        }
        filled += n;
    }
}

fn first_line(buf: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(buf).ok()?;
    text.split_once('\n').map(|(line, _)| line.trim_end_matches('\r'))
}

async fn validate_request_line(
    line: &str,
    config: &PushConfig,
    sock: &mut TcpStream,
) -> Result<(), HandshakeError> {
    let mut parts = line.split_whitespace();
    let method = parts.next();
    let password = parts.next();

    if method != Some("SOURCE") {
        reply(sock, "400 Bad Request", "Use SOURCE method").await.ok();
        return Err(HandshakeError::Malformed);
    }

    let Some(password) = password else {
        reply(sock, "400 Bad Request", "Malformed SOURCE request")
            .await
            .ok();
        return Err(HandshakeError::Malformed);
    };

    if password != config.source_password {
        reply(sock, "401 Unauthorized", "Bad Password").await.ok();
        return Err(HandshakeError::BadPassword);
    }

    Ok(())
}

async fn reply(sock: &mut TcpStream, status: &str, error_detail: &str) -> std::io::Result<()> {
    sock.write_all(format!("HTTP/1.1 {status}\r\n\r\nERROR - {error_detail}\r\n").as_bytes())
        .await?;
    sock.flush().await
}

/// Pump bytes from the source socket to the hub until EOF or error.
async fn pump(mut sock: TcpStream, hub: &Hub) {
    let mut buf = vec![0u8; 4096];
    loop {
        let read = tokio::time::timeout(READ_TIMEOUT, sock.read(&mut buf)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("source socket error: {e}");
                return;
            },
            Err(_) => {
                warn!("source sent no data for {READ_TIMEOUT:?}, disconnecting");
                return;
            },
        };
        if n == 0 {
            debug!("source closed the connection");
            return;
        }
        hub.publish(buf[..n].to_vec().into_boxed_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SourceSlot;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    fn push_config() -> PushConfig {
        PushConfig {
            source_password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn accepts_valid_source_and_relays_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut sock = TcpStream::connect(addr).await.unwrap();
            sock.write_all(b"SOURCE secret MP\r\n").await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ICY 200 OK\r\n\r\n");
            sock.write_all(b"RTCMDATA").await.unwrap();
            sock.shutdown().await.unwrap();
        });

        let (sock, _) = listener.accept().await.unwrap();
        let hub = Hub::new(10);
        let cursor = hub.subscribe();
        let slot = SourceSlot::new();
        let guard = slot.try_acquire().unwrap();
        let config = push_config();

        run(sock, Vec::new(), &config, "MP", &hub, guard).await;
        client.await.unwrap();

        assert!(!slot.is_occupied());

        match hub.next(&cursor, Duration::from_millis(100)).await {
            crate::hub::NextResult::Chunk(c) => assert_eq!(&*c, b"RTCMDATA"),
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn accepts_two_token_source_line_without_mountpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut sock = TcpStream::connect(addr).await.unwrap();
            sock.write_all(b"SOURCE secret\r\n").await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ICY 200 OK\r\n\r\n");
        });

        let (sock, _) = listener.accept().await.unwrap();
        let hub = Hub::new(10);
        let slot = SourceSlot::new();
        let guard = slot.try_acquire().unwrap();
        let config = push_config();

        run(sock, Vec::new(), &config, "MP", &hub, guard).await;
        client.await.unwrap();

        assert!(!slot.is_occupied());
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_and_releases_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut sock = TcpStream::connect(addr).await.unwrap();
            sock.write_all(b"SOURCE wrong MP\r\n").await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).contains("401").then_some(()).unwrap();
        });

        let (sock, _) = listener.accept().await.unwrap();
        let hub = Hub::new(10);
        let slot = SourceSlot::new();
        let guard = slot.try_acquire().unwrap();
        let config = push_config();

        run(sock, Vec::new(), &config, "MP", &hub, guard).await;
        client.await.unwrap();

        assert!(!slot.is_occupied());
    }
}
