//! Rover Handler — authenticated subscriber connection
//!
//! Parses a rover's `GET /<mountpoint>` request, checks HTTP Basic auth
//! against the station's configured accounts, and on success pumps the
//! station's [`Hub`] out to the socket until the rover disconnects, the
//! stream falls too far behind (spec §4.1 "dropped" semantics), or the
//! Supervisor asks every handler to shut down.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::debug;

use crate::auth::decode_basic;
use crate::config::StationConfig;
use crate::hub::{Hub, NextResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_BUF_LEN: usize = 4096;
const NEXT_CHUNK_TIMEOUT: Duration = Duration::from_secs(15);

/// Handle one rover connection to completion.
///
/// `prefetched` carries whatever bytes the Listener already read off the
/// socket while peeking to route it here.
pub async fn run(
    mut sock: TcpStream,
    prefetched: Vec<u8>,
    station: &StationConfig,
    hub: &Hub,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let request = match read_request(&mut sock, prefetched).await {
        Ok(request) => request,
        Err(e) => {
            debug!("rover request read failed: {e}");
            return;
        },
    };

    let Some(path) = request_path(&request) else {
        reply(&mut sock, "400 Bad Request").await.ok();
        return;
    };

    if path.trim_start_matches('/') != station.mountpoint {
        reply(&mut sock, "404 Not Found").await.ok();
        return;
    }

    let Some(auth_header) = crate::auth::find_header(request.lines(), "Authorization") else {
        reply(&mut sock, "401 Unauthorized").await.ok();
        return;
    };

    let Some((user, pass)) = decode_basic(&auth_header) else {
        reply(&mut sock, "401 Unauthorized").await.ok();
        return;
    };

    if !station.find_rover(&user, &pass) {
        reply(&mut sock, "401 Unauthorized").await.ok();
        return;
    }

    if sock.write_all(b"ICY 200 OK\r\n\r\n").await.is_err() {
        return;
    }

    debug!("rover {user} subscribed to {}", station.mountpoint);
    let cursor = hub.subscribe();
    pump(sock, hub, &cursor, &mut stop_rx).await;
    hub.unsubscribe(&cursor);
    debug!("rover {user} disconnected from {}", station.mountpoint);
}

async fn read_request(sock: &mut TcpStream, prefetched: Vec<u8>) -> std::io::Result<String> {
    let mut buf = prefetched;
    loop {
        if let Some(idx) = find_header_end(&buf) {
            buf.truncate(idx);
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }

        if buf.len() >= REQUEST_BUF_LEN {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }

        let mut chunk = vec![0u8; REQUEST_BUF_LEN - buf.len()];
        let n = tokio::time::timeout(REQUEST_TIMEOUT, sock.read(&mut chunk))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "request timed out"))??;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn request_path(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    parts.next()
}

async fn reply(sock: &mut TcpStream, status: &str) -> std::io::Result<()> {
    sock.write_all(format!("HTTP/1.1 {status}\r\n\r\n").as_bytes())
        .await?;
    sock.flush().await
}

async fn pump(
    mut sock: TcpStream,
    hub: &Hub,
    cursor: &crate::hub::Cursor,
    stop_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = hub.next(cursor, NEXT_CHUNK_TIMEOUT) => {
                match result {
                    NextResult::Chunk(chunk) => {
                        if sock.write_all(&chunk).await.is_err() {
                            return;
                        }
                    },
                    NextResult::Timeout => {
                        // No data for a while; keep the connection open.
                    },
                    NextResult::Dropped => {
                        debug!("rover fell behind the stream, disconnecting");
                        return;
                    },
                }
            }
            _ = stop_rx.recv() => {
                debug!("rover handler stopping on supervisor signal");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, RoverAccount};
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    fn station() -> StationConfig {
        StationConfig {
            name: "mp".into(),
            mode: Mode::Pull,
            listen_host: "0.0.0.0".into(),
            listen_port: 2101,
            mountpoint: "MP".into(),
            sourcetable_body: String::new(),
            pull: None,
            push: None,
            rovers: vec![RoverAccount {
                username: "alice".into(),
                password: "s3cret".into(),
            }],
        }
    }

    #[tokio::test]
    async fn authenticated_rover_receives_published_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth = crate::auth::encode_basic("alice", "s3cret");

        let client = tokio::spawn(async move {
            let mut sock = TcpStream::connect(addr).await.unwrap();
            sock.write_all(
                format!("GET /MP HTTP/1.1\r\nAuthorization: {auth}\r\n\r\n").as_bytes(),
            )
            .await
            .unwrap();

            let mut buf = vec![0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ICY 200 OK\r\n\r\n");

            let n = sock.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"RTCM");
        });

        let (sock, _) = listener.accept().await.unwrap();
        let hub = Hub::new(10);
        let station = station();
        let (stop_tx, stop_rx) = broadcast::channel::<()>(1);

        let server = tokio::spawn({
            let hub = hub.clone();
            async move { run(sock, Vec::new(), &station, &hub, stop_rx).await }
        });

        // give the handler a moment to subscribe before publishing
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.publish(b"RTCM".to_vec().into_boxed_slice());

        client.await.unwrap();
        drop(stop_tx);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn wrong_mountpoint_gets_404() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth = crate::auth::encode_basic("alice", "s3cret");

        let client = tokio::spawn(async move {
            let mut sock = TcpStream::connect(addr).await.unwrap();
            sock.write_all(
                format!("GET /OTHER HTTP/1.1\r\nAuthorization: {auth}\r\n\r\n").as_bytes(),
            )
            .await
            .unwrap();

            let mut buf = vec![0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 404"));
        });

        let (sock, _) = listener.accept().await.unwrap();
        let hub = Hub::new(10);
        let station = station();
        let (_stop_tx, stop_rx) = broadcast::channel::<()>(1);

        run(sock, Vec::new(), &station, &hub, stop_rx).await;
        client.await.unwrap();
    }

    #[tokio::test]
    async fn bad_credentials_get_401() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth = crate::auth::encode_basic("alice", "wrong");

        let client = tokio::spawn(async move {
            let mut sock = TcpStream::connect(addr).await.unwrap();
            sock.write_all(
                format!("GET /MP HTTP/1.1\r\nAuthorization: {auth}\r\n\r\n").as_bytes(),
            )
            .await
            .unwrap();

            let mut buf = vec![0u8; 256];
            let n = sock.read(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 401"));
        });

        let (sock, _) = listener.accept().await.unwrap();
        let hub = Hub::new(10);
        let station = station();
        let (_stop_tx, stop_rx) = broadcast::channel::<()>(1);

        run(sock, Vec::new(), &station, &hub, stop_rx).await;
        client.await.unwrap();
    }
}
