//! Upstream Client — pull-mode source
//!
//! Connects out to a remote NTRIP caster, performs the NTRIP GET handshake,
//! optionally emits periodic GGA keep-alives, and forwards every byte it
//! receives to the station's [`Hub`] verbatim. Reconnects forever on any
//! failure with a fixed (not exponential) backoff — the teacher's
//! `NtripClient::handle_connection` is the direct ancestor of the
//! handshake code here; this generalizes it from "parse RTCM frames out of
//! the stream" to "treat the stream as opaque and relay it."

use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::auth::encode_basic;
use crate::config::PullConfig;
use crate::gga;
use crate::hub::Hub;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(15);
const SOCKET_ERROR_BACKOFF: Duration = Duration::from_secs(5);
const HANDSHAKE_FAILURE_BACKOFF: Duration = Duration::from_secs(10);
const RESPONSE_BUF_LEN: usize = 2048;

/// Drives the pull-mode upstream connection until told to stop.
///
/// Runs forever (subject to `stop_rx`), reconnecting on every failure; the
/// Supervisor owns the task and the `stop_rx` it hands out.
pub async fn run(
    config: PullConfig,
    mountpoint: String,
    hub: Hub,
    mut stop_rx: broadcast::Receiver<()>,
) {
    loop {
        match connect_and_stream(&config, &mountpoint, &hub, &mut stop_rx).await {
            Ok(Stopped(true)) => {
                debug!("upstream client stopping on supervisor signal");
                return;
            },
            Ok(Stopped(false)) => {
                // Peer closed cleanly; reconnect immediately.
            },
            Err(UpstreamError::Handshake(msg)) => {
                warn!("upstream handshake failed: {msg}; retrying in {HANDSHAKE_FAILURE_BACKOFF:?}");
                if sleep_or_stop(HANDSHAKE_FAILURE_BACKOFF, &mut stop_rx).await {
                    return;
                }
            },
            Err(UpstreamError::Io(e)) => {
                warn!("upstream socket error: {e}; retrying in {SOCKET_ERROR_BACKOFF:?}");
                if sleep_or_stop(SOCKET_ERROR_BACKOFF, &mut stop_rx).await {
                    return;
                }
            },
        }
    }
}

/// Whether `connect_and_stream` exited because the Supervisor asked us to
/// stop, as opposed to the peer simply closing the connection.
struct Stopped(bool);

enum UpstreamError {
    Io(std::io::Error),
    Handshake(String),
}

impl From<std::io::Error> for UpstreamError {
    fn from(e: std::io::Error) -> Self {
        UpstreamError::Io(e)
    }
}

async fn sleep_or_stop(backoff: Duration, stop_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(backoff) => false,
        _ = stop_rx.recv() => true,
    }
}

async fn connect_and_stream(
    config: &PullConfig,
    mountpoint: &str,
    hub: &Hub,
    stop_rx: &mut broadcast::Receiver<()>,
) -> Result<Stopped, UpstreamError> {
    let addr = format!("{}:{}", config.remote_host, config.remote_port);
    debug!("connecting to upstream caster {addr}/{mountpoint}");

    let mut buf = vec![0u8; RESPONSE_BUF_LEN];
    let (mut sock, n) = tokio::time::timeout(CONNECT_TIMEOUT, async {
        let mut sock = TcpStream::connect(&addr).await?;
        send_handshake(&mut sock, config, mountpoint).await?;
        let n = sock.read(&mut buf).await?;
        Ok::<_, std::io::Error>((sock, n))
    })
    .await
    .map_err(|_| UpstreamError::Handshake("connect/handshake timed out".into()))??;

    let response = String::from_utf8_lossy(&buf[..n]);
    if !(response.contains("ICY 200 OK") || response.contains("HTTP/1.1 200 OK")) {
        let first_line = response.lines().next().unwrap_or("<empty response>");
        return Err(UpstreamError::Handshake(first_line.to_string()));
    }

    debug!("upstream handshake succeeded");

    // The caster may have coalesced the first data bytes into the same
    // packet as the handshake response; forward whatever followed the
    // blank line (or the status line, for minimal ICY replies) so nothing
    // is silently dropped.
    let header_end = find_subslice(&buf[..n], b"\r\n\r\n")
        .map(|i| i + 4)
        .or_else(|| find_subslice(&buf[..n], b"\r\n").map(|i| i + 2))
        .unwrap_or(n);
    if header_end < n {
        hub.publish(buf[header_end..n].to_vec().into_boxed_slice());
    }

    let mut last_gga = Instant::now();
    if let Some(gga_cfg) = &config.gga {
        if gga_cfg.interval_secs > 0 {
            let sentence = gga::render(gga_cfg.lat, gga_cfg.lon);
            sock.write_all(sentence.as_bytes()).await?;
            last_gga = Instant::now();
        }
    }

    loop {
        let gga_deadline = next_gga_deadline(config, last_gga);

        tokio::select! {
            read = tokio::time::timeout(READ_TIMEOUT, sock.read(&mut buf)) => {
                let n = read.map_err(|_| {
                    UpstreamError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data for 15s"))
                })??;
                if n == 0 {
                    debug!("upstream closed the connection");
                    return Ok(Stopped(false));
                }
                hub.publish(buf[..n].to_vec().into_boxed_slice());
            }
            _ = tokio::time::sleep_until(gga_deadline.into()) , if config.gga.is_some() => {
                if let Some(gga_cfg) = &config.gga {
                    if gga_cfg.interval_secs > 0 {
                        let sentence = gga::render(gga_cfg.lat, gga_cfg.lon);
                        sock.write_all(sentence.as_bytes()).await?;
                        last_gga = Instant::now();
                    }
                }
            }
            _ = stop_rx.recv() => {
                debug!("upstream client stream stopping on supervisor signal");
                return Ok(Stopped(true));
            }
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn next_gga_deadline(config: &PullConfig, last_gga: Instant) -> Instant {
    match &config.gga {
        Some(gga_cfg) if gga_cfg.interval_secs > 0 => {
            last_gga + Duration::from_secs(gga_cfg.interval_secs)
        },
        _ => last_gga + Duration::from_secs(3600),
    }
}

async fn send_handshake(
    sock: &mut TcpStream,
    config: &PullConfig,
    mountpoint: &str,
) -> std::io::Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Host",
        HeaderValue::from_str(&format!("{}:{}", config.remote_host, config.remote_port))
            .unwrap_or_else(|_| HeaderValue::from_static("localhost")),
    );
    headers.insert("Ntrip-Version", HeaderValue::from_static("Ntrip/2.0"));
    headers.insert(
        "User-Agent",
        HeaderValue::from_static(concat!("NTRIP ", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
    );
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    if !config.username.is_empty() {
        let auth = encode_basic(&config.username, &config.password);
        if let Ok(value) = HeaderValue::from_str(&auth) {
            headers.insert("Authorization", value);
        }
    }

    sock.write_all(format!("GET /{mountpoint} HTTP/1.1\r\n").as_bytes())
        .await?;
    for (name, value) in headers.iter() {
        sock.write_all(format!("{}: {}\r\n", name.as_str(), value.to_str().unwrap_or("")).as_bytes())
            .await?;
    }
    sock.write_all(b"\r\n").await?;
    sock.flush().await
}
