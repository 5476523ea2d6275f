//! Listener/Dispatcher — accepts connections and routes them by first bytes
//!
//! One listener per station. Every inbound connection speaks one of three
//! dialects on the same port (spec §4/§6): a bare `GET /` sourcetable
//! request, a rover's `GET /<mountpoint>` subscribe request, or (push-mode
//! stations only) a base station's legacy `SOURCE <password> <mountpoint>`
//! line. We peek the first bytes to tell them apart without consuming them,
//! then hand the untouched socket to the matching handler. Grounded on the
//! accept-loop-with-graceful-shutdown shape of mini-redis's `Listener`,
//! generalized from "one connection dialect" to "three, told apart by a
//! peek."

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::config::StationConfig;
use crate::error::CasterError;
use crate::hub::Hub;
use crate::slot::SourceSlot;
use crate::{rover, source, sourcetable};

const PEEK_TIMEOUT: Duration = Duration::from_secs(5);
const PEEK_BUF_LEN: usize = 1024;

pub struct Listener {
    station: StationConfig,
    hub: Hub,
    source_slot: SourceSlot,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Listener {
    pub fn new(
        station: StationConfig,
        hub: Hub,
        source_slot: SourceSlot,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        Listener {
            station,
            hub,
            source_slot,
            notify_shutdown,
            shutdown_complete_tx,
        }
    }

    /// Bind this station's listen address and accept connections until a
    /// shutdown is signalled. Each connection is dispatched onto its own
    /// task so one slow peer can never stall the accept loop.
    pub async fn run(self) -> Result<(), CasterError> {
        let addr_str = self.station.listen_addr();
        let tcp = TokioTcpListener::bind(&addr_str).await.map_err(|e| {
            let addr: SocketAddr = addr_str
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.station.listen_port)));
            CasterError::BindFailed(addr, e)
        })?;

        debug!(
            "station {} listening on {addr_str} (mountpoint /{})",
            self.station.name, self.station.mountpoint
        );

        let mut shutdown_rx = self.notify_shutdown.subscribe();

        loop {
            let (sock, peer) = tokio::select! {
                accepted = tcp.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                },
                _ = shutdown_rx.recv() => {
                    debug!("listener for {} shutting down", self.station.name);
                    return Ok(());
                }
            };

            let station = self.station.clone();
            let hub = self.hub.clone();
            let source_slot = self.source_slot.clone();
            let stop_rx = self.notify_shutdown.subscribe();
            let shutdown_complete = self.shutdown_complete_tx.clone();

            tokio::spawn(async move {
                debug!("accepted connection from {peer}");
                dispatch(sock, station, hub, source_slot, stop_rx, shutdown_complete).await;
            });
        }
    }
}

async fn dispatch(
    sock: TcpStream,
    station: StationConfig,
    hub: Hub,
    source_slot: SourceSlot,
    stop_rx: broadcast::Receiver<()>,
    _shutdown_complete: mpsc::Sender<()>,
) {
    let mut peek_buf = vec![0u8; PEEK_BUF_LEN];
    let n = match tokio::time::timeout(PEEK_TIMEOUT, sock.peek(&mut peek_buf)).await {
        Ok(Ok(n)) if n > 0 => n,
        Ok(Ok(_)) => return,
        Ok(Err(e)) => {
            debug!("peek failed: {e}");
            return;
        },
        Err(_) => {
            debug!("peer sent nothing within {PEEK_TIMEOUT:?}");
            return;
        },
    };
    let peeked = &peek_buf[..n];

    if peeked.starts_with(b"SOURCE ") {
        route_source(sock, &station, &hub, &source_slot).await;
    } else if peeked.starts_with(b"GET ") {
        match request_path(peeked) {
            Some(path) if path == "/" => route_sourcetable(sock, &station).await,
            Some(_) => rover::run(sock, Vec::new(), &station, &hub, stop_rx).await,
            None => debug!("malformed GET request line, closing connection"),
        }
    } else {
        debug!("unrecognized request line, closing connection");
    }
}

async fn route_source(mut sock: TcpStream, station: &StationConfig, hub: &Hub, source_slot: &SourceSlot) {
    let Some(push_cfg) = &station.push else {
        let _ = sock
            .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\nERROR - Use SOURCE method\r\n")
            .await;
        return;
    };

    let Some(guard) = source_slot.try_acquire() else {
        warn!("rejecting SOURCE for {}: slot already occupied", station.mountpoint);
        let _ = sock
            .write_all(b"HTTP/1.1 409 Conflict\r\n\r\nERROR - Caster already has a source\r\n")
            .await;
        return;
    };

    source::run(sock, Vec::new(), push_cfg, &station.mountpoint, hub, guard).await;
}

async fn route_sourcetable(mut sock: TcpStream, station: &StationConfig) {
    let response = sourcetable::render(&station.sourcetable_body);
    let _ = sock.write_all(&response).await;
}

fn request_path(buf: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(buf).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    parts.next()
}
