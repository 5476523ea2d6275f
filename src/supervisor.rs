//! Supervisor — owns one station's lifetime end to end
//!
//! Starts the configured data source (an Upstream Client task in pull mode,
//! or nothing upfront in push mode — the Source Acceptor is just another
//! inbound connection the Listener routes), starts the Listener, and drives
//! graceful shutdown. The `notify_shutdown` broadcast + `shutdown_complete`
//! mpsc pairing is the same idiom mini-redis's `run()` uses to know every
//! spawned task has reached a safe stopping point before the process exits.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::StationConfig;
use crate::error::CasterError;
use crate::hub::Hub;
use crate::listener::Listener;
use crate::slot::SourceSlot;
use crate::upstream;

/// Overall deadline for in-flight connections to reach a safe stopping
/// point after shutdown is signalled. Generous enough to cover a rover
/// mid-write and the upstream client's own select loop waking up.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a single station until `shutdown` resolves.
pub async fn run(station: StationConfig, shutdown: impl std::future::Future) -> Result<(), CasterError> {
    let hub = Hub::new(crate::hub::DEFAULT_CAPACITY);
    let source_slot = SourceSlot::new();

    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

    if station.mode == crate::config::Mode::Pull {
        let pull_config = station
            .pull
            .clone()
            .ok_or_else(|| CasterError::MissingPullConfig(station.name.clone()))?;
        let hub = hub.clone();
        let mountpoint = station.mountpoint.clone();
        let stop_rx = notify_shutdown.subscribe();
        let shutdown_complete = shutdown_complete_tx.clone();
        tokio::spawn(async move {
            upstream::run(pull_config, mountpoint, hub, stop_rx).await;
            drop(shutdown_complete);
        });
    } else if station.push.is_none() {
        return Err(CasterError::MissingPushConfig(station.name.clone()));
    }

    let listener = Listener::new(
        station.clone(),
        hub,
        source_slot,
        notify_shutdown.clone(),
        shutdown_complete_tx.clone(),
    );

    let listener_task = tokio::spawn(listener.run());

    tokio::select! {
        result = listener_task => {
            match result {
                Ok(Ok(())) => {},
                Ok(Err(e)) => return Err(e),
                Err(e) => warn!("listener task for {} panicked: {e}", station.name),
            }
        }
        _ = shutdown => {
            info!("shutdown requested for station {}", station.name);
        }
    }

    drop(notify_shutdown);
    drop(shutdown_complete_tx);

    match tokio::time::timeout(DRAIN_TIMEOUT, shutdown_complete_rx.recv()).await {
        Ok(_) => debug!("station {} drained cleanly", station.name),
        Err(_) => warn!(
            "station {} did not drain within {DRAIN_TIMEOUT:?}, proceeding anyway",
            station.name
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GgaConfig, Mode, PullConfig};
    use tokio::net::TcpListener;

    fn station(port: u16, remote_port: u16) -> StationConfig {
        StationConfig {
            name: "mp".into(),
            mode: Mode::Pull,
            listen_host: "127.0.0.1".into(),
            listen_port: port,
            mountpoint: "MP".into(),
            sourcetable_body: "STR;mp;;;;;;;;;;;;;;".into(),
            pull: Some(PullConfig {
                remote_host: "127.0.0.1".into(),
                remote_port,
                remote_mountpoint: "UP".into(),
                username: String::new(),
                password: String::new(),
                gga: None::<GgaConfig>,
            }),
            push: None,
            rovers: vec![],
        }
    }

    #[tokio::test]
    async fn shuts_down_promptly_when_asked() {
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_port = upstream_listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // accept and immediately drop forever; upstream client will just
            // keep retrying, which is fine for this test
            loop {
                let _ = upstream_listener.accept().await;
            }
        });

        let caster_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = caster_listener.local_addr().unwrap().port();
        drop(caster_listener);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };

        let station = station(port, remote_port);
        let supervisor = tokio::spawn(run(station, shutdown));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(());

        let result = tokio::time::timeout(Duration::from_secs(10), supervisor)
            .await
            .expect("supervisor should shut down promptly")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn push_station_without_push_config_is_rejected() {
        let mut station = station(0, 0);
        station.mode = Mode::Push;
        station.pull = None;
        station.push = None;

        let (_tx, rx) = tokio::sync::oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };

        let result = run(station, shutdown).await;
        assert!(matches!(result, Err(CasterError::MissingPushConfig(_))));
    }
}
