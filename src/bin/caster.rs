//! NTRIP caster relay binary
//!
//! Loads a station out of a JSON config file and serves it until
//! interrupted. Grounded on the teacher's `examples/simple-cli.rs`: same
//! `clap::Parser` CLI shape, same `tracing-subscriber` setup, same
//! `ctrl_c`-into-broadcast shutdown wiring, generalized from "subscribe and
//! print RTCM" to "load a station and run the caster for it."

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::Subscriber as FmtSubscriber, EnvFilter};

use ntrip_caster::config::CasterConfig;

/// NTRIP caster relay
#[derive(Clone, PartialEq, Debug, Parser)]
struct Args {
    /// Path to a JSON file describing one or more stations
    #[clap(long)]
    pub config: PathBuf,

    /// Name of the station (within `config`) to serve
    #[clap(long)]
    pub station: String,

    #[clap(long, default_value = "info")]
    /// Set log level
    pub log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());
    let _ = FmtSubscriber::builder()
        .compact()
        .without_time()
        .with_max_level(args.log_level)
        .with_env_filter(filter)
        .try_init();

    info!("Starting NTRIP caster relay");
    debug!("Args {args:?}");

    let raw = std::fs::read_to_string(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", args.config.display()))?;
    let config: CasterConfig = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", args.config.display()))?;

    let station = config
        .station(&args.station)
        .ok_or_else(|| anyhow::anyhow!("no station named {:?} in {}", args.station, args.config.display()))?
        .clone();

    info!(
        "Serving station {:?} ({:?} mode) on {}",
        station.name,
        station.mode,
        station.listen_addr()
    );

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
        debug!("received Ctrl-C, shutting down...");
    };

    if let Err(e) = ntrip_caster::run(station, shutdown).await {
        error!("station exited with error: {e}");
        return Err(e.into());
    }

    debug!("Exiting");
    Ok(())
}
