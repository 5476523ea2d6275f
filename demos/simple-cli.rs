use clap::Parser;
use ntrip_caster::{
    config::{GgaConfig, PullConfig},
    hub::NextResult,
    upstream, Hub,
};
use tracing::{debug, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::Subscriber as FmtSubscriber, EnvFilter};

/// Stand-alone demonstration of the upstream (pull-mode) NTRIP client code
/// path: connect to a remote caster, print how many bytes arrive, and exit
/// on Ctrl-C. Never touched by the caster binary itself — the caster's own
/// Supervisor drives `upstream::run` the same way internally.
#[derive(Clone, PartialEq, Debug, Parser)]
struct Args {
    /// Remote caster host
    #[clap()]
    pub host: String,

    /// Remote caster port
    #[clap()]
    pub port: u16,

    /// Mountpoint to pull from
    #[clap()]
    pub mountpoint: String,

    #[clap(long, default_value = "")]
    pub username: String,

    #[clap(long, default_value = "")]
    pub password: String,

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

    info!("Start NTRIP upstream client demo");
    debug!("Args {args:?}");

    let (stop_tx, stop_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::task::spawn({
        let stop_tx = stop_tx.clone();
        async move {
            tokio::signal::ctrl_c().await.unwrap();
            debug!("Received Ctrl-C, shutting down...");
            let _ = stop_tx.send(());
        }
    });

    let config = PullConfig {
        remote_host: args.host,
        remote_port: args.port,
        remote_mountpoint: args.mountpoint.clone(),
        username: args.username,
        password: args.password,
        gga: None::<GgaConfig>,
    };

    let hub = Hub::default();
    let cursor = hub.subscribe();

    let runner = tokio::spawn(upstream::run(config, args.mountpoint, hub.clone(), stop_rx));

    loop {
        match hub.next(&cursor, std::time::Duration::from_secs(1)).await {
            NextResult::Chunk(chunk) => info!("received {} bytes", chunk.len()),
            NextResult::Timeout => {},
            NextResult::Dropped => break,
        }
        if runner.is_finished() {
            break;
        }
    }

    let _ = stop_tx.send(());
    let _ = runner.await;

    debug!("Exiting");
    Ok(())
}
