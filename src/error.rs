//! Caster-wide error types
//!
//! Per-connection failures (malformed request, bad auth, slot conflict) are
//! resolved locally into a wire response and a log line — they never reach
//! this enum. Only conditions that should abort the whole station (a
//! mis-configured station, a listener that cannot bind) propagate here.

/// Errors that can stop a station before or during startup
#[derive(Debug, thiserror::Error)]
pub enum CasterError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no station named {0:?} in configuration")]
    UnknownStation(String),

    #[error("station {0:?} is configured as pull mode but has no pull section")]
    MissingPullConfig(String),

    #[error("station {0:?} is configured as push mode but has no push section")]
    MissingPushConfig(String),

    #[error("failed to bind {0}: {1}")]
    BindFailed(std::net::SocketAddr, std::io::Error),
}
