//! Station configuration objects
//!
//! These are pure data: validating a config file, running an interactive
//! menu, or storing rover accounts persistently are all external
//! collaborators. This module only defines the shape the caster expects to
//! receive once that validation has already happened.

use strum::{Display, EnumString};

/// Where a station's RTCM stream comes from
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, EnumString, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    /// Relay connects out to a remote caster and pulls RTCM from it
    #[default]
    #[strum(serialize = "pull")]
    Pull,
    /// Relay accepts one inbound `SOURCE` push connection from a base
    #[strum(serialize = "push")]
    Push,
}

/// One rover account allowed to subscribe to this station's mountpoint
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoverAccount {
    pub username: String,
    pub password: String,
}

/// GGA keep-alive parameters for pull-mode upstream sessions
#[derive(Clone, Copy, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GgaConfig {
    /// Reference latitude, signed decimal degrees
    pub lat: f64,
    /// Reference longitude, signed decimal degrees
    pub lon: f64,
    /// Seconds between GGA sentences; 0 disables emission entirely
    pub interval_secs: u64,
}

/// Pull-mode fields: who we connect out to, and with what credentials
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PullConfig {
    pub remote_host: String,
    pub remote_port: u16,
    pub remote_mountpoint: String,
    pub username: String,
    pub password: String,
    pub gga: Option<GgaConfig>,
}

/// Push-mode fields: the shared secret a base station authenticates with
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PushConfig {
    pub source_password: String,
}

/// Immutable configuration for a single caster station
///
/// A station serves exactly one mountpoint (spec: no multi-mountpoint
/// multiplexing on one instance).
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StationConfig {
    pub name: String,
    pub mode: Mode,
    pub listen_host: String,
    pub listen_port: u16,
    pub mountpoint: String,
    /// Raw sourcetable body served verbatim on `GET /`
    pub sourcetable_body: String,
    pub pull: Option<PullConfig>,
    pub push: Option<PushConfig>,
    pub rovers: Vec<RoverAccount>,
}

impl StationConfig {
    /// Listen address as `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Look up a rover account by exact username/password match
    pub fn find_rover(&self, username: &str, password: &str) -> bool {
        self.rovers
            .iter()
            .any(|r| r.username == username && r.password == password)
    }
}

/// A set of stations, as produced by an external config loader
#[derive(Clone, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CasterConfig {
    pub stations: Vec<StationConfig>,
}

impl CasterConfig {
    pub fn station(&self, name: &str) -> Option<&StationConfig> {
        self.stations.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_rover_exact_match() {
        let station = StationConfig {
            name: "mp".into(),
            mode: Mode::Pull,
            listen_host: "0.0.0.0".into(),
            listen_port: 2101,
            mountpoint: "mp".into(),
            sourcetable_body: String::new(),
            pull: None,
            push: None,
            rovers: vec![RoverAccount {
                username: "alice".into(),
                password: "s3cret".into(),
            }],
        };

        assert!(station.find_rover("alice", "s3cret"));
        assert!(!station.find_rover("alice", "wrong"));
        assert!(!station.find_rover("bob", "s3cret"));
    }
}
