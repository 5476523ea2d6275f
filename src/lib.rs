//! NTRIP caster relay
//!
//! Pulls RTCM correction data from a remote caster (or accepts one inbound
//! push from a base station) and fans it out to authenticated rovers over
//! plain NTRIP. One [`supervisor::run`] call drives one station's entire
//! lifetime: data source, listener, and every rover connection it spawns.

pub mod auth;
pub mod config;
pub mod error;
pub mod gga;
pub mod hub;
pub mod listener;
pub mod rover;
pub mod slot;
pub mod source;
pub mod sourcetable;
pub mod supervisor;
pub mod upstream;

pub use error::CasterError;
pub use hub::Hub;
pub use supervisor::run;
