//! Relay configuration.

use crate::constants::{CLIENT_TIMEOUT, DEFAULT_CONTROL_PORT, DEFAULT_VOICE_PORT, MIX_INTERVAL, VOICE_KEEPALIVE_GAP};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Configuration for a [`Server`](super::Server).
///
/// Tests bind port 0 and shrink the timeouts; production uses the defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Bind address of the signalling socket.
    pub control_addr: SocketAddr,
    /// Bind address of the voice socket. Its port is also the port clients
    /// are assumed to receive voice on until their first packet arrives.
    pub voice_addr: SocketAddr,
    /// Voice-idle clients are dropped from the voice chat after this long;
    /// the janitor sweeps at half this interval.
    pub client_timeout: Duration,
    /// Gap between keepalive heartbeats on the voice socket.
    pub keepalive_gap: Duration,
    /// Mixer tick length.
    pub mix_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_CONTROL_PORT).into(),
            voice_addr: (Ipv4Addr::UNSPECIFIED, DEFAULT_VOICE_PORT).into(),
            client_timeout: CLIENT_TIMEOUT,
            keepalive_gap: VOICE_KEEPALIVE_GAP,
            mix_interval: MIX_INTERVAL,
        }
    }
}
