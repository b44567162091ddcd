#![forbid(unsafe_code)]

//! Identifier and measurement types shared across the balancer and framer.

use std::fmt;
use std::time::Duration;

/// QUIC stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire version tag passed through to frame length computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(pub u32);

impl Version {
    pub const V1: Version = Version(1);
}

/// Connection vantage point, used for telemetry file naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTT measurements handed in by the transport's metrics callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttStats {
    pub latest: Duration,
    pub smoothed: Duration,
    pub min: Duration,
}

impl RttStats {
    #[must_use]
    pub fn latest_rtt(&self) -> Duration {
        self.latest
    }
}

/// Summary of a sent or received packet, as forwarded to the telemetry sink.
#[derive(Debug, Clone, Copy)]
pub struct PacketSummary {
    pub packet_number: u64,
    pub size: usize,
    pub frame_count: usize,
}
