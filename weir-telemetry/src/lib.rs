#![forbid(unsafe_code)]

//! Telemetry sink for a Weir connection.
//!
//! The sink is a narrow capability: a `debug(name, msg)` call plus
//! lifecycle hooks forwarded from the QUIC connection. The balancer and
//! framer emit debug events through it; nothing in the core depends on the
//! hook surface. One real implementor writes qlog-lite event files, and a
//! no-op implementor stands in when `QLOGDIR` is not configured or the
//! file cannot be created.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use weir_core::{PacketSummary, Role, RttStats, WeirConfig};

mod qlog;

pub use qlog::QlogSink;

/// Event consumer for a single connection.
///
/// Every hook has a no-op default body, so an implementor only overrides
/// what it records.
pub trait TelemetrySink: Send + Sync {
    /// Free-form debug event, the main channel used by the core components.
    fn debug(&self, _name: &str, _msg: &str) {}

    fn connection_started(&self, _local: SocketAddr, _remote: SocketAddr) {}
    fn connection_closed(&self, _reason: &str) {}

    fn transport_parameters_sent(&self, _params: &str) {}
    fn transport_parameters_received(&self, _params: &str) {}

    fn packet_sent(&self, _summary: &PacketSummary) {}
    fn packet_received(&self, _summary: &PacketSummary) {}
    fn packet_lost(&self, _packet_number: u64, _reason: &str) {}

    fn metrics_updated(
        &self,
        _rtt: &RttStats,
        _cwnd: u64,
        _bytes_in_flight: u64,
        _packets_in_flight: usize,
    ) {
    }

    fn congestion_state_changed(&self, _state: &str) {}

    fn loss_timer_set(&self, _kind: &str, _timeout: Duration) {}
    fn loss_timer_expired(&self, _kind: &str) {}
    fn loss_timer_cancelled(&self) {}

    fn ecn_state_changed(&self, _state: &str) {}
    fn alpn_chosen(&self, _protocol: &str) {}

    /// Flush and close the sink. Called once at connection teardown.
    fn close(&self) {}
}

/// Sink that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {}

/// Build the sink for a new connection from its captured configuration.
///
/// Resolution order is the config file's `qlog_dir`, then `QLOGDIR`. A
/// missing directory is created; any failure degrades to [`NoopSink`]
/// with a warning rather than surfacing a connection-level error.
#[must_use]
pub fn sink_for_connection(cfg: &WeirConfig, role: Role) -> Arc<dyn TelemetrySink> {
    let Some(dir) = cfg.resolved_qlog_dir() else {
        return Arc::new(NoopSink);
    };
    match QlogSink::create(&dir, role) {
        Ok(sink) => Arc::new(sink),
        Err(err) => {
            warn!("failed to set up qlog sink in {}: {err}", dir.display());
            Arc::new(NoopSink)
        }
    }
}
