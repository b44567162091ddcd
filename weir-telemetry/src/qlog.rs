#![forbid(unsafe_code)]

//! qlog-lite file sink.
//!
//! Writes one JSON record per line: a header carrying the vantage point
//! and reference time, then one record per event with the offset in
//! milliseconds since the reference. File naming follows
//! `<dir>/<YYYY-MM-DD-HH:MM:SS><role>.qlog`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Local;
use serde_json::json;
use tracing::warn;
use weir_core::{PacketSummary, Role, RttStats, WeirResult};

use crate::TelemetrySink;

pub struct QlogSink {
    role: Role,
    writer: Mutex<QlogWriter>,
}

struct QlogWriter {
    out: BufWriter<File>,
    reference: Instant,
}

impl QlogSink {
    /// Create the qlog directory (if missing) and the per-connection file.
    pub fn create(dir: &Path, role: Role) -> WeirResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o755))?;
            }
        }
        let stamp = Local::now().format("%Y-%m-%d-%H:%M:%S");
        let path = dir.join(format!("{stamp}{role}.qlog"));
        let file = File::create(&path)?;
        let sink = Self {
            role,
            writer: Mutex::new(QlogWriter { out: BufWriter::new(file), reference: Instant::now() }),
        };
        sink.write_header();
        Ok(sink)
    }

    fn write_header(&self) {
        let header = json!({
            "qlog_format": "JSON-SEQ",
            "vantage_point": { "type": self.role.as_str() },
            "reference_time": Local::now().to_rfc3339(),
        });
        let mut w = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(w.out, "{header}") {
            warn!("qlog header write failed: {err}");
        }
    }

    fn record(&self, name: &str, data: serde_json::Value) {
        let mut w = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let time = w.reference.elapsed().as_secs_f64() * 1_000.0;
        let event = json!({ "time": time, "name": name, "data": data });
        if let Err(err) = writeln!(w.out, "{event}") {
            warn!("qlog event write failed: {err}");
        }
    }
}

impl TelemetrySink for QlogSink {
    fn debug(&self, name: &str, msg: &str) {
        self.record("debug", json!({ "name": name, "msg": msg }));
    }

    fn connection_started(&self, local: SocketAddr, remote: SocketAddr) {
        self.record(
            "connectivity:connection_started",
            json!({ "local": local.to_string(), "remote": remote.to_string() }),
        );
    }

    fn connection_closed(&self, reason: &str) {
        self.record("connectivity:connection_closed", json!({ "reason": reason }));
    }

    fn transport_parameters_sent(&self, params: &str) {
        self.record("transport:parameters_set", json!({ "owner": "local", "params": params }));
    }

    fn transport_parameters_received(&self, params: &str) {
        self.record("transport:parameters_set", json!({ "owner": "remote", "params": params }));
    }

    fn packet_sent(&self, summary: &PacketSummary) {
        self.record(
            "transport:packet_sent",
            json!({
                "packet_number": summary.packet_number,
                "size": summary.size,
                "frames": summary.frame_count,
            }),
        );
    }

    fn packet_received(&self, summary: &PacketSummary) {
        self.record(
            "transport:packet_received",
            json!({
                "packet_number": summary.packet_number,
                "size": summary.size,
                "frames": summary.frame_count,
            }),
        );
    }

    fn packet_lost(&self, packet_number: u64, reason: &str) {
        self.record(
            "recovery:packet_lost",
            json!({ "packet_number": packet_number, "trigger": reason }),
        );
    }

    fn metrics_updated(
        &self,
        rtt: &RttStats,
        cwnd: u64,
        bytes_in_flight: u64,
        packets_in_flight: usize,
    ) {
        self.record(
            "recovery:metrics_updated",
            json!({
                "latest_rtt_us": rtt.latest.as_micros() as u64,
                "smoothed_rtt_us": rtt.smoothed.as_micros() as u64,
                "min_rtt_us": rtt.min.as_micros() as u64,
                "congestion_window": cwnd,
                "bytes_in_flight": bytes_in_flight,
                "packets_in_flight": packets_in_flight,
            }),
        );
    }

    fn congestion_state_changed(&self, state: &str) {
        self.record("recovery:congestion_state_updated", json!({ "new": state }));
    }

    fn loss_timer_set(&self, kind: &str, timeout: Duration) {
        self.record(
            "recovery:loss_timer_updated",
            json!({ "event_type": "set", "timer_type": kind, "delta_ms": timeout.as_millis() as u64 }),
        );
    }

    fn loss_timer_expired(&self, kind: &str) {
        self.record(
            "recovery:loss_timer_updated",
            json!({ "event_type": "expired", "timer_type": kind }),
        );
    }

    fn loss_timer_cancelled(&self) {
        self.record("recovery:loss_timer_updated", json!({ "event_type": "cancelled" }));
    }

    fn ecn_state_changed(&self, state: &str) {
        self.record("recovery:ecn_state_updated", json!({ "new": state }));
    }

    fn alpn_chosen(&self, protocol: &str) {
        self.record("transport:alpn_information", json!({ "chosen_alpn": protocol }));
    }

    fn close(&self) {
        let mut w = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = w.out.flush() {
            warn!("qlog flush failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let sink = QlogSink::create(dir.path(), Role::Client).unwrap();
        sink.debug("unit", "hello");
        sink.close();

        let entry = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
        let name = entry.file_name().into_string().unwrap();
        assert!(name.ends_with("client.qlog"), "{name}");

        let contents = fs::read_to_string(entry.path()).unwrap();
        let mut lines = contents.lines();
        let header: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(header["vantage_point"]["type"], "client");
        let event: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(event["name"], "debug");
        assert_eq!(event["data"]["msg"], "hello");
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("qlogs");
        let _sink = QlogSink::create(&nested, Role::Server).unwrap();
        assert!(nested.is_dir());
    }
}
