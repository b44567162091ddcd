#![forbid(unsafe_code)]

//! Weir configuration handling. Parses a TOML file into a strongly-typed
//! structure; every field has a default so a missing file or empty table is
//! a valid configuration. The qlog directory is resolved once, from the
//! config file or the `QLOGDIR` environment variable, and captured into the
//! connection's config rather than re-read.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::{WeirError, WeirResult};

/// Top-level configuration shared across Weir components.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeirConfig {
    /// Logging verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,

    /// Directory for qlog telemetry output. Overrides `QLOGDIR`.
    pub qlog_dir: Option<PathBuf>,

    /// Balancer and monitor tuning.
    pub balancer: BalancerSettings,
}

impl Default for WeirConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            qlog_dir: None,
            balancer: BalancerSettings::default(),
        }
    }
}

impl WeirConfig {
    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> WeirResult<Self> {
        let data = fs::read_to_string(&path).map_err(WeirError::from)?;
        let cfg = toml::from_str::<WeirConfig>(&data).map_err(WeirError::ConfigParse)?;
        Ok(cfg)
    }

    /// Resolve the qlog output directory: explicit config wins, then the
    /// `QLOGDIR` environment variable. `None` disables telemetry output.
    #[must_use]
    pub fn resolved_qlog_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.qlog_dir {
            return Some(dir.clone());
        }
        env::var_os("QLOGDIR").map(PathBuf::from)
    }
}

/// Tuning for the stream-type balancer and its monitors.
///
/// Durations are carried as milliseconds so the struct stays trivially
/// deserializable; accessors convert.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BalancerSettings {
    /// Feedback-loop tick interval.
    pub tick_every_ms: u64,
    /// Peak-holder poll interval.
    pub poll_every_ms: u64,
    /// Window over which the polled bitrate is measured.
    pub bitrate_over_ms: u64,
    /// Top-K peak holder capacity.
    pub peak_entries: usize,
    /// Multiplicative decay applied to the holder per poll tick.
    pub peak_decay: f64,
    /// Lower clamp for a class's byte allowance.
    pub allowed_floor: u64,
    /// Initial byte allowance per class.
    pub allowed_initial: u64,
    /// Window over which a class's allowance is spent.
    pub timeframe_ms: u64,
    /// Regression horizons for the priority (bidi) rate monitor, descending.
    pub priority_horizons_ms: Vec<u64>,
    /// Regression horizons for the non-priority rate monitor, descending.
    pub rest_horizons_ms: Vec<u64>,
    /// Regression horizons for the RTT monitor, descending.
    pub rtt_horizons_ms: Vec<u64>,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            tick_every_ms: 100,
            poll_every_ms: 500,
            bitrate_over_ms: 2_000,
            peak_entries: 20,
            peak_decay: 0.95,
            allowed_floor: 10,
            allowed_initial: 100,
            timeframe_ms: 1_000,
            priority_horizons_ms: vec![5_000, 400],
            rest_horizons_ms: vec![1_000],
            rtt_horizons_ms: vec![3_000, 1_000, 400],
        }
    }
}

impl BalancerSettings {
    #[must_use]
    pub fn tick_every(&self) -> Duration {
        Duration::from_millis(self.tick_every_ms)
    }

    #[must_use]
    pub fn poll_every(&self) -> Duration {
        Duration::from_millis(self.poll_every_ms)
    }

    #[must_use]
    pub fn bitrate_over(&self) -> Duration {
        Duration::from_millis(self.bitrate_over_ms)
    }

    #[must_use]
    pub fn timeframe(&self) -> Duration {
        Duration::from_millis(self.timeframe_ms)
    }

    #[must_use]
    pub fn priority_horizons(&self) -> Vec<Duration> {
        self.priority_horizons_ms.iter().map(|&ms| Duration::from_millis(ms)).collect()
    }

    #[must_use]
    pub fn rest_horizons(&self) -> Vec<Duration> {
        self.rest_horizons_ms.iter().map(|&ms| Duration::from_millis(ms)).collect()
    }

    #[must_use]
    pub fn rtt_horizons(&self) -> Vec<Duration> {
        self.rtt_horizons_ms.iter().map(|&ms| Duration::from_millis(ms)).collect()
    }
}
