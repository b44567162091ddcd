#![forbid(unsafe_code)]

//! Sent-byte rate monitor.
//!
//! Ingests cumulative sent-byte samples, answers "bytes sent in the last
//! Δ", and runs ordinary least squares over several horizons at once. A
//! poll task feeds a [`PeakHolder`] so the balancer can compare the
//! current rate against the recent sustained peak.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;
use weir_telemetry::TelemetrySink;

use crate::holder::PeakHolder;

/// One cumulative observation: total bytes sent as of `at`.
#[derive(Debug, Clone, Copy)]
struct SentSample {
    at: Instant,
    cumulative: u64,
}

/// OLS result for one horizon. Slope is NaN when the horizon held fewer
/// than two distinct sample times; callers treat NaN as "no signal".
#[derive(Debug, Clone, Copy)]
pub struct Regression {
    pub offset: f64,
    pub slope: f64,
}

impl Regression {
    const NONE: Regression = Regression { offset: f64::NAN, slope: f64::NAN };
}

struct SampleRing {
    samples: VecDeque<SentSample>,
    total: u64,
}

impl SampleRing {
    fn discard_older_than(&mut self, window: Duration, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

pub struct RateMonitor {
    epoch: Instant,
    /// Regression horizons, longest first.
    horizons: Vec<Duration>,
    poll_every: Duration,
    bitrate_over: Duration,
    peak_decay: f64,
    ring: Mutex<SampleRing>,
    results: RwLock<Vec<Regression>>,
    holder: PeakHolder,
    sink: Arc<dyn TelemetrySink>,
}

impl RateMonitor {
    /// `horizons` must be non-empty and sorted longest-first; the longest
    /// horizon bounds how much sample history is retained.
    #[must_use]
    pub fn new(
        horizons: Vec<Duration>,
        poll_every: Duration,
        bitrate_over: Duration,
        peak_entries: usize,
        peak_decay: f64,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        assert!(!horizons.is_empty(), "rate monitor needs at least one horizon");
        let results = vec![Regression::NONE; horizons.len()];
        Self {
            epoch: Instant::now(),
            horizons,
            poll_every,
            bitrate_over,
            peak_decay,
            ring: Mutex::new(SampleRing { samples: VecDeque::with_capacity(32), total: 0 }),
            results: RwLock::new(results),
            holder: PeakHolder::new(peak_entries),
            sink,
        }
    }

    /// Record `size` freshly sent bytes. The sample is visible to the very
    /// next [`bytes_within`](Self::bytes_within) call.
    pub fn add_sent(&self, size: u64) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.total += size;
        let sample = SentSample { at: Instant::now(), cumulative: ring.total };
        ring.samples.push_back(sample);
        trace!(total = ring.total, "sent bytes recorded");
    }

    /// Total bytes recorded over the monitor's lifetime.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).total
    }

    /// Bytes sent within the last `window`, from the cumulative samples.
    /// Samples older than `2 × window` are compacted away on the way.
    #[must_use]
    pub fn bytes_within(&self, window: Duration) -> u64 {
        let now = Instant::now();
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.discard_older_than(window * 2, now);
        let Some(latest) = ring.samples.back() else {
            return 0;
        };
        let latest = latest.cumulative;
        for sample in ring.samples.iter() {
            if now.duration_since(sample.at) <= window {
                return latest - sample.cumulative;
            }
        }
        0
    }

    /// Run the per-horizon regressions over the retained samples.
    ///
    /// Samples are copied out under the lock and the lock released before
    /// the least-squares math runs.
    pub fn regress_all(&self) {
        let now = Instant::now();
        let samples: Vec<(Duration, f64, f64)> = {
            let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
            ring.discard_older_than(self.horizons[0], now);
            ring.samples
                .iter()
                .map(|s| {
                    let age = now.duration_since(s.at);
                    let x = s.at.duration_since(self.epoch).as_secs_f64() * 1_000.0;
                    (age, x, s.cumulative as f64)
                })
                .collect()
        };

        let mut inputs: Vec<Vec<(f64, f64)>> = vec![Vec::new(); self.horizons.len()];
        // Samples arrive oldest first, so the inclusion cursor only advances.
        let mut include_until = 0;
        for (age, x, y) in samples {
            while include_until + 1 < self.horizons.len() && age < self.horizons[include_until + 1] {
                include_until += 1;
            }
            for input in inputs[..=include_until].iter_mut() {
                input.push((x, y));
            }
        }

        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        for (i, input) in inputs.iter().enumerate() {
            results[i] = linear_regression(input);
            if results[i].slope.is_nan() {
                self.sink.debug(
                    "rate_regression",
                    &format!("no signal for horizon {:?} ({} samples)", self.horizons[i], input.len()),
                );
            }
        }
    }

    /// Latest regression results, one per horizon, longest horizon first.
    #[must_use]
    pub fn regressions(&self) -> Vec<Regression> {
        self.results.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Slope of the shortest configured horizon.
    #[must_use]
    pub fn short_term_slope(&self) -> f64 {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        results.last().map_or(f64::NAN, |r| r.slope)
    }

    /// Median of the recorded peak bitrates.
    #[must_use]
    pub fn max_median(&self) -> u64 {
        self.holder.median()
    }

    /// Bytes sent within the peak-measurement window (`bitrate_over`).
    #[must_use]
    pub fn peak_window_bytes(&self) -> u64 {
        self.bytes_within(self.bitrate_over)
    }

    /// One poll tick: record the current windowed bitrate as a peak
    /// candidate, then decay the holder.
    pub fn poll_once(&self) {
        let bitrate = self.bytes_within(self.bitrate_over);
        self.holder.add(bitrate);
        self.holder.shrink(self.peak_decay);
        self.sink.debug(
            "peak_holder",
            &format!("median after shrink: {}, bitrate: {}", self.holder.median(), bitrate),
        );
    }

    /// Per-horizon slope report for debug logging.
    #[must_use]
    pub fn summary(&self) -> String {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        let mut summary = String::new();
        for (horizon, result) in self.horizons.iter().zip(results.iter()) {
            summary.push_str(&format!("for horizon {:?} the slope is {}\n", horizon, result.slope));
        }
        summary
    }

    /// Spawn the poll task. It wakes every `poll_every`, runs
    /// [`poll_once`](Self::poll_once), and exits when `shutdown` fires.
    pub fn spawn_poll_task(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.poll_every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.poll_once(),
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

/// Ordinary least squares over `(x, y)` points. Fewer than two points, or
/// no x spread, yields NaN slope and offset.
pub(crate) fn linear_regression(points: &[(f64, f64)]) -> Regression {
    if points.len() < 2 {
        return Regression::NONE;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|&(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|&(_, y)| y).sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(x, y) in points {
        sxx += (x - mean_x) * (x - mean_x);
        sxy += (x - mean_x) * (y - mean_y);
    }
    if sxx == 0.0 {
        return Regression::NONE;
    }
    let slope = sxy / sxx;
    Regression { offset: mean_y - slope * mean_x, slope }
}
