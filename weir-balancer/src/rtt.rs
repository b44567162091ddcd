#![forbid(unsafe_code)]

//! RTT monitor.
//!
//! Same ingestion and regression machinery as the rate monitor, but over
//! RTT samples, plus a surge score: a short-horizon slope running well
//! ahead of the longer horizons is read as incipient queueing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::trace;
use weir_telemetry::TelemetrySink;

use crate::rate::Regression;
use crate::scorer::SlopeScorer;

/// Minimum short-horizon slope (µs per ms) for a surge verdict.
const SURGE_FLOOR: f64 = 5_000.0;

#[derive(Debug, Clone, Copy)]
struct RttSample {
    at: Instant,
    rtt: Duration,
}

pub struct RttMonitor {
    epoch: Instant,
    /// Regression horizons, longest first.
    horizons: Vec<Duration>,
    ring: Mutex<VecDeque<RttSample>>,
    results: RwLock<Vec<Regression>>,
    scorer: Mutex<SlopeScorer>,
    sink: Arc<dyn TelemetrySink>,
}

impl RttMonitor {
    /// `horizons` must be non-empty and sorted longest-first.
    #[must_use]
    pub fn new(horizons: Vec<Duration>, sink: Arc<dyn TelemetrySink>) -> Self {
        assert!(!horizons.is_empty(), "RTT monitor needs at least one horizon");
        let results = vec![Regression { offset: f64::NAN, slope: f64::NAN }; horizons.len()];
        Self {
            epoch: Instant::now(),
            horizons,
            ring: Mutex::new(VecDeque::with_capacity(32)),
            results: RwLock::new(results),
            scorer: Mutex::new(SlopeScorer::new()),
            sink,
        }
    }

    pub fn add_sample(&self, rtt: Duration) {
        let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
        ring.push_back(RttSample { at: Instant::now(), rtt });
        trace!(rtt_us = rtt.as_micros() as u64, "rtt sample recorded");
    }

    /// Run the per-horizon regressions. X is milliseconds since the
    /// monitor's creation, Y is the RTT in microseconds.
    pub fn regress_all(&self) {
        let now = Instant::now();
        let samples: Vec<(Duration, f64, f64)> = {
            let mut ring = self.ring.lock().unwrap_or_else(PoisonError::into_inner);
            while let Some(front) = ring.front() {
                if now.duration_since(front.at) > self.horizons[0] {
                    ring.pop_front();
                } else {
                    break;
                }
            }
            ring.iter()
                .map(|s| {
                    let age = now.duration_since(s.at);
                    let x = s.at.duration_since(self.epoch).as_secs_f64() * 1_000.0;
                    (age, x, s.rtt.as_secs_f64() * 1_000_000.0)
                })
                .collect()
        };

        let mut inputs: Vec<Vec<(f64, f64)>> = vec![Vec::new(); self.horizons.len()];
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
            results[i] = crate::rate::linear_regression(input);
        }
    }

    /// Number of retained samples.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Latest regression results, longest horizon first.
    #[must_use]
    pub fn regressions(&self) -> Vec<Regression> {
        self.results.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Surge score in [0, 1].
    ///
    /// 1.0 when the shortest-horizon slope exceeds twice the mid-horizon
    /// slope, four times the longest-horizon slope, and the absolute
    /// floor; otherwise the mid-horizon slope normalized by the scorer,
    /// clamped at 0. NaN slopes never surge and score 0.
    #[must_use]
    pub fn surge_score(&self) -> f64 {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        let n = results.len();
        if n == 0 {
            return 0.0;
        }
        let shortest = results[n - 1].slope;
        let mid = results[n / 2].slope;
        let longest = results[0].slope;
        drop(results);

        if n >= 3 && shortest > 2.0 * mid && shortest > 4.0 * longest && shortest > SURGE_FLOOR {
            self.sink.debug("rtt_monitor", "rtt surge detected");
            return 1.0;
        }
        let score = self.scorer.lock().unwrap_or_else(PoisonError::into_inner).score(mid);
        score.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_telemetry::NoopSink;

    fn horizons() -> Vec<Duration> {
        vec![Duration::from_secs(3), Duration::from_secs(1), Duration::from_millis(400)]
    }

    #[test]
    fn no_samples_scores_zero() {
        let m = RttMonitor::new(horizons(), Arc::new(NoopSink));
        m.regress_all();
        assert_eq!(m.surge_score(), 0.0);
    }

    #[test]
    fn rising_rtt_scores_positive() {
        let m = RttMonitor::new(horizons(), Arc::new(NoopSink));
        for i in 0..20u64 {
            m.add_sample(Duration::from_millis(20 + i * 5));
            std::thread::sleep(Duration::from_millis(2));
        }
        m.regress_all();
        assert!(m.surge_score() > 0.0);
    }

    #[test]
    fn flat_rtt_scores_low() {
        let m = RttMonitor::new(horizons(), Arc::new(NoopSink));
        for _ in 0..10 {
            m.add_sample(Duration::from_millis(30));
            std::thread::sleep(Duration::from_millis(2));
        }
        m.regress_all();
        let score = m.surge_score();
        assert!(score.abs() < 0.5, "{score}");
    }
}
