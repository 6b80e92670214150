use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;

use crate::source::Observation;

/// One (timestamp, cumulative bytes) pair. Kept only long enough to compute
/// the next delta.
#[derive(Debug, Clone, Copy)]
struct Sample {
    time: Instant,
    value: u64,
}

/// Rates computed for one source at one tick, all in bytes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    /// Exponentially smoothed instantaneous rate.
    pub rate: f64,
    /// Mean of the last few smoothed readings.
    pub windowed_avg: f64,
    /// Total bytes observed divided by total elapsed time.
    pub lifetime_avg: f64,
}

/// The wall clock did not advance between two samples. The caller skips the
/// tick and keeps its previous reading.
#[derive(Debug, Error)]
#[error("non-positive interval between samples")]
pub struct NonPositiveInterval;

/// Converts successive observations from one source into smoothed rates.
///
/// Works off cumulative counter values or per-tick byte deltas; both are
/// normalized to a delta internally and fed through the same smoothing law:
/// `smoothed = alpha * raw + (1 - alpha) * smoothed`. A counter that goes
/// backwards is treated as a reset, with the new raw value taken as the bytes
/// observed since the previous sample.
pub struct RateEstimator {
    alpha: f64,
    last: Option<Sample>,
    start: Option<Instant>,
    smoothed: f64,
    total: u64,
    window: VecDeque<f64>,
    window_cap: usize,
    window_sum: f64,
}

impl RateEstimator {
    pub fn new(alpha: f64, window_cap: usize) -> Self {
        debug_assert!(alpha > 0.0 && alpha < 1.0);
        Self {
            alpha,
            last: None,
            start: None,
            smoothed: 0.0,
            total: 0,
            window: VecDeque::with_capacity(window_cap.max(1)),
            window_cap: window_cap.max(1),
            window_sum: 0.0,
        }
    }

    /// Bytes observed since the first sample.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Most recent cumulative counter value, 0 before the first sample.
    pub fn last_value(&self) -> u64 {
        self.last.map(|s| s.value).unwrap_or(0)
    }

    pub fn update(&mut self, now: Instant, obs: Observation) -> Result<Reading, NonPositiveInterval> {
        let Some(last) = self.last else {
            // A single point gives no rate; it only establishes the baseline.
            let value = match obs {
                Observation::Cumulative(c) => c,
                Observation::Delta(d) => {
                    // Bytes streamed before the first tick still count toward
                    // the lifetime total.
                    self.total = d;
                    d
                }
            };
            self.last = Some(Sample { time: now, value });
            self.start = Some(now);
            self.push_window(0.0);
            return Ok(Reading::default());
        };

        let elapsed = now.duration_since(last.time).as_secs_f64();
        if elapsed <= 0.0 {
            return Err(NonPositiveInterval);
        }

        let (delta, value) = match obs {
            Observation::Cumulative(c) if c < last.value => {
                // Counter reset (device re-init or wraparound): assume it
                // restarted from zero, so the raw value is the delta.
                (c, c)
            }
            Observation::Cumulative(c) => (c - last.value, c),
            Observation::Delta(d) => (d, last.value.saturating_add(d)),
        };

        self.total = self.total.saturating_add(delta);
        let raw = delta as f64 / elapsed;
        self.smoothed = self.alpha * raw + (1.0 - self.alpha) * self.smoothed;
        self.last = Some(Sample { time: now, value });
        self.push_window(self.smoothed);

        let since_start = self
            .start
            .map(|s| now.duration_since(s).as_secs_f64())
            .unwrap_or_default();
        let lifetime_avg = if since_start > 0.0 {
            self.total as f64 / since_start
        } else {
            0.0
        };

        Ok(Reading {
            rate: self.smoothed,
            windowed_avg: self.window_sum / self.window.len() as f64,
            lifetime_avg,
        })
    }

    fn push_window(&mut self, v: f64) {
        self.window.push_back(v);
        self.window_sum += v;
        if self.window.len() > self.window_cap {
            if let Some(old) = self.window.pop_front() {
                self.window_sum -= old;
            }
        }
    }
}
