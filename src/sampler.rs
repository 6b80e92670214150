use std::collections::VecDeque;
use std::time::Instant;

use tracing::debug;

use crate::estimator::{RateEstimator, Reading};
use crate::source::{Observation, Source, SourceError};

/// Transfer progress for a file tap with a known expected size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub current: u64,
    pub expected: u64,
    /// Estimated seconds remaining, from the windowed average rate. `None`
    /// while stalled or before enough data exists.
    pub eta_secs: Option<f64>,
}

/// Per-source view handed to the display; rates in bytes/second.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub name: String,
    pub rate: f64,
    pub windowed_avg: f64,
    pub lifetime_avg: f64,
    pub total_bytes: u64,
    /// Smoothed rates, oldest first, bounded by the configured history length.
    pub history: Vec<f64>,
    /// The source failed this tick and the reading repeats the previous one.
    pub stale: bool,
    pub progress: Option<Progress>,
}

/// Immutable result of one tick, entries in configured (stacking) order.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub taken_at: Instant,
    pub entries: Vec<SnapshotEntry>,
}

/// How a source relates to exit-on-completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Untracked,
    Pending,
    Complete,
}

struct Slot {
    source: Source,
    estimator: RateEstimator,
    reading: Reading,
    history: VecDeque<f64>,
    consecutive_failures: u32,
    unavailable_streak: u32,
    idle_ticks: u32,
    seen_bytes: bool,
    last_total: u64,
}

/// The ordered set of (source, estimator) pairs the refresh loop advances
/// once per tick. Failures are isolated per source; escalation policy belongs
/// to the caller.
pub struct SourceSet {
    slots: Vec<Slot>,
    alpha: f64,
    window: usize,
    history_len: usize,
}

impl SourceSet {
    pub fn new(alpha: f64, window: usize, history_len: usize) -> Self {
        Self {
            slots: Vec::new(),
            alpha,
            // the windowed average cannot look further back than the history
            window: window.min(history_len).max(1),
            history_len: history_len.max(1),
        }
    }

    pub fn push(&mut self, source: Source) {
        self.slots.push(Slot {
            source,
            estimator: RateEstimator::new(self.alpha, self.window),
            reading: Reading::default(),
            history: VecDeque::with_capacity(self.history_len),
            consecutive_failures: 0,
            unavailable_streak: 0,
            idle_ticks: 0,
            seen_bytes: false,
            last_total: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Advance every source once and assemble the tick's snapshot. The same
    /// `now` is fed to every estimator so entries are logically simultaneous.
    pub fn sample(&mut self, now: Instant) -> Snapshot {
        let mut entries = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            let stale = match slot.source.observe() {
                Ok(obs) => {
                    slot.consecutive_failures = 0;
                    slot.unavailable_streak = 0;
                    match slot.estimator.update(now, obs) {
                        Ok(reading) => slot.reading = reading,
                        // clock anomaly: skip this tick, keep the reading
                        Err(e) => debug!(source = %slot.source.label(), %e, "skipping tick"),
                    }
                    false
                }
                Err(SourceError::NotReady(what)) => {
                    // transient gap: repeat the previous reading
                    slot.consecutive_failures += 1;
                    debug!(%what, failures = slot.consecutive_failures, "source not ready");
                    true
                }
                Err(SourceError::Unavailable(what)) => {
                    slot.consecutive_failures += 1;
                    slot.unavailable_streak += 1;
                    debug!(%what, "source unavailable, decaying");
                    // zero delta lets the smoothed rate decay toward zero
                    if let Ok(reading) = slot.estimator.update(now, Observation::Delta(0)) {
                        slot.reading = reading;
                    }
                    true
                }
            };

            let total = slot.estimator.total_bytes();
            if total > slot.last_total {
                slot.seen_bytes = true;
                slot.idle_ticks = 0;
            } else {
                slot.idle_ticks += 1;
            }
            slot.last_total = total;

            slot.history.push_back(slot.reading.rate);
            while slot.history.len() > self.history_len {
                slot.history.pop_front();
            }

            entries.push(SnapshotEntry {
                name: slot.source.label(),
                rate: slot.reading.rate,
                windowed_avg: slot.reading.windowed_avg,
                lifetime_avg: slot.reading.lifetime_avg,
                total_bytes: total,
                history: slot.history.iter().copied().collect(),
                stale,
                progress: slot.progress(),
            });
        }
        Snapshot { taken_at: now, entries }
    }

    /// Largest consecutive-failure count across sources, for the caller's
    /// retry-ceiling policy.
    pub fn max_consecutive_failures(&self) -> u32 {
        self.slots
            .iter()
            .map(|s| s.consecutive_failures)
            .max()
            .unwrap_or(0)
    }

    /// True once every source has reported Unavailable for at least
    /// `streak` consecutive ticks — nothing left to watch.
    pub fn all_unavailable_for(&self, streak: u32) -> bool {
        !self.slots.is_empty() && self.slots.iter().all(|s| s.unavailable_streak >= streak)
    }

    /// Name of the first source past the failure ceiling, if any.
    pub fn source_over_failure_limit(&self, limit: u32) -> Option<String> {
        self.slots
            .iter()
            .find(|s| s.consecutive_failures > limit)
            .map(|s| s.source.label())
    }

    /// Aggregate completion over tracked sources: `None` when no source is
    /// tracked, otherwise whether every tracked source has completed.
    pub fn tracked_complete(&self, idle_exit: u32) -> Option<bool> {
        let mut tracked = false;
        let mut all_complete = true;
        for slot in &self.slots {
            match slot.completion(idle_exit) {
                Completion::Untracked => {}
                Completion::Pending => {
                    tracked = true;
                    all_complete = false;
                }
                Completion::Complete => tracked = true,
            }
        }
        tracked.then_some(all_complete)
    }
}

impl Slot {
    fn progress(&self) -> Option<Progress> {
        let expected = self.source.expected_size()?;
        let current = self.estimator.last_value();
        let remaining = expected.saturating_sub(current);
        let eta_secs = if remaining == 0 {
            Some(0.0)
        } else if self.reading.windowed_avg > 0.0 {
            Some(remaining as f64 / self.reading.windowed_avg)
        } else {
            None
        };
        Some(Progress {
            current,
            expected,
            eta_secs,
        })
    }

    fn completion(&self, idle_exit: u32) -> Completion {
        if !self.source.tracks_completion() {
            return Completion::Untracked;
        }
        let complete = match self.source.expected_size() {
            // progress-tracked file: done once it reaches its expected size
            Some(expected) => self.estimator.last_value() >= expected,
            // stream: done once it has produced (or closed) and then shown
            // zero growth for the configured number of ticks
            None => {
                (self.seen_bytes || self.source.stream_finished() == Some(true))
                    && self.idle_ticks >= idle_exit
            }
        };
        if complete {
            Completion::Complete
        } else {
            Completion::Pending
        }
    }
}
