//! Playback timing utilities
//!
//! Tracks how long utterances play and how long they wait in the queue.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tracks timing metrics over a sliding window
#[derive(Debug)]
pub struct TimingTracker {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl TimingTracker {
    /// Create a new timing tracker with the specified window size
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a new timing sample
    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    /// Get the average duration
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    pub fn min(&self) -> Duration {
        self.samples.iter().min().copied().unwrap_or(Duration::ZERO)
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().max().copied().unwrap_or(Duration::ZERO)
    }

    /// Get the 95th percentile duration
    pub fn percentile_95(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.samples.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    fn summary(&self) -> TimingSummary {
        TimingSummary {
            count: self.count(),
            average_ms: self.average().as_millis() as u64,
            min_ms: self.min().as_millis() as u64,
            max_ms: self.max().as_millis() as u64,
            p95_ms: self.percentile_95().as_millis() as u64,
        }
    }
}

/// A simple stopwatch for measuring elapsed time
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimingSummary {
    pub count: usize,
    pub average_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p95_ms: u64,
}

/// Running playback statistics kept by the scheduler worker
#[derive(Debug)]
pub struct PlaybackMetrics {
    playback: TimingTracker,
    queue_wait: TimingTracker,
    dispatched: u64,
    queued: u64,
    dropped: u64,
    failed: u64,
}

impl PlaybackMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            playback: TimingTracker::new(window),
            queue_wait: TimingTracker::new(window),
            dispatched: 0,
            queued: 0,
            dropped: 0,
            failed: 0,
        }
    }

    pub fn record_dispatch(&mut self) {
        self.dispatched += 1;
    }

    pub fn record_queued(&mut self) {
        self.queued += 1;
    }

    pub fn record_dropped(&mut self, count: usize) {
        self.dropped += count as u64;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn record_playback(&mut self, duration: Duration) {
        self.playback.record(duration);
    }

    pub fn record_queue_wait(&mut self, duration: Duration) {
        self.queue_wait.record(duration);
    }

    pub fn snapshot(&self) -> PlaybackMetricsSnapshot {
        PlaybackMetricsSnapshot {
            dispatched: self.dispatched,
            queued: self.queued,
            dropped: self.dropped,
            failed: self.failed,
            playback: self.playback.summary(),
            queue_wait: self.queue_wait.summary(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackMetricsSnapshot {
    /// Utterances sent to the device
    pub dispatched: u64,
    /// Utterances deferred into the queue
    pub queued: u64,
    /// Queued utterances discarded by `stop()` or an interrupt
    pub dropped: u64,
    /// Dispatch attempts the device rejected
    pub failed: u64,
    pub playback: TimingSummary,
    pub queue_wait: TimingSummary,
}

impl PlaybackMetricsSnapshot {
    /// Generate a one-line summary string
    pub fn summary(&self) -> String {
        format!(
            "dispatched: {} | queued: {} | dropped: {} | failed: {} | avg playback: {}ms | avg wait: {}ms",
            self.dispatched,
            self.queued,
            self.dropped,
            self.failed,
            self.playback.average_ms,
            self.queue_wait.average_ms
        )
    }
}
