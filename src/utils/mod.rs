pub mod perf;

pub use perf::{PlaybackMetrics, PlaybackMetricsSnapshot, Stopwatch, TimingSummary, TimingTracker};
