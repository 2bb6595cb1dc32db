use crate::timer::CalibrationStats;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshEstimate {
    /// Not enough stable intervals yet.
    Pending,
    Measured(f64),
    /// Gave up after `max_frames` flips without a stable run.
    Unknown,
}

/// Measures the display refresh rate from consecutive flip timestamps.
///
/// After `warmup` flips are discarded, the last `identical` intervals are
/// checked on every flip; once their standard deviation drops below
/// `threshold_ms` the rate is `1 / mean`. No stable run within `max_frames`
/// flips means the rate is unknown.
#[derive(Debug, Clone)]
pub struct RefreshEstimator {
    pub warmup: usize,
    pub identical: usize,
    pub max_frames: usize,
    pub threshold_ms: f64,
    last_flip_ns: Option<u64>,
    flips: usize,
    intervals: Vec<Duration>,
    result: Option<RefreshEstimate>,
}

impl Default for RefreshEstimator {
    fn default() -> Self {
        Self {
            warmup: 10,
            identical: 10,
            max_frames: 100,
            threshold_ms: 1.0,
            last_flip_ns: None,
            flips: 0,
            intervals: Vec::with_capacity(100),
            result: None,
        }
    }
}

impl RefreshEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one flip timestamp (nanoseconds on the run clock).
    pub fn observe_flip(&mut self, flip_ns: u64) -> RefreshEstimate {
        if let Some(done) = self.result {
            return done;
        }
        self.flips += 1;
        let previous = self.last_flip_ns.replace(flip_ns);
        if self.flips <= self.warmup {
            return RefreshEstimate::Pending;
        }
        if let Some(prev) = previous {
            self.intervals
                .push(Duration::from_nanos(flip_ns.saturating_sub(prev)));
        }

        if self.intervals.len() >= self.identical {
            let window = &self.intervals[self.intervals.len() - self.identical..];
            let stats = CalibrationStats::from_durations(window);
            if stats.jitter_ns / 1e6 < self.threshold_ms && stats.effective_fps > 0.0 {
                let done = RefreshEstimate::Measured(stats.effective_fps);
                self.result = Some(done);
                return done;
            }
        }

        if self.flips >= self.warmup + self.max_frames {
            self.result = Some(RefreshEstimate::Unknown);
            return RefreshEstimate::Unknown;
        }
        RefreshEstimate::Pending
    }

    /// Drives `flip` until the estimate settles. `flip` blocks on vsync and
    /// returns the flip timestamp in nanoseconds.
    pub fn measure(mut self, mut flip: impl FnMut() -> u64) -> Option<f64> {
        loop {
            match self.observe_flip(flip()) {
                RefreshEstimate::Pending => continue,
                RefreshEstimate::Measured(rate) => {
                    tracing::info!(rate_hz = rate, flips = self.flips, "refresh rate measured");
                    return Some(rate);
                }
                RefreshEstimate::Unknown => {
                    tracing::warn!(flips = self.flips, "refresh rate did not stabilise");
                    return None;
                }
            }
        }
    }
}
