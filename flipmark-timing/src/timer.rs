use std::time::{Duration, Instant};

/// Monotonic run clock shared by the display, audio and trigger log.
pub trait Timer: Clone + Send + Sync {
    type Timestamp: Copy + Clone + Send + Sync;
    fn now(&self) -> Self::Timestamp;
    fn elapsed(&self, ts: Self::Timestamp) -> Duration;
    fn sleep(&self, d: Duration);
    /// Blocks until the clock reads at least `ts`.
    fn sleep_until(&self, ts: Self::Timestamp);
    fn record_frame(&mut self, d: Duration);
    fn calibration_stats(&self) -> CalibrationStats;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

impl CalibrationStats {
    pub fn from_durations(frames: &[Duration]) -> Self {
        if frames.is_empty() {
            return Self::default();
        }
        let times: Vec<f64> = frames.iter().map(|d| d.as_nanos() as f64).collect();
        let avg = times.iter().sum::<f64>() / times.len() as f64;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / times.len() as f64;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        CalibrationStats {
            average_frame_time_ns: avg,
            jitter_ns: var.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

/// Nanosecond clock anchored at construction. Clones share the anchor.
#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    pub start: Instant,
    pub frame_times: Vec<Duration>,
    pub max_samples: usize,
}

impl Timer for HighPrecisionTimer {
    type Timestamp = u64;
    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }
    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }
    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d)
    }
    fn sleep_until(&self, ts: u64) {
        // clock_nanosleep can wake early on a signal
        loop {
            let now = self.now();
            if now >= ts {
                break;
            }
            self.high_precision_sleep(Duration::from_nanos(ts - now));
        }
    }
    fn record_frame(&mut self, d: Duration) {
        if self.frame_times.len() >= self.max_samples {
            self.frame_times.remove(0);
        }
        self.frame_times.push(d);
    }
    fn calibration_stats(&self) -> CalibrationStats {
        CalibrationStats::from_durations(&self.frame_times)
    }
}

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frame_times: Vec::with_capacity(1000),
            max_samples: 1000,
        }
    }

    /// Current clock reading in seconds.
    pub fn seconds(&self) -> f64 {
        Self::to_seconds(self.now())
    }

    pub fn to_seconds(ts: u64) -> f64 {
        ts as f64 / 1e9
    }

    pub fn from_seconds(secs: f64) -> u64 {
        (secs.max(0.0) * 1e9).round() as u64
    }

    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(target_os = "macos")]
        self.macos_sleep(duration);
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        self.hybrid_sleep(duration);
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        let req = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, 0, &req, std::ptr::null_mut());
        }
    }

    #[cfg(target_os = "macos")]
    fn macos_sleep(&self, duration: Duration) {
        use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

        if duration.as_nanos() < 100_000 {
            unsafe {
                let start = mach_absolute_time();
                let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
                mach_timebase_info(&mut timebase);

                let target_ticks =
                    duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;

                while mach_absolute_time() - start < target_ticks {
                    std::hint::spin_loop();
                }
            }
        } else {
            std::thread::sleep(duration);
        }
    }

    /// Coarse sleep for all but the last 2 ms, then spin.
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn hybrid_sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let spin = Duration::from_millis(2);
        if duration > spin {
            std::thread::sleep(duration - spin);
        }
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Raises the system timer resolution to 1 ms for its lifetime (Windows only).
pub struct TimerResolutionGuard {
    _private: (),
}

impl TimerResolutionGuard {
    pub fn acquire() -> Self {
        #[cfg(windows)]
        unsafe {
            windows::Win32::Media::timeBeginPeriod(1);
        }
        tracing::debug!("timer resolution raised");
        Self { _private: () }
    }
}

impl Drop for TimerResolutionGuard {
    fn drop(&mut self) {
        #[cfg(windows)]
        unsafe {
            windows::Win32::Media::timeEndPeriod(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_of_empty_sample_are_zero() {
        assert_eq!(CalibrationStats::from_durations(&[]), CalibrationStats::default());
    }

    #[test]
    fn stats_describe_constant_frames() {
        let frames = vec![Duration::from_micros(16_667); 10];
        let stats = CalibrationStats::from_durations(&frames);
        assert!((stats.average_frame_time_ns - 16_667_000.0).abs() < 1e-6);
        assert!(stats.jitter_ns.abs() < 1e-6);
        assert!((stats.effective_fps - 59.998).abs() < 0.01);
    }

    #[test]
    fn frame_buffer_is_bounded() {
        let mut timer = HighPrecisionTimer::new();
        timer.max_samples = 3;
        for ms in 1..=5 {
            timer.record_frame(Duration::from_millis(ms));
        }
        assert_eq!(
            timer.frame_times,
            vec![
                Duration::from_millis(3),
                Duration::from_millis(4),
                Duration::from_millis(5)
            ]
        );
    }

    #[test]
    fn sleep_until_waits_for_deadline() {
        let timer = HighPrecisionTimer::new();
        let target = timer.now() + 2_000_000;
        timer.sleep_until(target);
        assert!(timer.now() >= target);
        // past deadlines return immediately
        timer.sleep_until(0);
    }

    #[test]
    fn seconds_round_trip() {
        assert_eq!(HighPrecisionTimer::from_seconds(1.5), 1_500_000_000);
        assert_eq!(HighPrecisionTimer::to_seconds(250_000_000), 0.25);
        assert_eq!(HighPrecisionTimer::from_seconds(-1.0), 0);
    }
}
