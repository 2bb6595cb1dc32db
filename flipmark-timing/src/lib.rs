pub mod refresh;
pub mod timer;

pub use refresh::{RefreshEstimate, RefreshEstimator};
pub use timer::{CalibrationStats, HighPrecisionTimer, Timer, TimerResolutionGuard};
