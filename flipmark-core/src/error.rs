use thiserror::Error;

/// Contract violations caught while building the trigger model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("word width {width} must be between {min} and {max} bits")]
    InvalidWordWidth { width: usize, min: usize, max: usize },

    #[error("trigger interval must be at least one frame")]
    ZeroInterval,

    #[error("audio period of {period_secs} s at {refresh_rate} Hz is shorter than one frame")]
    AudioPeriodTooShort { period_secs: f64, refresh_rate: f64 },

    #[error("refresh rate must be a positive finite number, got {0}")]
    InvalidRefreshRate(f64),
}
