//! Error types for the trigger run.

use flipmark_core::CoreError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the digital output port.
#[derive(Error, Debug)]
pub enum PortError {
    #[error("failed to open port {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write to port {target}: {source}")]
    Write {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} ports are not supported on this platform")]
    Unsupported(&'static str),

    #[error("port {target} is {max} bits wide, word has {width}")]
    WordTooWide {
        target: String,
        width: usize,
        max: usize,
    },

    #[error("invalid port spec '{0}', expected memory, parallel[:ADDR] or serial:PATH[@BAUD]")]
    InvalidSpec(String),

    #[error("unsupported baud rate {0}")]
    InvalidBaud(u32),

    #[error("write #{0} rejected")]
    Rejected(usize),
}

/// Errors surfaced by the scheduler and the trigger log.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("could not determine the display refresh rate")]
    RefreshRateUnknown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("frame {frame} started while the write for frame {pending} is still pending")]
    FlipPending { frame: u64, pending: u64 },

    #[error("scheduler has already drained")]
    Finished,

    #[error("record for frame {frame} does not follow frame {last}")]
    OutOfOrder { last: u64, frame: u64 },

    #[error("no free file name for {}", .0.display())]
    NoFreeFilename(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
